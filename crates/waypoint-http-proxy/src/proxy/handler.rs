//! Per-request dispatch.
//!
//! Each accepted request takes exactly one of four paths: a mocked response,
//! a cache hit, a buffered forward or a streaming forward. The decision order
//! is fixed: internal endpoints first, then rule selection (a rule with a
//! body short-circuits everything), then cache, then streaming. Caching and
//! streaming are mutually exclusive; caching wins because it needs the body
//! materialized.

use std::convert::Infallible;

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use reqwest::Url;
use tracing::{error, info, warn};

use super::forwarding::{
    buffered_forward, empty_response, error_response, full_body, streaming_forward, ProxyBody,
};
use crate::cache::ResponseCache;
use crate::config::Settings;
use crate::logging;
use crate::overrides::{apply_replacements, CompiledOverride, OverrideEngine};

/// How incoming requests map to upstream URLs.
pub enum ProxyMode {
    /// Every request is rewritten onto a single configured origin.
    TargetLocked(Url),
    /// The client supplies the full URL on each request (HTTP proxy form).
    AbsoluteUri,
}

/// Borrowed view of the runtime handed to each request.
pub struct RequestContext<'a> {
    pub settings: &'a Settings,
    pub engine: &'a OverrideEngine,
    pub cache: Option<&'a ResponseCache>,
    pub client: &'a reqwest::Client,
    pub mode: &'a ProxyMode,
}

pub async fn handle_request(
    ctx: &RequestContext<'_>,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    if req.method() == Method::CONNECT {
        warn!(target = ?req.uri(), "CONNECT rejected");
        return Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT method not supported",
        ));
    }

    // Internal paths other than the stats endpoint (which the server answers
    // before dispatch) are swallowed: no body, no upstream call.
    if req.uri().path().starts_with("/_proxy") {
        return Ok(empty_response(StatusCode::OK));
    }

    let upstream_url = match build_upstream_url(ctx.mode, req.uri(), req.headers()) {
        Ok(url) => url,
        Err(message) => {
            error!(uri = %req.uri(), "{message}");
            return Ok(error_response(StatusCode::BAD_REQUEST, message));
        }
    };

    let match_url = match_url(req.uri());
    info!(method = %req.method(), url = %match_url, upstream = %upstream_url, "proxying request");

    if let Some(rule) = ctx.engine.select(req.method(), &match_url) {
        if rule.rule.has_body() {
            info!(rule = %rule.rule.name, "serving mock response");
            return Ok(mock_response(rule, ctx).await);
        }
        if !rule.replacements.is_empty() {
            info!(rule = %rule.rule.name, "matched rule rewrites the proxied response");
        }
    }

    let cache_enabled = ctx.cache.is_some();
    if ctx.settings.log.enable_streaming && cache_enabled {
        warn!("caching takes precedence over streaming, using buffered mode");
    }

    if ctx.settings.log.enable_streaming && !cache_enabled {
        Ok(streaming_forward(ctx, req, upstream_url).await)
    } else {
        Ok(buffered_forward(ctx, req, upstream_url, &match_url).await)
    }
}

/// `path?query`, the string override rules match against.
fn match_url(uri: &Uri) -> String {
    match uri.query() {
        Some(query) => format!("{}?{}", uri.path(), query),
        None => uri.path().to_string(),
    }
}

/// Resolve the absolute upstream URL for this request.
fn build_upstream_url(
    mode: &ProxyMode,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Url, &'static str> {
    match mode {
        ProxyMode::TargetLocked(target) => {
            let mut url = target.clone();
            url.set_path(&join_paths(target.path(), uri.path()));
            url.set_query(uri.query());
            Ok(url)
        }
        ProxyMode::AbsoluteUri => {
            if uri.scheme().is_some() && uri.authority().is_some() {
                return Url::parse(&uri.to_string()).map_err(|_| "invalid absolute request URL");
            }
            // Origin-form request line: fall back to the Host header with a
            // default scheme of http.
            let host = headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .ok_or("absolute URL required (http://example.com/path)")?;
            let path_and_query = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            Url::parse(&format!("http://{host}{path_and_query}"))
                .map_err(|_| "invalid request URL")
        }
    }
}

/// Join the target's base path with the request path, preserving a trailing
/// slash on the incoming path.
fn join_paths(base: &str, request: &str) -> String {
    let mut joined = if base.is_empty() || base == "/" {
        request.to_string()
    } else if request.is_empty() || request == "/" {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            request.trim_start_matches('/')
        )
    };

    if request.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    if !joined.starts_with('/') {
        joined.insert(0, '/');
    }
    joined
}

/// Materialize and serve a mocked response: rule headers, body from file or
/// inline text, replacements applied, exact `Content-Length`.
async fn mock_response(rule: &CompiledOverride, ctx: &RequestContext<'_>) -> Response<ProxyBody> {
    let mut body: Vec<u8> = if !rule.rule.body_file.is_empty() {
        match tokio::fs::read(&rule.rule.body_file).await {
            Ok(bytes) => {
                info!(file = %rule.rule.body_file, bytes = bytes.len(), "mock body loaded from file");
                bytes
            }
            Err(e) => {
                error!(file = %rule.rule.body_file, error = %e, "failed to read mock body file");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to read override body file",
                );
            }
        }
    } else {
        rule.rule.body_text.clone().into_bytes()
    };

    if !rule.replacements.is_empty() && !body.is_empty() {
        body = apply_replacements(&body, &rule.replacements);
    }

    if ctx.settings.log.show_response_body && !body.is_empty() {
        let content_type = rule.rule.headers.get("Content-Type").map(String::as_str);
        logging::log_body("mock body", &body, content_type, None, &ctx.settings.log);
    }

    let body_len = body.len();
    let mut response = Response::new(full_body(Bytes::from(body)));
    *response.status_mut() =
        StatusCode::from_u16(rule.rule.status_code).unwrap_or(StatusCode::OK);

    for (name, value) in &rule.rule.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(rule = %rule.rule.name, header = %name, "skipping invalid override header"),
        }
    }
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(body_len));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_url_with_and_without_query() {
        let uri: Uri = "http://h/a/b?x=1".parse().unwrap();
        assert_eq!(match_url(&uri), "/a/b?x=1");

        let uri: Uri = "http://h/a/b".parse().unwrap();
        assert_eq!(match_url(&uri), "/a/b");
    }

    #[test]
    fn test_join_paths_plain() {
        assert_eq!(join_paths("", "/api/users"), "/api/users");
        assert_eq!(join_paths("/", "/api/users"), "/api/users");
        assert_eq!(join_paths("/base", "/api/users"), "/base/api/users");
        assert_eq!(join_paths("/base/", "/api/users"), "/base/api/users");
    }

    #[test]
    fn test_join_paths_preserves_trailing_slash() {
        assert_eq!(join_paths("/base", "/api/"), "/base/api/");
        assert_eq!(join_paths("", "/api/"), "/api/");
    }

    #[test]
    fn test_join_paths_root_request() {
        assert_eq!(join_paths("/base", "/"), "/base/");
        assert_eq!(join_paths("", "/"), "/");
    }

    #[test]
    fn test_target_locked_url() {
        let mode = ProxyMode::TargetLocked(Url::parse("http://origin:9000/base").unwrap());
        let uri: Uri = "/users/7?full=1".parse().unwrap();
        let url = build_upstream_url(&mode, &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url.as_str(), "http://origin:9000/base/users/7?full=1");
    }

    #[test]
    fn test_target_locked_preserves_trailing_slash() {
        let mode = ProxyMode::TargetLocked(Url::parse("http://origin/base").unwrap());
        let uri: Uri = "/users/".parse().unwrap();
        let url = build_upstream_url(&mode, &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url.path(), "/base/users/");
    }

    #[test]
    fn test_absolute_uri_passthrough() {
        let mode = ProxyMode::AbsoluteUri;
        let uri: Uri = "http://origin.example/path?q=1".parse().unwrap();
        let url = build_upstream_url(&mode, &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url.as_str(), "http://origin.example/path?q=1");
    }

    #[test]
    fn test_absolute_uri_from_host_header() {
        let mode = ProxyMode::AbsoluteUri;
        let uri: Uri = "/path".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "origin.example:8081".parse().unwrap());
        let url = build_upstream_url(&mode, &uri, &headers).unwrap();
        assert_eq!(url.as_str(), "http://origin.example:8081/path");
    }

    #[test]
    fn test_absolute_uri_without_host_rejected() {
        let mode = ProxyMode::AbsoluteUri;
        let uri: Uri = "/path".parse().unwrap();
        assert!(build_upstream_url(&mode, &uri, &HeaderMap::new()).is_err());
    }
}
