//! Request forwarding.
//!
//! Two paths with very different shapes:
//!
//! - `buffered_forward` materializes both bodies, which is what makes body
//!   logging, body rewriting and caching possible. Outgoing messages always
//!   carry an exact `Content-Length`.
//! - `streaming_forward` pipes bodies through without buffering, preserving
//!   the origin's framing. Server-sent event responses get their chunks
//!   delivered as they arrive.

use std::convert::Infallible;
use std::io;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyDataStream, BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH,
    CONTENT_TYPE, HOST,
};
use hyper::{HeaderMap, Request, Response, StatusCode};
use reqwest::Url;
use tracing::{debug, error, info, warn};

use super::handler::RequestContext;
use super::headers::{copy_headers, is_hop_by_hop, VALUE_HIT, X_CACHE, X_CACHE_EXPIRES};
use crate::cache::CacheEntry;
use crate::compression::{gzip_compress, gzip_decompress};
use crate::logging;
use crate::overrides::{apply_replacements, CompiledReplacement};

/// Body type produced by every proxy path. Streamed upstream bodies are
/// `Send` but not `Sync`, hence the unsync box.
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes)
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

pub fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// JSON error response, used wherever the dispatcher recovers from a failure.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = format!(r#"{{"error": "{message}"}}"#);
    let mut response = Response::new(full_body(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Forward with full buffering: log, rewrite, cache, then answer with an
/// exact `Content-Length`.
pub async fn buffered_forward(
    ctx: &RequestContext<'_>,
    req: Request<Incoming>,
    upstream_url: Url,
    match_url: &str,
) -> Response<ProxyBody> {
    let method = req.method().clone();
    let req_headers = req.headers().clone();

    if ctx.settings.log.show_request_headers {
        logging::log_headers("request headers", &req_headers);
    }

    // Cache lookup happens only for eligible URLs, so ineligible traffic
    // never skews the hit/miss counters.
    let cache_key = ctx.cache.and_then(|cache| {
        if cache.is_cacheable(upstream_url.as_str()) {
            Some(cache.fingerprint(&method, upstream_url.as_str(), &req_headers))
        } else {
            debug!(url = %upstream_url, "URL not eligible for caching");
            None
        }
    });
    if let (Some(cache), Some(key)) = (ctx.cache, cache_key.as_deref()) {
        if let Some(entry) = cache.lookup(key) {
            info!(expires = %entry.expires_at.to_rfc3339(), "serving response from cache");
            return serve_cached(&entry, ctx);
        }
    }

    let body_bytes = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };
    if !body_bytes.is_empty() && ctx.settings.log.show_request_body {
        let content_type = header_str(&req_headers, &CONTENT_TYPE);
        logging::log_body(
            "request body",
            &body_bytes,
            content_type,
            Some(&req_headers),
            &ctx.settings.log,
        );
    }

    // Re-framed upstream request: hop-by-hop headers scrubbed, Host derived
    // from the upstream URL, Content-Length recomputed from the buffered body.
    let mut upstream_headers = HeaderMap::new();
    copy_headers(&mut upstream_headers, &req_headers, false);
    upstream_headers.remove(HOST);
    upstream_headers.remove(CONTENT_LENGTH);

    let result = ctx
        .client
        .request(method.clone(), upstream_url.clone())
        .headers(upstream_headers)
        .body(body_bytes.to_vec())
        .send()
        .await;
    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            error!(url = %upstream_url, error = %e, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    let status = upstream_response.status();
    let mut resp_headers = upstream_response.headers().clone();
    let mut body = match upstream_response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            error!(url = %upstream_url, error = %e, "failed to read upstream response body");
            return error_response(StatusCode::BAD_GATEWAY, "failed to read upstream response");
        }
    };

    info!(status = status.as_u16(), "upstream response");
    if ctx.settings.log.show_response_headers {
        logging::log_headers("response headers", &resp_headers);
    }
    if !body.is_empty() && ctx.settings.log.show_response_body {
        let content_type = header_str(&resp_headers, &CONTENT_TYPE);
        logging::log_body(
            "response body",
            &body,
            content_type,
            Some(&resp_headers),
            &ctx.settings.log,
        );
    }

    // Rules that only carry replacements rewrite the origin's response.
    // This lookup deliberately skips counter accounting; the stateful
    // selection already ran before the forward.
    if let Some(rule) = ctx.engine.select_for_rewrite(&method, match_url) {
        if !body.is_empty() {
            info!(rule = %rule.rule.name, "applying body replacements to proxied response");
            body = rewrite_with_encoding(body, &rule.replacements, &mut resp_headers);
        }
    }

    if let (Some(cache), Some(key)) = (ctx.cache, cache_key) {
        cache.store(
            key,
            status.as_u16(),
            &resp_headers,
            body.clone(),
            upstream_url.as_str(),
        );
    }

    let mut out_headers = HeaderMap::new();
    copy_headers(&mut out_headers, &resp_headers, false);
    out_headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut response = Response::new(full_body(Bytes::from(body)));
    *response.status_mut() = status;
    *response.headers_mut() = out_headers;
    response
}

/// Forward without buffering. The request body goes upstream as a live
/// stream; the response body is piped back chunk by chunk, so a client
/// disconnect or upstream failure mid-stream simply terminates the transfer.
pub async fn streaming_forward(
    ctx: &RequestContext<'_>,
    req: Request<Incoming>,
    upstream_url: Url,
) -> Response<ProxyBody> {
    let (parts, body) = req.into_parts();

    if ctx.settings.log.show_request_headers {
        logging::log_headers("request headers", &parts.headers);
    }

    let mut upstream_headers = HeaderMap::new();
    copy_headers(&mut upstream_headers, &parts.headers, true);
    upstream_headers.remove(HOST);
    // The client stack frames the outgoing stream itself: an explicit
    // Content-Length is honored, anything else goes out chunked.
    upstream_headers.remove(hyper::header::TRANSFER_ENCODING);

    if let Some(len) = header_str(&parts.headers, &CONTENT_LENGTH) {
        debug!(content_length = len, "streaming request body with known length");
    } else {
        debug!("streaming request body with chunked framing");
    }

    let result = ctx
        .client
        .request(parts.method.clone(), upstream_url.clone())
        .headers(upstream_headers)
        .body(reqwest::Body::wrap_stream(BodyDataStream::new(body)))
        .send()
        .await;
    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            error!(url = %upstream_url, error = %e, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();

    info!(status = status.as_u16(), "upstream response (streaming)");
    if ctx.settings.log.show_response_headers {
        logging::log_headers("response headers", &resp_headers);
    }

    let mut out_headers = HeaderMap::new();
    copy_headers(&mut out_headers, &resp_headers, true);

    let is_sse = header_str(&resp_headers, &CONTENT_TYPE)
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/event-stream"))
        .unwrap_or(false);
    if is_sse {
        info!("event stream detected, flushing per chunk");
        out_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        out_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        out_headers.remove(CONTENT_LENGTH);
    }

    let stream = upstream_response
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(io::Error::other);

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = out_headers;
    response
}

/// Answer from the cache, with the marker headers the client can key on.
pub fn serve_cached(entry: &CacheEntry, ctx: &RequestContext<'_>) -> Response<ProxyBody> {
    let mut out_headers = HeaderMap::new();
    for (name, value) in &entry.headers {
        if is_hop_by_hop(name, false) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out_headers.append(name, value);
        }
    }

    out_headers.insert(X_CACHE.clone(), VALUE_HIT.clone());
    if let Ok(expires) = HeaderValue::from_str(&entry.expires_at.to_rfc3339()) {
        out_headers.insert(X_CACHE_EXPIRES.clone(), expires);
    }
    out_headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.body.len()));

    if ctx.settings.log.show_response_headers {
        logging::log_headers("response headers (cached)", &out_headers);
    }
    if !entry.body.is_empty() && ctx.settings.log.show_response_body {
        logging::log_cached_body(
            "response body (cached)",
            &entry.body,
            Some(&out_headers),
            &ctx.settings.log,
        );
    }

    let mut response = Response::new(full_body(Bytes::from(entry.body.clone())));
    *response.status_mut() = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    *response.headers_mut() = out_headers;
    response
}

/// Replacements run over the decompressed body. A gzip body is unpacked
/// first and re-packed afterwards; when re-compression fails the
/// `Content-Encoding` header is dropped and the plaintext goes out instead.
pub fn rewrite_with_encoding(
    body: Vec<u8>,
    replacements: &[CompiledReplacement],
    headers: &mut HeaderMap,
) -> Vec<u8> {
    let gzipped = header_str(headers, &CONTENT_ENCODING)
        .map(|enc| enc.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if !gzipped {
        return apply_replacements(&body, replacements);
    }

    let plain = match gzip_decompress(&body) {
        Ok(plain) => {
            debug!(packed = body.len(), plain = plain.len(), "unpacked gzip body for rewriting");
            plain
        }
        Err(e) => {
            warn!(error = %e, "gzip decompression failed, rewriting raw bytes");
            return apply_replacements(&body, replacements);
        }
    };

    let rewritten = apply_replacements(&plain, replacements);
    match gzip_compress(&rewritten) {
        Ok(packed) => packed,
        Err(e) => {
            warn!(error = %e, "gzip re-compression failed, sending plaintext");
            headers.remove(CONTENT_ENCODING);
            rewritten
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
