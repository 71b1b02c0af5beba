//! Stats endpoint.
//!
//! `GET /_proxy_stats` renders the rule table (including live counters), the
//! log settings, the upstream-proxy settings and the cache counters as one
//! JSON document. Per-rule counters are read under each rule's lock, so the
//! view is consistent per rule but not atomic across rules.

use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Response;
use serde::Serialize;

use crate::cache::ResponseCache;
use crate::config::{format_duration, Settings};
use crate::overrides::{OverrideEngine, OverrideStats};
use crate::proxy::forwarding::full_body;
use crate::proxy::ProxyBody;

#[derive(Serialize)]
struct StatsDocument {
    overrides: Vec<OverrideStats>,
    total_rules: usize,
    active_rules: usize,
    log_settings: LogSettingsStats,
    proxy_settings: ProxySettingsStats,
    cache_settings: CacheSettingsStats,
}

#[derive(Serialize)]
struct LogSettingsStats {
    show_request_body: bool,
    show_response_body: bool,
    show_request_headers: bool,
    show_response_headers: bool,
    body_log_mode: String,
    max_log_length: usize,
}

#[derive(Serialize)]
struct ProxySettingsStats {
    enabled: bool,
    url: String,
    has_auth: bool,
    skip_tls_verify: bool,
    timeout: String,
}

#[derive(Serialize)]
struct CacheSettingsStats {
    enabled: bool,
    ttl: String,
    cache_hits: u64,
    cache_misses: u64,
    cache_size: usize,
}

pub fn stats_response(
    settings: &Settings,
    engine: &OverrideEngine,
    cache: Option<&ResponseCache>,
) -> Response<ProxyBody> {
    let document = StatsDocument {
        overrides: engine.stats(),
        total_rules: engine.len(),
        active_rules: engine.active_count(),
        log_settings: LogSettingsStats {
            show_request_body: settings.log.show_request_body,
            show_response_body: settings.log.show_response_body,
            show_request_headers: settings.log.show_request_headers,
            show_response_headers: settings.log.show_response_headers,
            body_log_mode: settings.log.body_log_mode.as_str().to_string(),
            max_log_length: settings.log.max_log_length,
        },
        proxy_settings: ProxySettingsStats {
            enabled: settings.upstream_proxy.enabled,
            url: settings.upstream_proxy.url.clone(),
            has_auth: !settings.upstream_proxy.username.is_empty(),
            skip_tls_verify: settings.upstream_proxy.skip_tls_verify,
            timeout: format_duration(settings.upstream_proxy.timeout),
        },
        cache_settings: CacheSettingsStats {
            enabled: cache.is_some(),
            ttl: format_duration(settings.cache.ttl),
            cache_hits: cache.map(ResponseCache::hits).unwrap_or(0),
            cache_misses: cache.map(ResponseCache::misses).unwrap_or(0),
            cache_size: cache.map(ResponseCache::len).unwrap_or(0),
        },
    };

    let body = serde_json::to_vec(&document).unwrap_or_default();
    let mut response = Response::new(full_body(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, OverrideFile};
    use std::time::Duration;

    #[test]
    fn test_stats_document_shape() {
        let mut settings = Settings::default();
        settings.cache = CacheSettings {
            enabled: true,
            ttl: Duration::from_secs(1800),
            ..Default::default()
        };
        let engine = OverrideEngine::from_config(OverrideFile::default());
        let cache = ResponseCache::new(&settings.cache);

        let response = stats_response(&settings, &engine, Some(&cache));
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_stats_json_fields() {
        let settings = Settings::default();
        let engine = OverrideEngine::from_config(OverrideFile {
            overrides: vec![crate::config::OverrideRule {
                name: "r1".to_string(),
                method: "*".to_string(),
                url_pattern: "/x".to_string(),
                is_regex: false,
                status_code: 200,
                headers: Default::default(),
                body_file: String::new(),
                body_text: "mock".to_string(),
                body_replacements: vec![],
                enabled: true,
                trigger_after: 0,
                max_triggers: -1,
                reset_after: 0,
            }],
        });

        let document = StatsDocument {
            overrides: engine.stats(),
            total_rules: engine.len(),
            active_rules: engine.active_count(),
            log_settings: LogSettingsStats {
                show_request_body: true,
                show_response_body: true,
                show_request_headers: true,
                show_response_headers: true,
                body_log_mode: "json_full".to_string(),
                max_log_length: 2000,
            },
            proxy_settings: ProxySettingsStats {
                enabled: false,
                url: String::new(),
                has_auth: false,
                skip_tls_verify: false,
                timeout: format_duration(settings.upstream_proxy.timeout),
            },
            cache_settings: CacheSettingsStats {
                enabled: false,
                ttl: "0s".to_string(),
                cache_hits: 0,
                cache_misses: 0,
                cache_size: 0,
            },
        };

        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["total_rules"], 1);
        assert_eq!(json["active_rules"], 1);
        assert_eq!(json["overrides"][0]["name"], "r1");
        assert_eq!(json["overrides"][0]["request_count"], 0);
        assert_eq!(json["log_settings"]["body_log_mode"], "json_full");
        assert_eq!(json["proxy_settings"]["timeout"], "30s");
        assert_eq!(json["cache_settings"]["enabled"], false);
    }
}
