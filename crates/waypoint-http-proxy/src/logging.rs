//! Request/response log rendering.
//!
//! Bodies are decompressed for display when they carry `Content-Encoding:
//! gzip`, pretty-printed when they are JSON (in `json_full` mode) and
//! summarized as a hex prefix when they are not valid UTF-8.

use std::borrow::Cow;

use hyper::header::CONTENT_ENCODING;
use hyper::HeaderMap;
use tracing::info;

use crate::compression::gzip_decompress;
use crate::config::{BodyLogMode, LogSettings};

/// Hard ceiling for `full` mode so a runaway body cannot flood the log.
const FULL_LOG_LIMIT: usize = 500 * 1024;

/// Longest hex sample rendered for non-UTF-8 payloads.
const HEX_SAMPLE_LEN: usize = 64;

pub fn log_headers(prefix: &str, headers: &HeaderMap) {
    if headers.is_empty() {
        info!("{prefix}: [none]");
        return;
    }

    let mut keys: Vec<&str> = headers.keys().map(|k| k.as_str()).collect();
    keys.sort_unstable();

    info!("{prefix}:");
    for key in keys {
        let values: Vec<String> = headers
            .get_all(key)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if values.len() == 1 {
            info!("  {key}: {}", values[0]);
        } else {
            info!("  {key}: {values:?}");
        }
    }
}

pub fn log_body(
    prefix: &str,
    body: &[u8],
    content_type: Option<&str>,
    headers: Option<&HeaderMap>,
    settings: &LogSettings,
) {
    if body.is_empty() {
        info!("{prefix}: [empty]");
        return;
    }

    match settings.body_log_mode {
        BodyLogMode::None => info!("{prefix}: [hidden by BODY_LOG_MODE=none]"),
        BodyLogMode::Full => log_body_full(prefix, body, headers),
        BodyLogMode::Truncate => log_body_truncated(prefix, body, headers, settings.max_log_length),
        BodyLogMode::JsonFull => {
            log_body_json_smart(prefix, body, content_type, headers, settings.max_log_length)
        }
    }
}

/// Cached responses always log truncated, whatever the configured mode.
pub fn log_cached_body(prefix: &str, body: &[u8], headers: Option<&HeaderMap>, settings: &LogSettings) {
    if body.is_empty() {
        info!("{prefix}: [empty]");
        return;
    }
    log_body_truncated(prefix, body, headers, settings.max_log_length);
}

fn log_body_full(prefix: &str, body: &[u8], headers: Option<&HeaderMap>) {
    if body.len() > FULL_LOG_LIMIT {
        info!("{prefix}: [{} bytes, too large to log]", body.len());
        return;
    }
    let plain = decompress_if_needed(body, headers);
    match std::str::from_utf8(&plain) {
        Ok(text) => info!("{prefix}: {text}"),
        Err(_) => log_hex_sample(prefix, &plain),
    }
}

fn log_body_truncated(prefix: &str, body: &[u8], headers: Option<&HeaderMap>, max_len: usize) {
    let plain = decompress_if_needed(body, headers);
    match std::str::from_utf8(&plain) {
        Ok(text) => info!("{prefix}: {}", truncate_str(text, max_len)),
        Err(_) => log_hex_sample(prefix, &plain),
    }
}

fn log_body_json_smart(
    prefix: &str,
    body: &[u8],
    content_type: Option<&str>,
    headers: Option<&HeaderMap>,
    max_len: usize,
) {
    let plain = decompress_if_needed(body, headers);

    if is_json_content(content_type, &plain) {
        if let Some(formatted) = format_json(&plain) {
            info!("{prefix} (json):\n{formatted}");
            return;
        }
    }

    match std::str::from_utf8(&plain) {
        Ok(text) => info!("{prefix}: {}", truncate_str(text, max_len)),
        Err(_) => log_hex_sample(prefix, &plain),
    }
}

fn log_hex_sample(prefix: &str, body: &[u8]) {
    info!("{prefix}: [non-UTF-8 data, {} bytes] {}", body.len(), hex_sample(body));
}

fn decompress_if_needed<'a>(body: &'a [u8], headers: Option<&HeaderMap>) -> Cow<'a, [u8]> {
    let encoding = headers
        .and_then(|h| h.get(CONTENT_ENCODING))
        .and_then(|v| v.to_str().ok());
    if encoding.is_some_and(|e| e.eq_ignore_ascii_case("gzip")) {
        if let Ok(plain) = gzip_decompress(body) {
            return Cow::Owned(plain);
        }
    }
    Cow::Borrowed(body)
}

/// Up to 64 bytes of lowercase hex plus a tail-length indicator.
fn hex_sample(body: &[u8]) -> String {
    let sample = &body[..body.len().min(HEX_SAMPLE_LEN)];
    let mut out: String = sample.iter().map(|b| format!("{b:02x}")).collect();
    if body.len() > sample.len() {
        out.push_str(&format!(" (+{} more bytes)", body.len() - sample.len()));
    }
    out
}

fn truncate_str(text: &str, max_len: usize) -> Cow<'_, str> {
    if text.len() <= max_len {
        return Cow::Borrowed(text);
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!(
        "{}... [truncated, total {} bytes]",
        &text[..end],
        text.len()
    ))
}

fn is_json_content(content_type: Option<&str>, body: &[u8]) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json")) {
        return true;
    }
    !body.is_empty() && serde_json::from_slice::<serde_json::Value>(body).is_ok()
}

fn format_json(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::gzip_compress;

    #[test]
    fn test_truncate_str_short_input_untouched() {
        assert_eq!(truncate_str("short", 100), "short");
    }

    #[test]
    fn test_truncate_str_cuts_long_input() {
        let out = truncate_str("abcdefgh", 4);
        assert!(out.starts_with("abcd... [truncated"));
        assert!(out.contains("8 bytes"));
    }

    #[test]
    fn test_truncate_str_respects_char_boundaries() {
        // Each arrow is 3 bytes; a cut at 4 must back off to a boundary.
        let out = truncate_str("→→→→", 4);
        assert!(out.starts_with("→..."));
    }

    #[test]
    fn test_hex_sample_short_payload() {
        assert_eq!(hex_sample(&[0xde, 0xad]), "dead");
    }

    #[test]
    fn test_hex_sample_reports_tail() {
        let body = vec![0xab; 100];
        let sample = hex_sample(&body);
        assert!(sample.starts_with(&"ab".repeat(64)));
        assert!(sample.ends_with("(+36 more bytes)"));
    }

    #[test]
    fn test_is_json_content_by_header() {
        assert!(is_json_content(Some("application/json; charset=utf-8"), b"x"));
    }

    #[test]
    fn test_is_json_content_by_shape() {
        assert!(is_json_content(None, br#"{"a": 1}"#));
        assert!(!is_json_content(None, b"plain text"));
    }

    #[test]
    fn test_format_json_pretty_prints() {
        let out = format_json(br#"{"a":1}"#).unwrap();
        assert!(out.contains("\"a\": 1"));
    }

    #[test]
    fn test_decompress_if_needed_unpacks_gzip() {
        let packed = gzip_compress(b"payload").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
        let plain = decompress_if_needed(&packed, Some(&headers));
        assert_eq!(plain.as_ref(), b"payload");
    }

    #[test]
    fn test_decompress_if_needed_passthrough_without_header() {
        let body = b"plain".to_vec();
        let plain = decompress_if_needed(&body, None);
        assert_eq!(plain.as_ref(), b"plain");
    }

    #[test]
    fn test_decompress_if_needed_keeps_raw_on_bad_gzip() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
        let body = b"not actually gzip".to_vec();
        let plain = decompress_if_needed(&body, Some(&headers));
        assert_eq!(plain.as_ref(), body.as_slice());
    }
}
