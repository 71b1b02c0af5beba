//! Header scrubbing and proxy-added header names.
//!
//! Hop-by-hop headers apply to a single transport connection and must never
//! cross the proxy. `Transfer-Encoding` is scrubbed in buffered mode, where
//! bodies are re-framed with an exact `Content-Length`, but passes through in
//! streaming mode so chunked bodies keep their framing.

use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;

pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub static X_CACHE_EXPIRES: HeaderName = HeaderName::from_static("x-cache-expires");
pub static VALUE_HIT: HeaderValue = HeaderValue::from_static("HIT");

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str, streaming: bool) -> bool {
    let lower = name.to_ascii_lowercase();
    if HOP_BY_HOP.contains(&lower.as_str()) {
        return true;
    }
    !streaming && lower == "transfer-encoding"
}

/// Copy headers across the hop, dropping the hop-by-hop set. Multi-valued
/// headers are appended so every value survives.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap, streaming: bool) {
    for (name, value) in src {
        if is_hop_by_hop(name.as_str(), streaming) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_set() {
        for name in ["Connection", "proxy-connection", "Proxy-Authenticate",
            "Proxy-Authorization", "TE", "Trailer", "Upgrade"]
        {
            assert!(is_hop_by_hop(name, false), "{name} should be scrubbed");
            assert!(is_hop_by_hop(name, true), "{name} should be scrubbed when streaming");
        }
    }

    #[test]
    fn test_transfer_encoding_mode_dependent() {
        assert!(is_hop_by_hop("Transfer-Encoding", false));
        assert!(!is_hop_by_hop("Transfer-Encoding", true));
    }

    #[test]
    fn test_regular_headers_pass() {
        assert!(!is_hop_by_hop("Content-Type", false));
        assert!(!is_hop_by_hop("Authorization", false));
        assert!(!is_hop_by_hop("Content-Length", false));
    }

    #[test]
    fn test_copy_headers_scrubs() {
        let mut src = HeaderMap::new();
        src.insert("content-type", "text/plain".parse().unwrap());
        src.insert("connection", "keep-alive".parse().unwrap());
        src.insert("upgrade", "h2c".parse().unwrap());
        src.insert("transfer-encoding", "chunked".parse().unwrap());

        let mut buffered = HeaderMap::new();
        copy_headers(&mut buffered, &src, false);
        assert!(buffered.contains_key("content-type"));
        assert!(!buffered.contains_key("connection"));
        assert!(!buffered.contains_key("upgrade"));
        assert!(!buffered.contains_key("transfer-encoding"));

        let mut streaming = HeaderMap::new();
        copy_headers(&mut streaming, &src, true);
        assert!(streaming.contains_key("transfer-encoding"));
        assert!(!streaming.contains_key("connection"));
    }

    #[test]
    fn test_copy_headers_keeps_multi_values() {
        let mut src = HeaderMap::new();
        src.append("set-cookie", "a=1".parse().unwrap());
        src.append("set-cookie", "b=2".parse().unwrap());

        let mut dst = HeaderMap::new();
        copy_headers(&mut dst, &src, false);
        assert_eq!(dst.get_all("set-cookie").iter().count(), 2);
    }
}
