//! Cache snapshot persistence.
//!
//! A background task wakes once per second; when the cache is dirty it writes
//! a gzip-compressed JSON snapshot of the live entries (plus running hit/miss
//! counters) to the configured file, atomically via a temp-file rename. When
//! no live entries remain the file is removed instead. Startup rehydrates the
//! snapshot, skipping entries that expired while the proxy was down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CacheEntry, ResponseCache};
use crate::compression::{gzip_compress, gzip_decompress};

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: HashMap<String, CacheEntry>,
    pub saved_at: DateTime<Utc>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub fn save_to_disk(cache: &ResponseCache) -> anyhow::Result<()> {
    let path = cache.persist_file();
    let entries = cache.live_entries();

    if entries.is_empty() {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            debug!(path = %path.display(), "cache file removed, no live entries");
        }
        return Ok(());
    }

    let snapshot = CacheSnapshot {
        cache_hits: cache.hits(),
        cache_misses: cache.misses(),
        saved_at: Utc::now(),
        entries,
    };

    let encoded = serde_json::to_vec(&snapshot).context("failed to encode cache snapshot")?;
    let packed = gzip_compress(&encoded).context("failed to compress cache snapshot")?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &packed)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move snapshot into {}", path.display()))?;

    debug!(
        path = %path.display(),
        entries = snapshot.entries.len(),
        raw_bytes = encoded.len(),
        compressed_bytes = packed.len(),
        "cache snapshot written"
    );
    Ok(())
}

/// Best-effort startup load; any failure leaves the cache empty.
pub fn load_from_disk(cache: &ResponseCache) {
    let path = cache.persist_file();
    if !path.exists() {
        debug!(path = %path.display(), "no cache file to restore");
        return;
    }

    let packed = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cache file");
            return;
        }
    };
    let encoded = match gzip_decompress(&packed) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to decompress cache file");
            return;
        }
    };
    let snapshot: CacheSnapshot = match serde_json::from_slice(&encoded) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to decode cache file");
            return;
        }
    };

    let (loaded, expired) = cache.restore(snapshot.entries, snapshot.cache_hits, snapshot.cache_misses);
    info!(
        path = %path.display(),
        loaded,
        expired,
        saved_at = %snapshot.saved_at.to_rfc3339(),
        "cache restored from disk"
    );
}

/// Periodic write-back driver; runs for the lifetime of the process.
pub fn spawn_persistence_worker(cache: Arc<ResponseCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if cache.take_modified() {
                if let Err(e) = save_to_disk(&cache) {
                    warn!(error = %e, "cache snapshot failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use hyper::HeaderMap;

    fn cache_at(path: std::path::PathBuf, ttl: Duration) -> ResponseCache {
        ResponseCache::new(&CacheSettings {
            enabled: true,
            ttl,
            key_headers: vec![],
            url_patterns: vec![],
            persist_file: path,
        })
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gob");

        let cache = cache_at(path.clone(), Duration::from_secs(3600));
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        cache.store("k1".to_string(), 200, &headers, b"body-1".to_vec(), "http://h/1");
        cache.store("k2".to_string(), 404, &HeaderMap::new(), b"body-2".to_vec(), "http://h/2");
        cache.lookup("k1");
        cache.lookup("absent");

        save_to_disk(&cache).unwrap();
        assert!(path.exists());

        let restored = cache_at(path, Duration::from_secs(3600));
        load_from_disk(&restored);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.hits(), 1);
        assert_eq!(restored.misses(), 1);

        let entry = restored.lookup("k1").unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, b"body-1");
        assert_eq!(entry.request_url, "http://h/1");
    }

    #[test]
    fn test_save_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gob");

        let cache = cache_at(path.clone(), Duration::from_secs(3600));
        cache.store("k".to_string(), 200, &HeaderMap::new(), vec![1], "http://h/x");
        save_to_disk(&cache).unwrap();
        assert!(path.exists());

        // Expire everything: a zero-TTL store makes the only entry stale.
        let stale = cache_at(path.clone(), Duration::ZERO);
        stale.store("k".to_string(), 200, &HeaderMap::new(), vec![1], "http://h/x");
        save_to_disk(&stale).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_save_skips_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gob");

        let cache = cache_at(path.clone(), Duration::ZERO);
        cache.store("stale".to_string(), 200, &HeaderMap::new(), vec![], "http://h/x");
        save_to_disk(&cache).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(dir.path().join("absent.gob"), Duration::from_secs(60));
        load_from_disk(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gob");
        std::fs::write(&path, b"garbage, not gzip at all").unwrap();

        let cache = cache_at(path.clone(), Duration::from_secs(60));
        load_from_disk(&cache);
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);

        // Valid gzip wrapping invalid JSON must also be rejected cleanly.
        std::fs::write(&path, gzip_compress(b"{ not json").unwrap()).unwrap();
        load_from_disk(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gob");

        let cache = cache_at(path.clone(), Duration::from_secs(3600));
        cache.store("k".to_string(), 200, &HeaderMap::new(), vec![1], "http://h/x");
        save_to_disk(&cache).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
