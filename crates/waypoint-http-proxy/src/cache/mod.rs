//! TTL response cache.
//!
//! Entries are keyed by a SHA-256 fingerprint over the method, the absolute
//! upstream URL and the values of the contributing headers. The store is a
//! concurrent map; hit/miss counters and the dirty flag for the persistence
//! worker are plain atomics, so the request path never takes a global lock.

pub mod persist;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Duration as TimeDelta, Utc};
use dashmap::DashMap;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    /// Deep copy of the response headers, one pair per value so multi-valued
    /// headers survive the round trip.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_url: String,
    pub fingerprint: String,
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: TimeDelta,
    key_headers: Vec<String>,
    url_patterns: Vec<Regex>,
    persist_file: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    modified: AtomicBool,
}

impl ResponseCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let ttl = TimeDelta::from_std(settings.ttl).unwrap_or_else(|_| TimeDelta::zero());
        let url_patterns = settings
            .url_patterns
            .iter()
            .filter_map(|pattern| match wildcard_to_regex(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "invalid cache URL pattern, skipping");
                    None
                }
            })
            .collect();

        Self {
            entries: DashMap::new(),
            ttl,
            key_headers: settings.key_headers.clone(),
            url_patterns,
            persist_file: settings.persist_file.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            modified: AtomicBool::new(false),
        }
    }

    /// SHA-256 over `method ‖ url ‖ header-name ":" header-value` for each
    /// contributing header that is present. `Authorization` and
    /// `Content-Type` always contribute; the rest come from configuration.
    pub fn fingerprint(&self, method: &Method, url: &str, headers: &HeaderMap) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(url.as_bytes());

        if let Some(value) = headers.get(AUTHORIZATION) {
            hasher.update(b"Authorization:");
            hasher.update(value.as_bytes());
        }
        if let Some(value) = headers.get(CONTENT_TYPE) {
            hasher.update(b"Content-Type:");
            hasher.update(value.as_bytes());
        }
        for name in &self.key_headers {
            if let Some(value) = headers.get(name.as_str()) {
                hasher.update(name.as_bytes());
                hasher.update(b":");
                hasher.update(value.as_bytes());
            }
        }

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// URL gating: with no configured patterns every URL is cacheable,
    /// otherwise the absolute URL must match at least one pattern.
    pub fn is_cacheable(&self, url: &str) -> bool {
        self.url_patterns.is_empty() || self.url_patterns.iter().any(|p| p.is_match(url))
    }

    /// Return the entry only while it is fresh; an expired entry is removed
    /// and reported as a miss. Counters are updated here so callers cannot
    /// get the accounting wrong.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let expired = match self.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => {
                if Utc::now() < entry.expires_at {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.clone());
                }
                true
            }
        };

        if expired {
            self.entries.remove(key);
            self.modified.store(true, Ordering::SeqCst);
            debug!(key, "expired cache entry removed");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn store(&self, key: String, status: u16, headers: &HeaderMap, body: Vec<u8>, url: &str) {
        let now = Utc::now();
        let entry = CacheEntry {
            status,
            headers: clone_headers(headers),
            body,
            cached_at: now,
            expires_at: now + self.ttl,
            request_url: url.to_string(),
            fingerprint: key.clone(),
        };
        debug!(key = %key, url, expires = %entry.expires_at.to_rfc3339(), "response cached");
        self.entries.insert(key, entry);
        self.modified.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::SeqCst)
    }

    pub fn persist_file(&self) -> &Path {
        &self.persist_file
    }

    /// Snapshot of the live (non-expired) entries for persistence.
    pub(crate) fn live_entries(&self) -> HashMap<String, CacheEntry> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|item| now < item.value().expires_at)
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect()
    }

    /// Rehydrate entries from a snapshot, skipping the expired ones. The
    /// persisted counters replace the in-memory ones only when at least one
    /// entry survived. Returns `(loaded, expired)`.
    pub(crate) fn restore(
        &self,
        entries: HashMap<String, CacheEntry>,
        hits: u64,
        misses: u64,
    ) -> (usize, usize) {
        let now = Utc::now();
        let mut loaded = 0usize;
        let mut expired = 0usize;
        for (key, entry) in entries {
            if now < entry.expires_at {
                self.entries.insert(key, entry);
                loaded += 1;
            } else {
                expired += 1;
            }
        }
        if loaded > 0 {
            self.hits.store(hits, Ordering::Relaxed);
            self.misses.store(misses, Ordering::Relaxed);
        }
        (loaded, expired)
    }
}

fn clone_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Translate a `*`-wildcard pattern into an anchored regular expression.
fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$"))
}
