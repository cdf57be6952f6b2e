//! Best-effort TTL cache for analysis results.
//!
//! DESIGN
//! ======
//! `HashMap<String, CacheEntry>` behind a mutex, keyed by a SHA-256
//! fingerprint of `(prompt, instrument_code, context)`. Market data is
//! deliberately left out of the key.
//!
//! Expiry is enforced on read: an entry with `now >= expires_at` is a miss
//! even if the sweep has not removed it yet. Losing the whole map is never
//! observable beyond a run of misses.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::backend::types::AnalysisResponse;

// =============================================================================
// FINGERPRINT
// =============================================================================

/// Deterministic cache key for a request.
///
/// Fields are JSON-encoded as a tuple before hashing so that field
/// boundaries can't collide (`("ab", "c")` vs `("a", "bc")`).
#[must_use]
pub fn cache_key(prompt: &str, instrument_code: Option<&str>, context: Option<&str>) -> String {
    let material = serde_json::json!([prompt, instrument_code, context]).to_string();
    let digest = Sha256::digest(material.as_bytes());
    let mut key = String::with_capacity(9 + digest.len() * 2);
    key.push_str("analysis:");
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: AnalysisResponse,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Clone, Default)]
pub struct ResultCache {
    inner: Arc<Mutex<CacheInner>>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<AnalysisResponse> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<AnalysisResponse> {
        let mut inner = self.lock();
        let value = inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        if value.is_some() {
            inner.hits += 1;
            debug!(key, "cache: hit");
        } else {
            inner.misses += 1;
            debug!(key, "cache: miss");
        }
        value
    }

    pub fn set(&self, key: &str, value: AnalysisResponse, ttl_minutes: u64) {
        self.set_with_ttl(key, value, Duration::from_secs(ttl_minutes.saturating_mul(60)));
    }

    pub fn set_with_ttl(&self, key: &str, value: AnalysisResponse, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    fn set_at(&self, key: &str, value: AnalysisResponse, ttl: Duration, now: Instant) {
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        let entry = CacheEntry { key: key.to_string(), value, expires_at };
        self.lock().entries.insert(key.to_string(), entry);
    }

    /// Remove one key. Returns whether anything was stored under it.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Sweep expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        before - inner.entries.len()
    }

    /// Drop every entry and zero the counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats { entries: inner.entries.len(), hits: inner.hits, misses: inner.misses }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
