//! Shared in-memory result cache.
//!
//! Every provider round-trip in the engine (category browses, searches,
//! history reads, stream resolution) funnels through one [`ResultCache`]
//! keyed by a string request signature. Entries are time-boxed and the map
//! is capacity-bounded.
//!
//! Eviction is FIFO on insertion order, not LRU: a `get` never refreshes an
//! entry's position. Known quirk, kept deliberately.
//!
//! User-scoped entries must embed the user id verbatim in the key so that
//! [`ResultCache::invalidate_for_user`] can drop them by substring match;
//! global entries must never contain a user id. The substring rule is
//! fragile and therefore isolated behind this one method.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum number of entries before FIFO eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 1000;

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    /// Monotonic insertion sequence; the smallest live value is the
    /// eviction victim when at capacity.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Point-in-time cache statistics for introspection surfaces.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    #[serde(serialize_with = "secs")]
    pub ttl: Duration,
}

fn secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

/// Time-boxed, capacity-bounded key/value cache. Payloads are stored as
/// opaque JSON so one shared instance serves every caller; readers always
/// get a freshly deserialized copy, never a reference into the cache.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Look up a cached value. Expired entries and payloads that fail to
    /// deserialize both behave as plain misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.is_expired(self.ttl) {
            return None;
        }
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Corrupt cache payload for '{}', treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Insert or replace a value. Inserting a new key while at capacity
    /// evicts exactly one entry: the oldest-inserted one.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize cache payload for '{}': {}", key, e);
                return;
            }
        };

        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            if let Some(oldest_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, v)| v.seq)
                .map(|(k, _)| k.clone())
            {
                log::debug!("Cache at capacity, evicting oldest entry '{}'", oldest_key);
                inner.entries.remove(&oldest_key);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value: payload,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }

    /// Drop every entry whose key contains the user id as a substring.
    pub fn invalidate_for_user(&self, user_id: &str) {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !k.contains(user_id));
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            log::info!("Invalidated {} cache entries for user {}", dropped, user_id);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
        log::info!("Result cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock().entries.len(),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}
