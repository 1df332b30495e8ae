//! # Last-Known-Good Cache
//!
//! Key/value store of the most recent successful result per task, with a
//! time-to-live freshness window. Expired entries are evicted lazily on
//! read; there is no background sweep. [`CacheStore::get_with_age`] returns
//! the value regardless of freshness so degraded-mode consumers can keep
//! serving stale data while reporting its age.

use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// A single cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub metadata: Option<Value>,
}

impl CacheEntry {
    /// Fresh iff less than `ttl` has elapsed since the entry was stored.
    pub fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }

    /// Elapsed time since the entry was stored. Computable even when stale.
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// Process-wide store of last successful results.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result under `key` with the given freshness window.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration, metadata: Option<Value>) {
        let key = key.into();
        trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "💾 Cache write");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
                metadata,
            },
        );
    }

    /// Fetch a fresh value. Expired entries are removed and `None` returned.
    pub fn get(&self, key: &str) -> Option<Value> {
        let fresh = {
            let entry = self.entries.get(key)?;
            if entry.is_fresh() {
                Some(entry.value.clone())
            } else {
                None
            }
        };
        if fresh.is_none() {
            debug!(key = %key, "🧹 Cache entry expired, evicting");
            self.entries.remove(key);
        }
        fresh
    }

    /// Fetch the value, its age, and the TTL it was stored with, regardless
    /// of freshness.
    ///
    /// Used for graceful degradation, where a stale result is still better
    /// than nothing. Staleness is judged against the TTL the entry was
    /// stored with, not whatever the task is configured with now.
    pub fn get_with_age(&self, key: &str) -> Option<(Value, Duration, Duration)> {
        let entry = self.entries.get(key)?;
        Some((entry.value.clone(), entry.age(), entry.ttl))
    }

    /// Remove the entry for `key`. Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn fresh_value_round_trips() {
        let cache = CacheStore::new();
        cache.set("status", json!({"ok": true}), Duration::from_secs(60), None);

        assert_eq!(cache.get("status"), Some(json!({"ok": true})));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_evicted_on_read() {
        let cache = CacheStore::new();
        cache.set("status", json!(1), Duration::from_secs(10), None);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get("status"), None);
        // Lazy eviction removed the entry entirely.
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn age_is_reported_even_when_stale() {
        let cache = CacheStore::new();
        cache.set("status", json!("cached"), Duration::from_secs(5), None);

        tokio::time::advance(Duration::from_secs(30)).await;

        let (value, age, ttl) = cache.get_with_age("status").expect("entry retained");
        assert_eq!(value, json!("cached"));
        assert!(age >= Duration::from_secs(30));
        // The TTL reported is the one the entry was stored with.
        assert_eq!(ttl, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_clear() {
        let cache = CacheStore::new();
        cache.set("a", json!(1), Duration::from_secs(60), None);
        cache.set("b", json!(2), Duration::from_secs(60), None);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
