//! Short-lived memo of query results keyed by rule and exact window.
//!
//! Avoids duplicate backend calls when the same window is evaluated more
//! than once. Strictly best-effort: a miss forces a fresh query, never an
//! error, and the cache is an optional capability ([`NoopCache`] when
//! absent).

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::trace;

use crate::reader::LabeledSeries;

/// Cache key: rule identity plus the exact evaluated window. Rule ids are
/// only unique within a tenant, so the tenant is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant: String,
    pub rule_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Best-effort result cache.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Vec<LabeledSeries>>;
    fn put(&self, key: CacheKey, series: Vec<LabeledSeries>, ttl: Duration);
}

/// Capability-absent cache: always misses, never stores.
#[derive(Debug, Default)]
pub struct NoopCache;

impl ResultCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> Option<Vec<LabeledSeries>> {
        None
    }

    fn put(&self, _key: CacheKey, _series: Vec<LabeledSeries>, _ttl: Duration) {}
}

struct Entry {
    series: Vec<LabeledSeries>,
    expires_at: Instant,
}

/// Capacity-bounded in-process cache with per-entry TTL.
///
/// LRU eviction bounds memory under many rules; expiry keeps an entry from
/// outliving the window's usefulness (TTL is the rule interval plus a small
/// margin, set by the caller).
pub struct QueryResultCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
}

impl QueryResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl ResultCache for QueryResultCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<LabeledSeries>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                trace!(rule_id = %key.rule_id, "result cache hit");
                Some(entry.series.clone())
            }
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: CacheKey, series: Vec<LabeledSeries>, ttl: Duration) {
        let entry = Entry {
            series,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .put(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Labels;

    fn key(rule_id: &str, start_secs: i64) -> CacheKey {
        key_in("acme", rule_id, start_secs)
    }

    fn key_in(tenant: &str, rule_id: &str, start_secs: i64) -> CacheKey {
        let start = DateTime::from_timestamp(start_secs, 0).unwrap();
        CacheKey {
            tenant: tenant.to_string(),
            rule_id: rule_id.to_string(),
            window_start: start,
            window_end: start + chrono::Duration::seconds(300),
        }
    }

    fn series(value: f64) -> Vec<LabeledSeries> {
        vec![LabeledSeries {
            labels: Labels::from_pairs([("host", "web-1")]),
            value,
        }]
    }

    #[test]
    fn hit_within_ttl() {
        let cache = QueryResultCache::new(8);
        cache.put(key("r1", 0), series(1.0), Duration::from_secs(60));
        assert_eq!(cache.get(&key("r1", 0)), Some(series(1.0)));
    }

    #[test]
    fn different_window_misses() {
        let cache = QueryResultCache::new(8);
        cache.put(key("r1", 0), series(1.0), Duration::from_secs(60));
        assert_eq!(cache.get(&key("r1", 60)), None);
        assert_eq!(cache.get(&key("r2", 0)), None);
        // Same id under another tenant is a different rule.
        assert_eq!(cache.get(&key_in("globex", "r1", 0)), None);
    }

    #[test]
    fn expired_entry_misses_and_evicts() {
        let cache = QueryResultCache::new(8);
        cache.put(key("r1", 0), series(1.0), Duration::ZERO);
        assert_eq!(cache.get(&key("r1", 0)), None);
        // Entry was dropped, not just skipped.
        assert_eq!(cache.entries.lock().unwrap().len(), 0);
    }

    #[test]
    fn capacity_bound_evicts_lru() {
        let cache = QueryResultCache::new(2);
        cache.put(key("r1", 0), series(1.0), Duration::from_secs(60));
        cache.put(key("r2", 0), series(2.0), Duration::from_secs(60));
        cache.put(key("r3", 0), series(3.0), Duration::from_secs(60));
        assert_eq!(cache.get(&key("r1", 0)), None);
        assert_eq!(cache.get(&key("r3", 0)), Some(series(3.0)));
    }

    #[test]
    fn noop_cache_never_stores() {
        let cache = NoopCache;
        cache.put(key("r1", 0), series(1.0), Duration::from_secs(60));
        assert_eq!(cache.get(&key("r1", 0)), None);
    }
}
