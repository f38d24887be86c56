//! TTL map of catalog pages, keyed by [`CacheKey`].
//!
//! Expiry is lazy: a read that finds an entry older than the TTL removes it and
//! reports a miss. [`TtlCache::sweep_expired`] is the only eager path and runs
//! on rehydration.

use crate::catalog::models::{FilterSet, PaginationInfo, UniversityRecord};
use crate::store::clock::Clock;
use crate::store::key::CacheKey;
use crate::utils::age;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One cached catalog page. Never mutated after insertion; a newer fetch
/// replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCacheEntry {
    pub data: Vec<UniversityRecord>,
    pub pagination: PaginationInfo,
    /// Milliseconds since the Unix epoch at insertion.
    pub timestamp: i64,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub filters: FilterSet,
}

/// Result of a lookup that wants to know *why* it missed.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(Arc<CatalogCacheEntry>),
    /// The entry was too old and has been evicted; it is handed back so the
    /// caller can still use it as a stale fallback.
    Expired(Arc<CatalogCacheEntry>),
    Missing,
}

pub struct TtlCache {
    entries: DashMap<CacheKey, Arc<CatalogCacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_fresh(&self, entry: &CatalogCacheEntry, now_ms: i64) -> bool {
        age(now_ms, entry.timestamp) <= self.ttl
    }

    /// Return the entry if it is still within the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CatalogCacheEntry>> {
        match self.lookup(key) {
            Lookup::Fresh(entry) => Some(entry),
            Lookup::Expired(_) | Lookup::Missing => None,
        }
    }

    /// Like [`get`](Self::get), but hands back an expired entry after evicting it.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = self.clock.now_ms();
        // Clone out of the shard guard before any removal on the same key.
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) else {
            return Lookup::Missing;
        };

        if self.is_fresh(&entry, now) {
            return Lookup::Fresh(entry);
        }

        self.entries.remove_if(key, |_, e| !self.is_fresh(e, now));
        debug!(key = %key, age = ?age(now, entry.timestamp), "Evicted expired cache entry");
        Lookup::Expired(entry)
    }

    /// Read an entry regardless of age, without evicting it. Only the stale
    /// fallback after a failed fetch uses this.
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<Arc<CatalogCacheEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Insert or overwrite, stamping the entry with the current time.
    pub fn set(&self, key: CacheKey, mut entry: CatalogCacheEntry) -> Arc<CatalogCacheEntry> {
        entry.timestamp = self.clock.now_ms();
        let entry = Arc::new(entry);
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }

    /// Insert an entry keeping its own timestamp (rehydration, optimistic patches).
    pub fn restore(&self, key: CacheKey, entry: CatalogCacheEntry) {
        self.entries.insert(key, Arc::new(entry));
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut swept = 0;
        self.entries.retain(|_, entry| {
            let fresh = self.is_fresh(entry, now);
            if !fresh {
                swept += 1;
            }
            fresh
        });
        swept
    }

    /// Up to `limit` entries, newest timestamp first. Expired entries are included.
    pub fn most_recent(&self, limit: usize) -> Vec<(CacheKey, Arc<CatalogCacheEntry>)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        all.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then_with(|| a.0.cmp(&b.0)));
        all.truncate(limit);
        all
    }

    /// Rewrite entries in place; `f` returns `Some(replacement)` for entries it changes.
    /// Replacements keep whatever timestamp `f` gives them.
    pub fn patch_all(&self, mut f: impl FnMut(&CatalogCacheEntry) -> Option<CatalogCacheEntry>) -> usize {
        let mut patched = 0;
        for mut slot in self.entries.iter_mut() {
            if let Some(next) = f(slot.value()) {
                *slot.value_mut() = Arc::new(next);
                patched += 1;
            }
        }
        patched
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::ManualClock;

    const MINUTE: i64 = 60_000;

    fn entry(id: &str) -> CatalogCacheEntry {
        CatalogCacheEntry {
            data: vec![UniversityRecord::with_id(id)],
            pagination: PaginationInfo::default(),
            timestamp: 0,
            search_query: String::new(),
            filters: FilterSet::default(),
        }
    }

    fn cache(clock: &Arc<ManualClock>) -> TtlCache {
        TtlCache::new(Duration::from_secs(30 * 60), clock.clone())
    }

    #[test]
    fn set_stamps_current_time() {
        let clock = Arc::new(ManualClock::at(5 * MINUTE));
        let cache = cache(&clock);
        let stored = cache.set("k".into(), entry("u1"));
        assert_eq!(stored.timestamp, 5 * MINUTE);
    }

    #[test]
    fn entry_at_exact_ttl_is_still_fresh() {
        let clock = Arc::new(ManualClock::at(0));
        let cache = cache(&clock);
        cache.set("k".into(), entry("u1"));

        clock.set_ms(30 * MINUTE);
        assert!(cache.get(&"k".into()).is_some());

        clock.advance_ms(1);
        assert!(cache.get(&"k".into()).is_none());
        assert!(cache.is_empty(), "expired read must evict");
    }

    #[test]
    fn lookup_returns_evicted_entry() {
        let clock = Arc::new(ManualClock::at(0));
        let cache = cache(&clock);
        cache.set("k".into(), entry("u1"));
        clock.set_ms(31 * MINUTE);

        match cache.lookup(&"k".into()) {
            Lookup::Expired(e) => assert_eq!(e.data[0].id, "u1"),
            other => panic!("expected Expired, got {other:?}"),
        }
        assert!(matches!(cache.lookup(&"k".into()), Lookup::Missing));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let clock = Arc::new(ManualClock::at(100 * MINUTE));
        let cache = cache(&clock);
        cache.restore("old".into(), CatalogCacheEntry { timestamp: 60 * MINUTE, ..entry("a") });
        cache.restore("new".into(), CatalogCacheEntry { timestamp: 90 * MINUTE, ..entry("b") });

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"new".into()).is_some());
    }

    #[test]
    fn sweep_count_ignores_concurrent_inserts() {
        let clock = Arc::new(ManualClock::at(100 * MINUTE));
        let cache = cache(&clock);
        for i in 0..200 {
            cache.restore(
                format!("old{i}").as_str().into(),
                CatalogCacheEntry { timestamp: 0, ..entry("a") },
            );
        }

        let swept = std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    cache.set(format!("new{i}").as_str().into(), entry("b"));
                }
            });
            cache.sweep_expired()
        });

        assert_eq!(swept, 200);
        assert_eq!(cache.len(), 200);
    }

    #[test]
    fn most_recent_orders_by_timestamp() {
        let clock = Arc::new(ManualClock::at(0));
        let cache = cache(&clock);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.restore((*key).into(), CatalogCacheEntry { timestamp: i as i64, ..entry(key) });
        }
        let keys: Vec<_> = cache
            .most_recent(2)
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["d", "c"]);
    }
}
