//! In-flight request tracking and per-key refetch cooldown.
//!
//! A key is claimed before its network call starts and released by dropping
//! the returned [`InflightGuard`], so the release happens exactly once on
//! success, error, panic or cancellation alike.

use crate::store::clock::Clock;
use crate::store::key::CacheKey;
use crate::utils::age;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct RequestTracker {
    inflight: Arc<DashSet<CacheKey>>,
    /// key → completion time (ms) of its last successful fetch.
    last_success: DashMap<CacheKey, i64>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestTracker {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inflight: Arc::new(DashSet::new()),
            last_success: DashMap::new(),
            cooldown,
            clock,
        }
    }

    /// Whether a network request for `key` may be issued now.
    pub fn should_fetch(&self, key: &CacheKey, force_refresh: bool) -> bool {
        if self.inflight.contains(key) {
            trace!(key = %key, "Request already in flight");
            return false;
        }
        if !force_refresh && self.in_cooldown(key) {
            trace!(key = %key, "Request suppressed by cooldown");
            return false;
        }
        true
    }

    fn in_cooldown(&self, key: &CacheKey) -> bool {
        self.last_success
            .get(key)
            .is_some_and(|at| age(self.clock.now_ms(), *at) < self.cooldown)
    }

    /// Claim `key`. Returns `None` if another caller already holds it.
    pub fn begin(&self, key: CacheKey) -> Option<InflightGuard> {
        if !self.inflight.insert(key.clone()) {
            return None;
        }
        Some(InflightGuard {
            key,
            inflight: Arc::clone(&self.inflight),
        })
    }

    pub fn is_inflight(&self, key: &CacheKey) -> bool {
        self.inflight.contains(key)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn record_success(&self, key: CacheKey) {
        self.last_success.insert(key, self.clock.now_ms());
    }

    /// Restore a persisted completion time.
    pub fn restore_success(&self, key: CacheKey, at_ms: i64) {
        self.last_success.insert(key, at_ms);
    }

    /// Up to `limit` completion records, most recent first.
    pub fn most_recent_successes(&self, limit: usize) -> Vec<(CacheKey, i64)> {
        let mut all: Vec<_> = self
            .last_success
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(limit);
        all
    }

    pub fn clear_history(&self) {
        self.last_success.clear();
    }
}

/// Holds a key in the in-flight set until dropped.
#[must_use = "dropping the guard releases the in-flight key immediately"]
pub struct InflightGuard {
    key: CacheKey,
    inflight: Arc<DashSet<CacheKey>>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
        trace!(key = %self.key, "In-flight slot released");
    }
}
