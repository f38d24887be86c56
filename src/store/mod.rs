//! Client-side cache store for the university catalog.
//!
//! [`CatalogStore`] owns the listing cache, the detail cache, the in-flight
//! tracker and the persistence adapter, and is the only thing that mutates
//! them. The live view is published through a `watch` channel and changed
//! exclusively via [`reducer::reduce`].

pub mod clock;
pub mod details;
pub mod key;
pub mod persist;
pub mod reducer;
pub mod requests;
pub mod ttl;

use crate::catalog::api::{CatalogSource, DetailEndpoint};
use crate::catalog::errors::CatalogApiError;
use crate::catalog::models::{CatalogPage, FilterSet, PageRequest, UniversityRecord};
use crate::config::Config;
use crate::utils::{fmt_duration, log_if_slow};
use clock::{Clock, SystemClock};
use details::DetailCache;
use key::{CacheKey, build_key, clamp_page};
use persist::{Limits, PersistedState, Persistence};
use reducer::{LoadingMode, StoreEvent, StoreState, reduce};
use requests::RequestTracker;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, trace, warn};
use ttl::{CatalogCacheEntry, Lookup, TtlCache};

const SLOW_FETCH: Duration = Duration::from_secs(5);

/// Tunables for the store. Defaults: 30 min TTL, 3 s cooldown, 15 s timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub cache_ttl: Duration,
    pub fetch_cooldown: Duration,
    pub request_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 60),
            fetch_cooldown: Duration::from_millis(3000),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for StoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            fetch_cooldown: config.fetch_cooldown,
            request_timeout: config.request_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache lookup and the cooldown (never the in-flight check).
    pub force_refresh: bool,
    /// Do not publish a loading state while the request runs.
    pub silent: bool,
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            silent: false,
        }
    }
}

/// Where the result of a listing fetch goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Cache it and show it.
    View,
    /// Cache it only (prefetch).
    CacheOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub listings: usize,
    pub details: usize,
    pub inflight: usize,
    pub persistence_degraded: bool,
}

pub struct CatalogStore {
    source: Arc<dyn CatalogSource>,
    settings: StoreSettings,
    listings: TtlCache,
    details: DetailCache,
    requests: RequestTracker,
    persistence: Persistence,
    state: watch::Sender<StoreState>,
}

impl CatalogStore {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        persistence: Persistence,
        settings: StoreSettings,
    ) -> Self {
        Self::with_clock(source, persistence, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn CatalogSource>,
        persistence: Persistence,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            source,
            settings,
            listings: TtlCache::new(settings.cache_ttl, Arc::clone(&clock)),
            details: DetailCache::new(),
            requests: RequestTracker::new(settings.fetch_cooldown, clock),
            persistence,
            state,
        }
    }

    /// Restore persisted state, drop whatever has expired since, and mark the
    /// store hydrated. Returns the number of live listing pages afterwards.
    pub fn init(&self) -> usize {
        let persisted = self.persistence.load();
        let restored = persisted.cache.len();
        let details = persisted.university_details.len();

        // Persisted newest first; replay oldest first so write order is preserved.
        for (_, record) in persisted.university_details.into_iter().rev() {
            self.details.upsert(record);
        }
        for (key, entry) in persisted.cache {
            self.listings.restore(key, entry);
        }
        for (key, at) in persisted.last_successful_fetch {
            self.requests.restore_success(key, at);
        }
        let swept = self.listings.sweep_expired();

        self.dispatch(StoreEvent::Hydrated {
            search_query: persisted.current_search_query,
            filters: persisted.current_filters,
            page: persisted.current_page,
        });

        let live = self.listings.len();
        info!(restored, swept, live, details, "Catalog store hydrated");
        live
    }

    /// Flush state to storage before shutdown.
    pub fn teardown(&self) {
        self.persist();
        debug!("Catalog store torn down");
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        self.dispatch(StoreEvent::SetSearchQuery(query.into()));
    }

    pub fn set_filters(&self, filters: FilterSet) {
        self.dispatch(StoreEvent::SetFilters(filters));
    }

    pub fn set_page(&self, page: i64) {
        self.dispatch(StoreEvent::SetPage(clamp_page(page)));
    }

    pub fn set_hydrated(&self, hydrated: bool) {
        self.dispatch(StoreEvent::SetHydrated(hydrated));
    }

    /// Load one catalog page into the live view, from cache when possible.
    ///
    /// Never returns an error: failures end up in [`StoreState::error`].
    pub async fn fetch_catalog(
        &self,
        query: &str,
        filters: &FilterSet,
        page: i64,
        options: FetchOptions,
    ) {
        self.fetch_listing(query, filters, page, options, Target::View)
            .await;
    }

    /// Warm the cache for the given pages without touching the live view.
    pub async fn prefetch_pages(&self, query: &str, filters: &FilterSet, pages: &[i64]) {
        let options = FetchOptions {
            force_refresh: false,
            silent: true,
        };
        futures::future::join_all(
            pages
                .iter()
                .map(|&page| self.fetch_listing(query, filters, page, options, Target::CacheOnly)),
        )
        .await;
    }

    async fn fetch_listing(
        &self,
        query: &str,
        filters: &FilterSet,
        page: i64,
        options: FetchOptions,
        target: Target,
    ) {
        let key = build_key(query, filters, page);
        let mut stale = None;

        if !options.force_refresh {
            match self.listings.lookup(&key) {
                Lookup::Fresh(entry) => {
                    debug!(key = %key, "Catalog cache hit");
                    if target == Target::View {
                        self.dispatch(StoreEvent::CacheHit {
                            data: entry.data.clone(),
                            pagination: entry.pagination,
                        });
                    }
                    return;
                }
                Lookup::Expired(entry) => {
                    debug!(key = %key, "Catalog cache entry expired");
                    stale = Some(entry);
                }
                Lookup::Missing => debug!(key = %key, "Catalog cache miss"),
            }
        }

        if !self.requests.should_fetch(&key, options.force_refresh) {
            return;
        }
        let Some(_guard) = self.requests.begin(key.clone()) else {
            trace!(key = %key, "Lost the race for the in-flight slot");
            return;
        };

        if target == Target::View && !options.silent {
            let mode = if options.force_refresh {
                LoadingMode::Refresh
            } else if self.state.borrow().universities.is_empty() {
                LoadingMode::Initial
            } else {
                LoadingMode::Page
            };
            self.dispatch(StoreEvent::FetchStarted(mode));
        }

        let request = PageRequest::new(query.trim(), filters.clone(), clamp_page(page));
        let start = Instant::now();
        let result = self.with_timeout(self.source.fetch_page(&request)).await;
        log_if_slow(start, SLOW_FETCH, "catalog page fetch");

        match result {
            Ok(page) => self.apply_page(key, &request, page, target, start.elapsed()),
            Err(e) if e.is_absent() => {
                if matches!(e, CatalogApiError::Unauthorized) {
                    warn!(key = %key, "Catalog API rejected the request as unauthorized");
                } else {
                    debug!(key = %key, "Catalog API has no data for this request");
                }
                if target == Target::View {
                    self.dispatch(StoreEvent::FetchAbsent);
                }
            }
            Err(e) => self.apply_failure(&key, e, stale, target),
        }
    }

    fn apply_page(
        &self,
        key: CacheKey,
        request: &PageRequest,
        page: CatalogPage,
        target: Target,
        elapsed: Duration,
    ) {
        let pagination = page.pagination.normalized();
        for record in &page.universities {
            self.details.upsert(record.clone());
        }
        let entry = self.listings.set(
            key.clone(),
            CatalogCacheEntry {
                data: page.universities,
                pagination,
                timestamp: 0,
                search_query: request.query.clone(),
                filters: request.filters.clone(),
            },
        );
        self.requests.record_success(key.clone());

        debug!(
            key = %key,
            count = entry.data.len(),
            total = pagination.total,
            duration = fmt_duration(elapsed),
            "Catalog page fetched"
        );

        if target == Target::View {
            self.dispatch(StoreEvent::FetchSucceeded {
                data: entry.data.clone(),
                pagination,
            });
        }
        self.persist();
    }

    fn apply_failure(
        &self,
        key: &CacheKey,
        e: CatalogApiError,
        stale: Option<Arc<CatalogCacheEntry>>,
        target: Target,
    ) {
        if target == Target::CacheOnly {
            debug!(key = %key, error = ?e, "Prefetch failed");
            return;
        }

        let message = e.user_message();
        let fallback = e
            .allows_stale_fallback()
            .then(|| stale.or_else(|| self.listings.peek(key)))
            .flatten();

        match fallback {
            Some(entry) => {
                warn!(key = %key, error = ?e, cached_at = entry.timestamp, "Fetch failed, serving cached results");
                // Put the page back for later retries; lookups still report it as expired.
                self.listings.restore(key.clone(), (*entry).clone());
                self.dispatch(StoreEvent::FetchFellBack {
                    data: entry.data.clone(),
                    pagination: entry.pagination,
                    message,
                });
            }
            None => {
                error!(key = %key, error = ?e, "Failed to fetch catalog page");
                self.dispatch(StoreEvent::FetchFailed { message });
            }
        }
    }

    /// Resolve a university by slug, id or name-derived slug.
    ///
    /// Local matches are returned without a request unless `force_refresh`.
    /// Otherwise each endpoint variant is tried in turn; the first usable
    /// record wins and individual failures only move on to the next variant.
    pub async fn fetch_detail_by_id(
        &self,
        identifier: &str,
        force_refresh: bool,
    ) -> Option<Arc<UniversityRecord>> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }

        if !force_refresh
            && let Some((record, rule)) = self.details.resolve_with_rule(identifier)
        {
            debug!(identifier, id = record.id, ?rule, "Detail cache hit");
            self.dispatch(StoreEvent::DetailResolved(Some(Arc::clone(&record))));
            return Some(record);
        }

        let Some(_guard) = self.requests.begin(CacheKey::detail(identifier)) else {
            trace!(identifier, "Detail request already in flight");
            return None;
        };
        self.dispatch(StoreEvent::DetailStarted);

        let mut last_error = None;
        for endpoint in DetailEndpoint::ORDER {
            let attempt = self
                .with_timeout(self.source.fetch_detail(endpoint, identifier))
                .await;
            match attempt {
                Ok(Some(record)) if record.is_well_formed() => {
                    let record = self.details.upsert(record);
                    debug!(identifier, id = record.id, endpoint = endpoint.as_str(), "Detail fetched");
                    self.dispatch(StoreEvent::DetailResolved(Some(Arc::clone(&record))));
                    self.persist();
                    return Some(record);
                }
                Ok(_) => {
                    trace!(identifier, endpoint = endpoint.as_str(), "Endpoint returned no record");
                }
                Err(e) if e.is_absent() => {
                    if matches!(e, CatalogApiError::Unauthorized) {
                        warn!(identifier, endpoint = endpoint.as_str(), "Detail request unauthorized");
                    }
                    trace!(identifier, endpoint = endpoint.as_str(), "Endpoint reported not found");
                }
                Err(e) => {
                    debug!(identifier, endpoint = endpoint.as_str(), error = ?e, "Detail attempt failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => {
                error!(identifier, error = ?e, "All detail endpoints failed");
                self.dispatch(StoreEvent::DetailFailed {
                    message: e.user_message(),
                });
            }
            None => {
                debug!(identifier, "University not found");
                self.dispatch(StoreEvent::DetailResolved(None));
            }
        }
        None
    }

    async fn with_timeout<T>(
        &self,
        request: impl Future<Output = Result<T, CatalogApiError>>,
    ) -> Result<T, CatalogApiError> {
        match time::timeout(self.settings.request_timeout, request).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CatalogApiError::TimedOut),
        }
    }

    /// Optimistically replace a university everywhere it is cached.
    pub fn update_university(&self, record: UniversityRecord) {
        let record = self.details.upsert(record);
        let patched = self.listings.patch_all(|entry| {
            entry.data.iter().any(|r| r.id == record.id).then(|| {
                let mut next = entry.clone();
                for slot in next.data.iter_mut().filter(|r| r.id == record.id) {
                    *slot = (*record).clone();
                }
                next
            })
        });
        debug!(id = record.id, patched, "Applied optimistic update");
        self.dispatch(StoreEvent::RecordPatched(record));
        self.persist();
    }

    /// Optimistically drop a university from every cache.
    pub fn remove_university(&self, id: &str) {
        self.details.remove(id);
        let patched = self.listings.patch_all(|entry| {
            entry.data.iter().any(|r| r.id == id).then(|| {
                let mut next = entry.clone();
                next.data.retain(|r| r.id != id);
                next.pagination.total = next.pagination.total.saturating_sub(1);
                next.pagination = next.pagination.normalized();
                next
            })
        });
        debug!(id, patched, "Applied optimistic removal");
        self.dispatch(StoreEvent::RecordRemoved(id.to_owned()));
        self.persist();
    }

    /// Drop every cached page, record and cooldown, including the persisted copy.
    pub fn clear_cache(&self) {
        self.listings.clear();
        self.details.clear();
        self.requests.clear_history();
        if let Err(e) = self.persistence.clear() {
            warn!(error = ?e, "Failed to clear persisted store state");
        }
        self.dispatch(StoreEvent::CacheCleared);
        info!("Catalog cache cleared");
    }

    /// Eagerly evict expired listing pages.
    pub fn sweep(&self) -> usize {
        let swept = self.listings.sweep_expired();
        if swept > 0 {
            debug!(swept, "Swept expired catalog pages");
            self.persist();
        }
        swept
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            listings: self.listings.len(),
            details: self.details.len(),
            inflight: self.requests.inflight_count(),
            persistence_degraded: self.persistence.is_degraded(),
        }
    }

    /// Look up a university locally without any request.
    pub fn cached_university(&self, identifier: &str) -> Option<Arc<UniversityRecord>> {
        self.details.resolve(identifier)
    }

    fn persisted_snapshot(&self) -> PersistedState {
        let limits = Limits::STANDARD;
        let state = self.state.borrow();
        PersistedState {
            cache: self
                .listings
                .most_recent(limits.cache_entries)
                .into_iter()
                .map(|(key, entry)| (key, (*entry).clone()))
                .collect(),
            university_details: self
                .details
                .most_recent(limits.details)
                .into_iter()
                .map(|record| (record.id.clone(), (*record).clone()))
                .collect(),
            current_filters: state.filters.clone(),
            current_search_query: state.search_query.clone(),
            current_page: state.page,
            last_successful_fetch: self
                .requests
                .most_recent_successes(limits.fetch_times)
                .into_iter()
                .collect(),
        }
    }

    /// Write the bounded snapshot. Failures are logged, never propagated.
    pub fn persist(&self) {
        let snapshot = self.persisted_snapshot();
        match self.persistence.save(&snapshot) {
            Ok(report) => trace!(chars = report.chars, reduced = report.reduced, "Store persisted"),
            Err(e) => debug!(error = ?e, "Store not persisted"),
        }
    }

    fn dispatch(&self, event: StoreEvent) {
        self.state.send_modify(|state| {
            let prev = std::mem::take(state);
            *state = reduce(prev, event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::PaginationInfo;
    use crate::store::clock::ManualClock;
    use crate::store::persist::{MemoryStorage, STORAGE_KEY, Storage};
    use async_trait::async_trait;

    struct NoNetwork;

    #[async_trait]
    impl CatalogSource for NoNetwork {
        async fn fetch_page(&self, _: &PageRequest) -> Result<CatalogPage, CatalogApiError> {
            Err(CatalogApiError::TimedOut)
        }

        async fn fetch_detail(
            &self,
            _: DetailEndpoint,
            _: &str,
        ) -> Result<Option<UniversityRecord>, CatalogApiError> {
            Ok(None)
        }
    }

    fn entry(id: &str) -> CatalogCacheEntry {
        CatalogCacheEntry {
            data: vec![UniversityRecord::with_id(id)],
            pagination: PaginationInfo::default(),
            timestamp: 0,
            search_query: String::new(),
            filters: FilterSet::default(),
        }
    }

    #[test]
    fn only_the_ten_newest_pages_are_persisted() {
        let clock = Arc::new(ManualClock::at(1_000_000));
        let storage = Arc::new(MemoryStorage::new());
        let store = CatalogStore::with_clock(
            Arc::new(NoNetwork),
            Persistence::new(Box::new(Arc::clone(&storage))),
            StoreSettings::default(),
            clock.clone(),
        );

        for i in 0..50 {
            store.listings.restore(
                CacheKey::from(format!("q:|f:|p:{}", i + 1).as_str()),
                CatalogCacheEntry {
                    timestamp: 1_000_000 - 1_000 * (50 - i),
                    ..entry(&format!("u{i}"))
                },
            );
        }
        store.persist();

        let raw = storage.get(STORAGE_KEY).unwrap().unwrap();
        let saved = PersistedState::decode(&raw).unwrap();
        assert_eq!(saved.cache.len(), 10);
        let mut pages: Vec<u32> = saved
            .cache
            .keys()
            .map(|k| k.as_str().rsplit(':').next().unwrap().parse().unwrap())
            .collect();
        pages.sort_unstable();
        assert_eq!(pages, (41..=50).collect::<Vec<_>>());
    }

    #[test]
    fn init_over_a_larger_live_cache_counts_what_survived() {
        let clock = Arc::new(ManualClock::at(1_000_000));
        let store = CatalogStore::with_clock(
            Arc::new(NoNetwork),
            Persistence::in_memory(),
            StoreSettings::default(),
            clock.clone(),
        );
        for page in 1..=11 {
            store
                .listings
                .set(build_key("", &FilterSet::default(), page), entry("u1"));
        }
        store.persist();

        clock.advance_ms(31 * 60_000);
        assert_eq!(store.init(), 0);
        assert_eq!(store.stats().listings, 0);
    }

    #[test]
    fn details_keep_write_order_across_restarts() {
        let storage = Arc::new(MemoryStorage::new());
        let make = || {
            CatalogStore::new(
                Arc::new(NoNetwork),
                Persistence::new(Box::new(Arc::clone(&storage))),
                StoreSettings::default(),
            )
        };

        let store = make();
        for i in 0..25 {
            store.details.upsert(UniversityRecord::with_id(format!("u{i}")));
        }
        store.teardown();

        let restored = make();
        restored.init();
        assert_eq!(restored.details.len(), 20);
        let newest: Vec<_> = restored
            .details
            .most_recent(2)
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(newest, vec!["u24", "u23"]);
        assert!(restored.snapshot().hydrated);
    }

    #[tokio::test]
    async fn optimistic_update_reaches_cached_pages() {
        let clock = Arc::new(ManualClock::at(0));
        let store = CatalogStore::with_clock(
            Arc::new(NoNetwork),
            Persistence::in_memory(),
            StoreSettings::default(),
            clock,
        );
        store.listings.set(build_key("", &FilterSet::default(), 1), entry("u1"));

        store.update_university(UniversityRecord::with_id("u1").named("Renamed"));
        store
            .fetch_catalog("", &FilterSet::default(), 1, FetchOptions::default())
            .await;
        assert_eq!(
            store.snapshot().universities[0].name.as_deref(),
            Some("Renamed")
        );
        assert_eq!(
            store.cached_university("renamed").map(|r| r.id.clone()),
            Some("u1".to_owned())
        );

        store.remove_university("u1");
        store
            .fetch_catalog("", &FilterSet::default(), 1, FetchOptions::default())
            .await;
        assert!(store.snapshot().universities.is_empty());
        assert!(store.cached_university("u1").is_none());
    }

    #[test]
    fn clear_cache_empties_everything() {
        let store = CatalogStore::new(
            Arc::new(NoNetwork),
            Persistence::in_memory(),
            StoreSettings::default(),
        );
        store.listings.set("k".into(), entry("u1"));
        store.details.upsert(UniversityRecord::with_id("u1"));
        store.clear_cache();

        let stats = store.stats();
        assert_eq!(stats.listings, 0);
        assert_eq!(stats.details, 0);
        assert!(!stats.persistence_degraded);
    }
}
