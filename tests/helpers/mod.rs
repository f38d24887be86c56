#![allow(dead_code)]

use async_trait::async_trait;
use catalog_store::catalog::api::{CatalogSource, DetailEndpoint};
use catalog_store::catalog::errors::CatalogApiError;
use catalog_store::catalog::models::{CatalogPage, PageRequest, PaginationInfo, UniversityRecord};
use catalog_store::store::clock::ManualClock;
use catalog_store::store::persist::{MemoryStorage, Persistence};
use catalog_store::store::{CatalogStore, StoreSettings};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Fixed "now" for scenario tests: 2026-01-01T00:00:00Z.
pub const NOW_MS: i64 = 1_767_225_600_000;
pub const MINUTE_MS: i64 = 60_000;

pub type PageResult = Result<CatalogPage, CatalogApiError>;
pub type DetailResult = Result<Option<UniversityRecord>, CatalogApiError>;

/// Scripted [`CatalogSource`] that counts every call it receives.
///
/// Page responses are popped from a queue; once the queue is empty the
/// default page is returned. Detail responses are looked up per endpoint.
#[derive(Default)]
pub struct MockSource {
    pages: Mutex<VecDeque<PageResult>>,
    default_page: Mutex<Option<CatalogPage>>,
    details: Mutex<Vec<(DetailEndpoint, DetailResult)>>,
    pub page_calls: AtomicUsize,
    pub detail_calls: Mutex<Vec<DetailEndpoint>>,
    pub requests: Mutex<Vec<PageRequest>>,
    gate: Option<Arc<Notify>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every page request waits for `gate.notify_one()` before answering.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn returning(self, page: CatalogPage) -> Self {
        *self.default_page.lock().unwrap() = Some(page);
        self
    }

    pub fn then(self, result: PageResult) -> Self {
        self.pages.lock().unwrap().push_back(result);
        self
    }

    pub fn detail(self, endpoint: DetailEndpoint, result: DetailResult) -> Self {
        self.details.lock().unwrap().push((endpoint, result));
        self
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> Vec<DetailEndpoint> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogSource for MockSource {
    async fn fetch_page(&self, request: &PageRequest) -> PageResult {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(next) = self.pages.lock().unwrap().pop_front() {
            return next;
        }
        Ok(self
            .default_page
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| page_of(&[])))
    }

    async fn fetch_detail(&self, endpoint: DetailEndpoint, _identifier: &str) -> DetailResult {
        self.detail_calls.lock().unwrap().push(endpoint);
        let mut details = self.details.lock().unwrap();
        match details.iter().position(|(e, _)| *e == endpoint) {
            Some(i) => details.remove(i).1,
            None => Err(CatalogApiError::NotFound),
        }
    }
}

pub fn page_of(ids: &[&str]) -> CatalogPage {
    CatalogPage {
        universities: ids.iter().map(|id| UniversityRecord::with_id(*id)).collect(),
        pagination: PaginationInfo {
            total: u32::try_from(ids.len()).unwrap(),
            ..PaginationInfo::default()
        }
        .normalized(),
    }
}

/// A store over `source` with a manual clock at [`NOW_MS`], persisting into `storage`.
pub fn store_with(
    source: Arc<MockSource>,
    storage: Arc<MemoryStorage>,
) -> (CatalogStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at(NOW_MS));
    let store = CatalogStore::with_clock(
        source,
        Persistence::new(Box::new(storage)),
        StoreSettings::default(),
        clock.clone(),
    );
    (store, clock)
}

pub fn store(source: Arc<MockSource>) -> (CatalogStore, Arc<ManualClock>) {
    store_with(source, Arc::new(MemoryStorage::new()))
}
