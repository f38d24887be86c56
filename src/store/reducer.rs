//! Live view state and the pure transitions that produce it.
//!
//! Every change to [`StoreState`] goes through [`reduce`], so the state
//! machine can be exercised without a runtime, a network or a clock.

use crate::catalog::models::{FilterSet, PaginationInfo, UniversityRecord};
use std::sync::Arc;

/// Suffix appended to the error when stale data is shown after a failure.
pub const CACHED_RESULTS_NOTICE: &str = "Showing cached results.";

/// Why a listing fetch is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingMode {
    /// Nothing is displayed yet.
    Initial,
    /// Results are displayed and a different page is loading.
    Page,
    /// Explicit refresh of what is displayed.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    pub universities: Vec<UniversityRecord>,
    pub pagination: PaginationInfo,
    pub loading: Option<LoadingMode>,
    pub error: Option<String>,
    /// The displayed list came from cache after a failed refresh.
    pub showing_cached: bool,
    pub search_query: String,
    pub filters: FilterSet,
    pub page: u32,
    pub hydrated: bool,
    pub selected: Option<Arc<UniversityRecord>>,
    pub detail_loading: bool,
    pub detail_error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            universities: Vec::new(),
            pagination: PaginationInfo::default(),
            loading: None,
            error: None,
            showing_cached: false,
            search_query: String::new(),
            filters: FilterSet::default(),
            page: 1,
            hydrated: false,
            selected: None,
            detail_loading: false,
            detail_error: None,
        }
    }
}

impl StoreState {
    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    Hydrated {
        search_query: String,
        filters: FilterSet,
        page: u32,
    },
    SetSearchQuery(String),
    SetFilters(FilterSet),
    SetPage(u32),
    SetHydrated(bool),
    CacheHit {
        data: Vec<UniversityRecord>,
        pagination: PaginationInfo,
    },
    FetchStarted(LoadingMode),
    FetchSucceeded {
        data: Vec<UniversityRecord>,
        pagination: PaginationInfo,
    },
    /// The API answered "nothing here" (404/401).
    FetchAbsent,
    FetchFailed {
        message: String,
    },
    FetchFellBack {
        data: Vec<UniversityRecord>,
        pagination: PaginationInfo,
        message: String,
    },
    DetailStarted,
    DetailResolved(Option<Arc<UniversityRecord>>),
    DetailFailed {
        message: String,
    },
    RecordPatched(Arc<UniversityRecord>),
    RecordRemoved(String),
    CacheCleared,
}

pub fn reduce(mut state: StoreState, event: StoreEvent) -> StoreState {
    match event {
        StoreEvent::Hydrated {
            search_query,
            filters,
            page,
        } => {
            state.search_query = search_query;
            state.filters = filters;
            state.page = page.max(1);
            state.hydrated = true;
        }
        StoreEvent::SetSearchQuery(query) => state.search_query = query,
        StoreEvent::SetFilters(filters) => state.filters = filters,
        StoreEvent::SetPage(page) => state.page = page.max(1),
        StoreEvent::SetHydrated(hydrated) => state.hydrated = hydrated,
        StoreEvent::CacheHit { data, pagination } => {
            state.universities = data;
            state.pagination = pagination;
            state.loading = None;
            state.error = None;
            state.showing_cached = false;
        }
        StoreEvent::FetchStarted(mode) => {
            state.loading = Some(mode);
            state.error = None;
        }
        StoreEvent::FetchSucceeded { data, pagination } => {
            state.universities = data;
            state.pagination = pagination;
            state.loading = None;
            state.error = None;
            state.showing_cached = false;
        }
        StoreEvent::FetchAbsent => {
            state.universities = Vec::new();
            state.pagination = PaginationInfo::default();
            state.loading = None;
            state.error = None;
            state.showing_cached = false;
        }
        StoreEvent::FetchFailed { message } => {
            state.universities = Vec::new();
            state.pagination = PaginationInfo::default();
            state.loading = None;
            state.error = Some(message);
            state.showing_cached = false;
        }
        StoreEvent::FetchFellBack {
            data,
            pagination,
            message,
        } => {
            state.universities = data;
            state.pagination = pagination;
            state.loading = None;
            state.error = Some(format!("{message} {CACHED_RESULTS_NOTICE}"));
            state.showing_cached = true;
        }
        StoreEvent::DetailStarted => {
            state.detail_loading = true;
            state.detail_error = None;
        }
        StoreEvent::DetailResolved(record) => {
            state.selected = record;
            state.detail_loading = false;
            state.detail_error = None;
        }
        StoreEvent::DetailFailed { message } => {
            state.selected = None;
            state.detail_loading = false;
            state.detail_error = Some(message);
        }
        StoreEvent::RecordPatched(record) => {
            for slot in state.universities.iter_mut().filter(|r| r.id == record.id) {
                *slot = (*record).clone();
            }
            if state.selected.as_ref().is_some_and(|s| s.id == record.id) {
                state.selected = Some(record);
            }
        }
        StoreEvent::RecordRemoved(id) => {
            let before = state.universities.len();
            state.universities.retain(|r| r.id != id);
            let removed = u32::try_from(before - state.universities.len()).unwrap_or(u32::MAX);
            state.pagination = PaginationInfo {
                total: state.pagination.total.saturating_sub(removed),
                ..state.pagination
            }
            .normalized();
            if state.selected.as_ref().is_some_and(|s| s.id == id) {
                state.selected = None;
            }
        }
        StoreEvent::CacheCleared => {
            state.universities = Vec::new();
            state.pagination = PaginationInfo::default();
            state.selected = None;
            state.showing_cached = false;
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(ids: &[&str]) -> Vec<UniversityRecord> {
        ids.iter().map(|id| UniversityRecord::with_id(*id)).collect()
    }

    #[test]
    fn fetch_lifecycle() {
        let state = reduce(StoreState::default(), StoreEvent::FetchStarted(LoadingMode::Initial));
        assert_eq!(state.loading, Some(LoadingMode::Initial));

        let state = reduce(
            state,
            StoreEvent::FetchSucceeded {
                data: page_of(&["u1", "u2"]),
                pagination: PaginationInfo::default(),
            },
        );
        assert!(!state.is_loading());
        assert_eq!(state.universities.len(), 2);
        assert!(state.error.is_none());
    }

    #[test]
    fn failure_without_cache_empties_the_list() {
        let state = StoreState {
            universities: page_of(&["u1"]),
            loading: Some(LoadingMode::Refresh),
            ..Default::default()
        };
        let state = reduce(
            state,
            StoreEvent::FetchFailed {
                message: "Server error.".into(),
            },
        );
        assert!(state.universities.is_empty());
        assert_eq!(state.error.as_deref(), Some("Server error."));
        assert!(!state.showing_cached);
        assert!(!state.is_loading());
    }

    #[test]
    fn fallback_annotates_error() {
        let state = reduce(
            StoreState::default(),
            StoreEvent::FetchFellBack {
                data: page_of(&["u1"]),
                pagination: PaginationInfo::default(),
                message: "Request timed out.".into(),
            },
        );
        assert_eq!(state.universities[0].id, "u1");
        assert!(state.showing_cached);
        assert!(state.error.unwrap().contains(CACHED_RESULTS_NOTICE));
    }

    #[test]
    fn removal_adjusts_pagination() {
        let state = StoreState {
            universities: page_of(&["u1", "u2"]),
            pagination: PaginationInfo {
                total: 10,
                pages: 2,
                page: 1,
                limit: 9,
            },
            ..Default::default()
        };
        let state = reduce(state, StoreEvent::RecordRemoved("u1".into()));
        assert_eq!(state.universities.len(), 1);
        assert_eq!(state.pagination.total, 9);
        assert_eq!(state.pagination.pages, 1);
    }

    #[test]
    fn patch_replaces_selected_record() {
        let selected = Arc::new(UniversityRecord::with_id("u1").named("Old"));
        let state = StoreState {
            universities: page_of(&["u1"]),
            selected: Some(selected),
            ..Default::default()
        };
        let patched = Arc::new(UniversityRecord::with_id("u1").named("New"));
        let state = reduce(state, StoreEvent::RecordPatched(patched));
        assert_eq!(state.universities[0].name.as_deref(), Some("New"));
        assert_eq!(state.selected.unwrap().name.as_deref(), Some("New"));
    }

    #[test]
    fn setters_clamp_page() {
        let state = reduce(StoreState::default(), StoreEvent::SetPage(0));
        assert_eq!(state.page, 1);
        let state = reduce(state, StoreEvent::SetHydrated(true));
        assert!(state.hydrated);
    }
}
