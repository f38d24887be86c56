//! Durable snapshot of the store under a single storage key.
//!
//! Only a bounded subset is written: the newest listing pages, the most
//! recently written detail records and the newest fetch-completion times.
//! Reads never fail: unavailable or corrupt storage yields an empty state.
//! A failed write switches the adapter to an in-memory map for the rest
//! of the process.

use crate::catalog::models::{FilterSet, UniversityRecord};
use crate::store::key::CacheKey;
use crate::store::ttl::CatalogCacheEntry;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const STORAGE_KEY: &str = "university-store";
pub const SCHEMA_VERSION: u32 = 2;

/// Serialized snapshots above this many characters are cut down to [`Limits::REDUCED`].
pub const MAX_PERSISTED_CHARS: usize = 4_000_000;

/// How many of each kind of record a snapshot keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub cache_entries: usize,
    pub details: usize,
    pub fetch_times: usize,
}

impl Limits {
    pub const STANDARD: Limits = Limits {
        cache_entries: 10,
        details: 20,
        fetch_times: 10,
    };
    pub const REDUCED: Limits = Limits {
        cache_entries: 3,
        details: 5,
        fetch_times: 3,
    };
}

/// The persisted subset of the store. Maps are ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub cache: IndexMap<CacheKey, CatalogCacheEntry>,
    pub university_details: IndexMap<String, UniversityRecord>,
    pub current_filters: FilterSet,
    pub current_search_query: String,
    pub current_page: u32,
    pub last_successful_fetch: IndexMap<CacheKey, i64>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            cache: IndexMap::new(),
            university_details: IndexMap::new(),
            current_filters: FilterSet::default(),
            current_search_query: String::new(),
            current_page: 1,
            last_successful_fetch: IndexMap::new(),
        }
    }
}

impl PersistedState {
    /// Keep only the first `limits` records of each map.
    pub fn truncated(&self, limits: Limits) -> Self {
        Self {
            cache: first_n(&self.cache, limits.cache_entries),
            university_details: first_n(&self.university_details, limits.details),
            current_filters: self.current_filters.clone(),
            current_search_query: self.current_search_query.clone(),
            current_page: self.current_page,
            last_successful_fetch: first_n(&self.last_successful_fetch, limits.fetch_times),
        }
    }

    /// Serialize inside the versioned envelope.
    pub fn encode(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            version: u32,
            state: &'a PersistedState,
        }
        serde_json::to_string(&Envelope {
            version: SCHEMA_VERSION,
            state: self,
        })
    }

    /// Parse a stored snapshot of any schema version.
    ///
    /// The current version is decoded strictly first; anything else (older
    /// layouts, future versions, partially corrupt state) is coerced field by
    /// field, dropping what cannot be understood.
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        let root: Value = serde_json::from_str(raw)?;
        let version = root.get("version").and_then(Value::as_u64);
        // Version 0 stored the fields at the top level without an envelope.
        let state = match root.get("state") {
            Some(state @ Value::Object(_)) => state,
            _ => &root,
        };

        if version == Some(u64::from(SCHEMA_VERSION))
            && let Ok(parsed) = Self::deserialize(state)
        {
            return Ok(parsed);
        }

        debug!(?version, "Migrating persisted store state");
        Ok(Self::coerce(state))
    }

    fn coerce(state: &Value) -> Self {
        let cache = object_entries(state.get("cache"))
            .filter_map(|(k, v)| {
                CatalogCacheEntry::deserialize(v)
                    .ok()
                    .map(|e| (CacheKey::from(k), e))
            })
            .collect();

        // Version 1 stored details as an array of records.
        let university_details = match state.get("universityDetails") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| UniversityRecord::deserialize(v).ok())
                .map(|r| (r.id.clone(), r))
                .collect(),
            other => object_entries(other)
                .filter_map(|(_, v)| UniversityRecord::deserialize(v).ok())
                .map(|r| (r.id.clone(), r))
                .collect(),
        };

        let current_filters = state
            .get("currentFilters")
            .and_then(|v| FilterSet::deserialize(v).ok())
            .unwrap_or_default();
        let current_search_query = state
            .get("currentSearchQuery")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let current_page = state
            .get("currentPage")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(1)
            .max(1);
        let last_successful_fetch = object_entries(state.get("lastSuccessfulFetch"))
            .filter_map(|(k, v)| v.as_i64().map(|at| (CacheKey::from(k), at)))
            .collect();

        Self {
            cache,
            university_details,
            current_filters,
            current_search_query,
            current_page,
            last_successful_fetch,
        }
    }
}

fn first_n<K: Clone + std::hash::Hash + Eq, V: Clone>(
    map: &IndexMap<K, V>,
    n: usize,
) -> IndexMap<K, V> {
    map.iter()
        .take(n)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn object_entries(value: Option<&Value>) -> impl Iterator<Item = (&str, &Value)> {
    value
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|map| map.iter().map(|(k, v)| (k.as_str(), v)))
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store state")]
    Serialize(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String key-value storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// One JSON file per key inside a directory.
///
/// I/O is synchronous. Snapshots are capped at a few megabytes and written
/// once per completed fetch, so callers on the runtime write inline rather
/// than hopping to a blocking thread and racing older snapshots against newer ones.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        // Write-then-rename so a crash never leaves a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }
}

/// What a successful [`Persistence::save`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub chars: usize,
    pub reduced: bool,
}

pub struct Persistence {
    primary: Box<dyn Storage>,
    fallback: MemoryStorage,
    degraded: AtomicBool,
    size_limit: usize,
}

impl Persistence {
    pub fn new(primary: Box<dyn Storage>) -> Self {
        Self {
            primary,
            fallback: MemoryStorage::new(),
            degraded: AtomicBool::new(false),
            size_limit: MAX_PERSISTED_CHARS,
        }
    }

    /// Purely in-memory persistence (nothing survives the process).
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn with_size_limit(mut self, chars: usize) -> Self {
        self.size_limit = chars;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn active(&self) -> &dyn Storage {
        if self.is_degraded() {
            &self.fallback
        } else {
            self.primary.as_ref()
        }
    }

    fn degrade(&self, error: &StorageError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(error = ?error, "Persistent storage failed, continuing with in-memory storage");
        }
    }

    /// Write `state`, which the caller has already capped at [`Limits::STANDARD`].
    pub fn save(&self, state: &PersistedState) -> Result<SaveReport, StorageError> {
        let mut encoded = state.encode()?;
        let mut chars = encoded.chars().count();
        let mut reduced = false;
        if chars > self.size_limit {
            let before = chars;
            encoded = state.truncated(Limits::REDUCED).encode()?;
            chars = encoded.chars().count();
            reduced = true;
            info!(
                before_chars = before,
                after_chars = chars,
                "Persisted store state too large, keeping only the newest records"
            );
        }

        if let Err(e) = self.active().set(STORAGE_KEY, &encoded) {
            self.degrade(&e);
            return Err(e);
        }
        Ok(SaveReport {
            chars,
            reduced,
        })
    }

    /// Read the stored snapshot. Never fails.
    pub fn load(&self) -> PersistedState {
        let raw = match self.active().get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return PersistedState::default(),
            Err(e) => {
                self.degrade(&e);
                return PersistedState::default();
            }
        };

        PersistedState::decode(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Persisted store state is corrupt, starting empty");
            PersistedState::default()
        })
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.active().remove(STORAGE_KEY)
    }
}
