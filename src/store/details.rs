//! Per-university records, fed by every catalog and detail fetch.

use crate::catalog::models::UniversityRecord;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// `id → record`, last write wins. Each write also bumps an insertion
/// sequence so persistence can keep the most recently written records.
#[derive(Default)]
pub struct DetailCache {
    records: DashMap<String, (u64, Arc<UniversityRecord>)>,
    seq: AtomicU64,
}

/// Which rule matched during [`DetailCache::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Slug,
    Id,
    NameSpaces,
    NameAlphanumeric,
    ReverseName,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: UniversityRecord) -> Arc<UniversityRecord> {
        let record = Arc::new(record);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.records
            .insert(record.id.clone(), (seq, Arc::clone(&record)));
        record
    }

    pub fn get(&self, id: &str) -> Option<Arc<UniversityRecord>> {
        self.records.get(id).map(|e| Arc::clone(&e.1))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<UniversityRecord>> {
        self.records.remove(id).map(|(_, (_, record))| record)
    }

    /// Resolve a human-facing identifier (usually a URL slug).
    ///
    /// Rules are tried in order across *all* records before moving on:
    /// exact slug, exact id, name with spaces as hyphens, name with every
    /// non-alphanumeric as a hyphen, then the identifier with hyphens as
    /// spaces compared case-insensitively against the name.
    pub fn resolve(&self, identifier: &str) -> Option<Arc<UniversityRecord>> {
        self.resolve_with_rule(identifier).map(|(record, _)| record)
    }

    pub fn resolve_with_rule(&self, identifier: &str) -> Option<(Arc<UniversityRecord>, MatchedBy)> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }

        if let Some(found) = self.find(|r| r.slug.as_deref() == Some(identifier)) {
            return Some((found, MatchedBy::Slug));
        }
        if let Some(found) = self.get(identifier) {
            return Some((found, MatchedBy::Id));
        }

        let lowered = identifier.to_lowercase();
        if let Some(found) = self.find(|r| {
            r.name
                .as_deref()
                .is_some_and(|n| slug_from_spaces(n) == lowered)
        }) {
            return Some((found, MatchedBy::NameSpaces));
        }
        if let Some(found) = self.find(|r| {
            r.name
                .as_deref()
                .is_some_and(|n| slug_from_alphanumeric(n) == lowered)
        }) {
            return Some((found, MatchedBy::NameAlphanumeric));
        }

        let spaced = identifier.replace('-', " ");
        self.find(|r| {
            r.name
                .as_deref()
                .is_some_and(|n| n.to_lowercase() == spaced.to_lowercase())
        })
        .map(|found| (found, MatchedBy::ReverseName))
    }

    /// First match by insertion order, so repeated lookups are deterministic.
    fn find(&self, pred: impl Fn(&UniversityRecord) -> bool) -> Option<Arc<UniversityRecord>> {
        self.records
            .iter()
            .filter(|e| pred(&e.value().1))
            .min_by_key(|e| e.value().0)
            .map(|e| Arc::clone(&e.value().1))
    }

    /// Up to `limit` records, most recently written first.
    pub fn most_recent(&self, limit: usize) -> Vec<Arc<UniversityRecord>> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|e| (e.value().0, Arc::clone(&e.value().1)))
            .collect();
        all.sort_by(|a, b| b.0.cmp(&a.0));
        all.into_iter().take(limit).map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

/// `"Test University"` → `"test-university"`
pub fn slug_from_spaces(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// `"St. Mary's College"` → `"st--mary-s-college"`
pub fn slug_from_alphanumeric(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}
