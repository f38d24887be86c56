//! Wire types for the university catalog API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Number of universities requested per catalog page.
pub const PAGE_SIZE: u32 = 9;

/// A university as returned by the catalog API.
///
/// Only the identity fields are typed; everything else (courses, career
/// outcomes, FAQs, fees...) is carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversityRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UniversityRecord {
    /// Minimal record with only an id, mostly useful in tests and fixtures.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: None,
            name: None,
            extra: Map::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn slugged(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// A record is usable when it carries a non-blank id.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Accept ids serialized either as strings or as bare integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {other}"
        ))),
    }
}

/// Optional catalog filters. Values are compared only through the cache key,
/// never field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<String>,
}

impl FilterSet {
    /// `(key, value)` pairs for the filters that are set, in no particular order.
    ///
    /// Keys use the same camelCase names as the persisted JSON.
    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("country", self.country.as_deref()),
            ("universityName", self.university_name.as_deref()),
            ("fees", self.fees.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }
}

/// Server-side pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub total: u32,
    pub pages: u32,
    pub page: u32,
    pub limit: u32,
}

impl Default for PaginationInfo {
    fn default() -> Self {
        Self {
            total: 0,
            pages: 1,
            page: 1,
            limit: PAGE_SIZE,
        }
    }
}

impl PaginationInfo {
    /// Recompute `pages` from `total` and `limit` so that
    /// `pages == max(1, ceil(total / limit))` always holds.
    pub fn normalized(self) -> Self {
        let limit = self.limit.max(1);
        Self {
            total: self.total,
            pages: self.total.div_ceil(limit).max(1),
            page: self.page.max(1),
            limit,
        }
    }
}

/// One page of the catalog listing. Both fields are required: a body
/// missing either one is a malformed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPage {
    pub universities: Vec<UniversityRecord>,
    pub pagination: PaginationInfo,
}

/// The shapes a detail endpoint may answer with.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum DetailPayload {
    Wrapped { university: UniversityRecord },
    List { universities: Vec<UniversityRecord> },
    Bare(UniversityRecord),
}

impl DetailPayload {
    /// The record this payload describes for `identifier`.
    ///
    /// A list answer only counts when one of its records carries that id or
    /// slug; an endpoint that ignored the parameter returns the plain listing.
    pub(crate) fn into_record(self, identifier: &str) -> Option<UniversityRecord> {
        match self {
            Self::Wrapped { university } => Some(university),
            Self::List { universities } => universities
                .into_iter()
                .find(|r| r.id == identifier || r.slug.as_deref() == Some(identifier)),
            Self::Bare(record) => Some(record),
        }
        .filter(UniversityRecord::is_well_formed)
    }
}

/// Everything needed to request one catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub query: String,
    pub filters: FilterSet,
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(query: impl Into<String>, filters: FilterSet, page: u32) -> Self {
        Self {
            query: query.into(),
            filters,
            page: page.max(1),
            limit: PAGE_SIZE,
        }
    }

    /// Query-string parameters in the order the API documents them.
    /// Blank optional parameters are omitted.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ];
        let optional = [
            ("query", Some(self.query.as_str())),
            ("country", self.filters.country.as_deref()),
            ("name", self.filters.university_name.as_deref()),
            ("fees", self.filters.fees.as_deref()),
        ];
        for (name, value) in optional {
            if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
                params.push((name, v.to_owned()));
            }
        }
        params
    }
}
