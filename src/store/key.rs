//! Deterministic cache keys for `(query, filters, page)`.
//!
//! The key is the only notion of identity the rest of the store uses:
//! two requests are "the same" exactly when their keys are byte-equal.

use crate::catalog::models::FilterSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// `q:<query>|f:<k:v|k:v>|p:<page>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for a detail lookup, kept in a separate namespace from listing keys.
    pub fn detail(identifier: &str) -> Self {
        Self(format!("d:{}", normalize(identifier)))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// Trim, NFC-compose and lower-case a free-text value.
pub fn normalize(value: &str) -> String {
    value.trim().nfc().collect::<String>().to_lowercase()
}

/// Pages below 1 are treated as page 1.
pub fn clamp_page(page: i64) -> u32 {
    u32::try_from(page.max(1)).unwrap_or(u32::MAX)
}

pub fn build_key(query: &str, filters: &FilterSet, page: i64) -> CacheKey {
    let mut pairs: Vec<(&str, String)> = filters
        .pairs()
        .map(|(k, v)| (k, normalize(v)))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let filters = pairs
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("|");

    CacheKey(format!(
        "q:{}|f:{}|p:{}",
        normalize(query),
        filters,
        clamp_page(page)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(country: Option<&str>, name: Option<&str>, fees: Option<&str>) -> FilterSet {
        FilterSet {
            country: country.map(Into::into),
            university_name: name.map(Into::into),
            fees: fees.map(Into::into),
        }
    }

    #[test]
    fn matches_documented_format() {
        let key = build_key("MIT", &filters(Some("USA"), None, None), 1);
        assert_eq!(key.as_str(), "q:mit|f:country:usa|p:1");
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(
            build_key("", &FilterSet::default(), 1).as_str(),
            "q:|f:|p:1"
        );
    }

    #[test]
    fn filter_keys_are_sorted() {
        let key = build_key(
            "",
            &filters(Some("UK"), Some("Oxford"), Some("10000-20000")),
            2,
        );
        assert_eq!(
            key.as_str(),
            "q:|f:country:uk|fees:10000-20000|universityName:oxford|p:2"
        );
    }

    #[test]
    fn stable_under_case_and_whitespace() {
        let a = build_key("  Imperial College ", &filters(Some(" uk"), None, Some("Low ")), 3);
        let b = build_key("imperial college", &filters(Some("UK "), None, Some(" low")), 3);
        assert_eq!(a, b);
    }

    #[test]
    fn blank_filters_are_dropped() {
        let a = build_key("x", &filters(Some("   "), Some(""), None), 1);
        let b = build_key("x", &FilterSet::default(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn composed_and_decomposed_accents_agree() {
        let composed = build_key("Universit\u{e9}", &FilterSet::default(), 1);
        let decomposed = build_key("Universite\u{301}", &FilterSet::default(), 1);
        assert_eq!(composed, decomposed);
    }

    #[test]
    fn pages_are_clamped() {
        let base = build_key("q", &FilterSet::default(), 1);
        assert_eq!(build_key("q", &FilterSet::default(), 0), base);
        assert_eq!(build_key("q", &FilterSet::default(), -5), base);
        assert_ne!(build_key("q", &FilterSet::default(), 2), base);
    }

    #[test]
    fn detail_keys_live_in_their_own_namespace() {
        assert_eq!(CacheKey::detail(" Test-University ").as_str(), "d:test-university");
    }
}
