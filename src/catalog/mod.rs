//! Catalog REST API: wire models, error mapping and the HTTP client.

pub mod api;
pub mod errors;
pub mod json;
pub mod models;

pub use api::{CatalogApi, CatalogSource, DetailEndpoint};
pub use errors::CatalogApiError;
pub use models::{CatalogPage, FilterSet, PaginationInfo, UniversityRecord};
