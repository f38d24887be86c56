//! HTTP client for the university catalog REST API.

use crate::catalog::errors::CatalogApiError;
use crate::catalog::json::decode_with_context;
use crate::catalog::models::{CatalogPage, DetailPayload, PageRequest, UniversityRecord};
use crate::config::RateLimitingConfig;
use crate::utils::log_if_slow;
use anyhow::Context;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

const SLOW_REQUEST: Duration = Duration::from_secs(3);

/// The ways a single university can be addressed, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailEndpoint {
    /// `GET /universities?slug={identifier}`
    BySlug,
    /// `GET /universities/{identifier}`
    ByPath,
    /// `GET /universities?id={identifier}`
    ById,
}

impl DetailEndpoint {
    pub const ORDER: [DetailEndpoint; 3] = [Self::BySlug, Self::ByPath, Self::ById];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BySlug => "slug",
            Self::ByPath => "path",
            Self::ById => "id",
        }
    }
}

/// Anything that can serve catalog pages and university details.
///
/// The store only talks to this trait, so tests can substitute an in-memory source.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page of the listing.
    async fn fetch_page(&self, request: &PageRequest) -> Result<CatalogPage, CatalogApiError>;

    /// Fetch a single university through one endpoint variant.
    /// `Ok(None)` means the endpoint answered but carried no usable record.
    async fn fetch_detail(
        &self,
        endpoint: DetailEndpoint,
        identifier: &str,
    ) -> Result<Option<UniversityRecord>, CatalogApiError>;
}

/// reqwest-backed [`CatalogSource`] with outbound request pacing.
pub struct CatalogApi {
    http: reqwest::Client,
    listing_url: Url,
    limiter: DefaultDirectRateLimiter,
}

impl CatalogApi {
    pub fn new_with_config(
        base_url: &str,
        timeout: Duration,
        rate_limiting: &RateLimitingConfig,
    ) -> anyhow::Result<Self> {
        let mut listing_url = Url::parse(base_url).context("Invalid catalog API base URL")?;
        listing_url
            .path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Catalog API base URL cannot carry path segments: {base_url}"))?
            .pop_if_empty()
            .push("universities");

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalog-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self {
            http,
            listing_url,
            limiter: RateLimiter::direct(rate_limiting.quota()),
        })
    }

    pub(crate) fn detail_url(&self, endpoint: DetailEndpoint, identifier: &str) -> Url {
        let mut url = self.listing_url.clone();
        match endpoint {
            DetailEndpoint::BySlug => {
                url.query_pairs_mut().append_pair("slug", identifier);
            }
            DetailEndpoint::ByPath => {
                // The constructor rejected cannot-be-a-base URLs.
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.push(identifier);
                }
            }
            DetailEndpoint::ById => {
                url.query_pairs_mut().append_pair("id", identifier);
            }
        }
        url
    }

    pub(crate) fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.listing_url.clone();
        url.query_pairs_mut().extend_pairs(request.query_params());
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CatalogApiError> {
        self.limiter.until_ready().await;

        let start = Instant::now();
        trace!(url = %url, "GET");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(CatalogApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Catalog API returned error status");
            return Err(CatalogApiError::from_status(status));
        }

        let body = response
            .text()
            .await
            .map_err(CatalogApiError::from_transport)?;
        log_if_slow(start, SLOW_REQUEST, url.path());

        decode_with_context(&body).map_err(|source| CatalogApiError::Malformed {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl CatalogSource for CatalogApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<CatalogPage, CatalogApiError> {
        let mut page: CatalogPage = self.get_json(self.page_url(request)).await?;
        page.pagination = page.pagination.normalized();
        Ok(page)
    }

    async fn fetch_detail(
        &self,
        endpoint: DetailEndpoint,
        identifier: &str,
    ) -> Result<Option<UniversityRecord>, CatalogApiError> {
        let payload: DetailPayload = self.get_json(self.detail_url(endpoint, identifier)).await?;
        Ok(payload.into_record(identifier))
    }
}

impl RateLimitingConfig {
    /// Quota allowing `requests_per_second` with the configured burst.
    pub fn quota(&self) -> Quota {
        let rate = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(rate);
        Quota::per_second(rate).allow_burst(burst)
    }
}
