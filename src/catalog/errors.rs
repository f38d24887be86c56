//! Error types for the catalog API client.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CatalogApiError {
    #[error("Resource not found")]
    NotFound,
    #[error("Unauthorized request")]
    Unauthorized,
    #[error("Too many requests")]
    RateLimited,
    #[error("Server error ({status})")]
    Server { status: StatusCode },
    #[error("Unexpected response status ({status})")]
    Status { status: StatusCode },
    #[error("Request timed out")]
    TimedOut,
    #[error("Network request failed")]
    Network(#[source] reqwest::Error),
    #[error("Failed to parse response")]
    Malformed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CatalogApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            s if s.is_server_error() => Self::Server { status: s },
            s => Self::Status { status: s },
        }
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else if let Some(status) = err.status() {
            Self::from_status(status)
        } else {
            Self::Network(err)
        }
    }

    /// Conditions the API reports as "no data" rather than a failure.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound | Self::Unauthorized)
    }

    /// Failures where showing a stale cached page beats showing nothing.
    pub fn allows_stale_fallback(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Network(_))
    }

    /// Message handed to the UI through the store's `error` field.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "No universities found.".to_owned(),
            Self::Unauthorized => "You are not authorized to view this data.".to_owned(),
            Self::RateLimited => {
                "Too many requests. Please wait a moment and try again.".to_owned()
            }
            Self::Server { .. } => "Server error. Please try again later.".to_owned(),
            Self::TimedOut => "Request timed out. Please check your connection.".to_owned(),
            Self::Network(_) => "Network error. Please check your connection.".to_owned(),
            Self::Status { .. } | Self::Malformed { .. } => {
                "Failed to load universities.".to_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            CatalogApiError::from_status(StatusCode::NOT_FOUND),
            CatalogApiError::NotFound
        ));
        assert!(matches!(
            CatalogApiError::from_status(StatusCode::UNAUTHORIZED),
            CatalogApiError::Unauthorized
        ));
        assert!(matches!(
            CatalogApiError::from_status(StatusCode::TOO_MANY_REQUESTS),
            CatalogApiError::RateLimited
        ));
        assert!(matches!(
            CatalogApiError::from_status(StatusCode::BAD_GATEWAY),
            CatalogApiError::Server { .. }
        ));
        assert!(matches!(
            CatalogApiError::from_status(StatusCode::BAD_REQUEST),
            CatalogApiError::Status { .. }
        ));
    }

    #[test]
    fn only_transport_failures_fall_back_to_stale_data() {
        assert!(CatalogApiError::TimedOut.allows_stale_fallback());
        assert!(!CatalogApiError::RateLimited.allows_stale_fallback());
        assert!(
            !CatalogApiError::Server {
                status: StatusCode::INTERNAL_SERVER_ERROR
            }
            .allows_stale_fallback()
        );
        assert!(CatalogApiError::NotFound.is_absent());
        assert!(CatalogApiError::Unauthorized.is_absent());
    }

    #[test]
    fn messages_are_distinct_for_timeouts_and_throttling() {
        assert!(CatalogApiError::TimedOut.user_message().contains("timed out"));
        assert!(
            CatalogApiError::RateLimited
                .user_message()
                .to_lowercase()
                .contains("too many requests")
        );
    }
}
