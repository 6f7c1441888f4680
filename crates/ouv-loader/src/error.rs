//! Error types for data loading
//!
//! Both enums are `Clone`: one failed fetch is delivered to every caller that
//! joined the same in-flight request.

use std::time::Duration;

/// Failure of a single network attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// No response within the loader timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response
    #[error("http {status} from {url}")]
    Http {
        /// Status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Transport-level failure
    #[error("connection failed: {0}")]
    Connection(String),

    /// Body was not valid JSON
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether another attempt could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Create HTTP status error
    pub fn http(status: u16, url: impl Into<String>) -> Self {
        Self::Http {
            status,
            url: url.into(),
        }
    }
}

/// Failure of a [`DataLoader::load`](crate::DataLoader::load) call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Non-retryable fetch failure
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Transient failures on every attempt
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: FetchError,
    },

    /// Request was dropped from the queue before it started
    #[error("request cancelled before it started")]
    Cancelled,

    /// Background task failed
    #[error("loader task failed: {0}")]
    Internal(String),
}

impl LoadError {
    /// Underlying fetch error, if any
    #[must_use]
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch(e) | Self::RetriesExhausted { last: e, .. } => Some(e),
            Self::Cancelled | Self::Internal(_) => None,
        }
    }
}
