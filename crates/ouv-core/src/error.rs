//! Error types for the dashboard layer
//!
//! Aggregates the per-crate errors plus configuration failures.

use ouv_cache::PolicyError;
use ouv_filter::FilterError;
use ouv_loader::{FetchError, LoadError};
use std::path::PathBuf;

/// Main dashboard error type
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Invalid filter input
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Invalid cache policy
    #[error("cache policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Load failed
    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    /// HTTP client could not be built
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetchError),

    /// Request body could not be encoded
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Configuration document is invalid
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file unreadable
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl DashboardError {
    /// Whether retrying the same operation later could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Load(LoadError::Fetch(error)) | Self::Fetcher(error) => error.is_transient(),
            Self::Load(LoadError::RetriesExhausted { .. }) => true,
            _ => false,
        }
    }
}

/// Result alias for dashboard operations
pub type Result<T> = std::result::Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let timeout = DashboardError::Load(LoadError::Fetch(FetchError::Timeout(
            std::time::Duration::from_secs(1),
        )));
        assert!(timeout.is_transient());

        let unknown = DashboardError::Filter(FilterError::UnknownField("cor".into()));
        assert!(!unknown.is_transient());
        assert_eq!(unknown.to_string(), "filter error: unknown filter field: 'cor'");
    }
}
