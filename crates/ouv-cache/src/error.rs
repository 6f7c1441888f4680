//! Error types for cache policy loading

use std::path::PathBuf;

/// Errors while building a [`CachePolicy`](crate::CachePolicy)
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Endpoint pattern has more than one wildcard or is otherwise unusable
    #[error("invalid endpoint pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// Policy document could not be parsed
    #[error("cache policy parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Policy file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    /// Create invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
