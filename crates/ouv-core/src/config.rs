//! Dashboard configuration
//!
//! One TOML document covers the API endpoint, debounce windows, loader
//! tuning, data store bounds and the TTL policy table:
//!
//! ```toml
//! api_base_url = "http://localhost:3000"
//! filter_debounce_ms = 200
//! page_debounce_ms = 300
//!
//! [loader]
//! timeout_ms = 30000
//! max_retries = 2
//!
//! [store]
//! max_entries = 1000
//!
//! [cache]
//! default_ttl_ms = 300000
//!
//! [cache.endpoints]
//! "/api/dashboard-data" = 5000
//! "/api/unit/*" = 600000
//! ```

use crate::error::{DashboardError, Result};
use ouv_cache::store::{DEFAULT_DEEP_COPY_THRESHOLD, DEFAULT_MAX_ENTRIES};
use ouv_cache::CachePolicyConfig;
use ouv_loader::LoaderConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`DashboardConfig::api_base_url`]
pub const API_BASE_URL_ENV: &str = "OUVIDORIA_API_BASE_URL";

/// Dashboard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL the HTTP fetcher resolves paths against
    pub api_base_url: String,
    /// Filter store debounce in milliseconds
    pub filter_debounce_ms: u64,
    /// Default per-page reload debounce in milliseconds
    pub page_debounce_ms: u64,
    /// Loader tuning
    pub loader: LoaderConfig,
    /// Data store bounds
    pub store: StoreConfig,
    /// TTL policy table
    pub cache: CachePolicyConfig,
}

impl DashboardConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns `DashboardError::Config` when the document is malformed.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// Read and parse a TOML file, then apply environment overrides
    ///
    /// # Errors
    /// Returns `DashboardError::Io` or `DashboardError::Config`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| DashboardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&document)?;
        tracing::debug!(path = %path.display(), "loaded dashboard config");
        Ok(config.with_env_overrides())
    }

    /// Apply overrides from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(API_BASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
            tracing::debug!(%url, "api base url overridden from environment");
            self.api_base_url = url;
        }
        self
    }

    /// With API base URL
    #[inline]
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// With filter store debounce
    #[inline]
    #[must_use]
    pub fn with_filter_debounce(mut self, debounce: Duration) -> Self {
        self.filter_debounce_ms = millis(debounce);
        self
    }

    /// With default page reload debounce
    #[inline]
    #[must_use]
    pub fn with_page_debounce(mut self, debounce: Duration) -> Self {
        self.page_debounce_ms = millis(debounce);
        self
    }

    /// With loader tuning
    #[inline]
    #[must_use]
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// With TTL policy table
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CachePolicyConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Filter store debounce
    #[inline]
    #[must_use]
    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }

    /// Default page reload debounce
    #[inline]
    #[must_use]
    pub fn page_debounce(&self) -> Duration {
        Duration::from_millis(self.page_debounce_ms)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            filter_debounce_ms: 200,
            page_debounce_ms: 300,
            loader: LoaderConfig::default(),
            store: StoreConfig::default(),
            cache: CachePolicyConfig::default(),
        }
    }
}

/// Data store bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity before least-recently-used eviction
    pub max_entries: u64,
    /// Payloads larger than this are detached on write under `CopyPolicy::Auto`
    pub deep_copy_threshold_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            deep_copy_threshold_bytes: DEFAULT_DEEP_COPY_THRESHOLD,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
