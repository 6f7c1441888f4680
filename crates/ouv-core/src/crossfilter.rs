//! Filter-aware loading
//!
//! With no active filters a page loads its endpoint as-is. Otherwise the
//! request is rewritten into a `POST /api/filter/aggregated` carrying the
//! filter set and the original endpoint, so the backend recomputes the same
//! aggregation over the filtered records.

use crate::error::Result;
use ouv_filter::{Filter, FilterRequest, GlobalFilterStore};
use ouv_loader::{DataLoader, LoadOptions, LoadRequest};
use serde_json::Value;
use std::sync::Arc;

/// Loader front-end that applies the active filter set
#[derive(Debug, Clone)]
pub struct Crossfilter {
    filters: GlobalFilterStore,
    loader: DataLoader,
}

impl Crossfilter {
    /// Adapter over `filters` and `loader`
    #[must_use]
    pub fn new(filters: GlobalFilterStore, loader: DataLoader) -> Self {
        Self { filters, loader }
    }

    /// Load `original_url` under the store's current filters
    ///
    /// # Errors
    /// Propagates loader failures.
    pub async fn load_filtered(&self, original_url: &str) -> Result<Arc<Value>> {
        self.load_with(self.filters.filters(), original_url).await
    }

    /// Load `original_url` under an explicit filter set
    ///
    /// # Errors
    /// Propagates loader failures.
    pub async fn load_with(&self, filters: Vec<Filter>, original_url: &str) -> Result<Arc<Value>> {
        let request = if filters.is_empty() {
            LoadRequest::get(original_url)
        } else {
            let body = FilterRequest::aggregated(filters, original_url);
            LoadRequest::post_json(body.endpoint(), &body)?
        };
        Ok(self.loader.load(request, LoadOptions::default()).await?)
    }

    /// Raw records matching the store's current filters
    ///
    /// # Errors
    /// Propagates loader failures.
    pub async fn load_records(&self) -> Result<Arc<Value>> {
        let body = FilterRequest::records(self.filters.filters());
        let request = LoadRequest::post_json(body.endpoint(), &body)?;
        Ok(self.loader.load(request, LoadOptions::default()).await?)
    }

    /// Outbound request `load_filtered` would issue right now
    ///
    /// # Errors
    /// Fails only if the body cannot be encoded.
    pub fn request_for(&self, original_url: &str) -> Result<LoadRequest> {
        let filters = self.filters.filters();
        if filters.is_empty() {
            return Ok(LoadRequest::get(original_url));
        }
        let body = FilterRequest::aggregated(filters, original_url);
        Ok(LoadRequest::post_json(body.endpoint(), &body)?)
    }
}
