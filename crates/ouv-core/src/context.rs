//! Composition root
//!
//! One [`DashboardContext`] owns exactly one of each shared component and
//! hands out references. Components are wired here and nowhere else.

use crate::charts::ChartRegistry;
use crate::communication::ChartCommunication;
use crate::config::DashboardConfig;
use crate::crossfilter::Crossfilter;
use crate::error::Result;
use crate::pages::{PageListenerConfig, PageListeners, PageLoader};
use ouv_cache::{CachePolicy, DataStore};
use ouv_filter::{DashboardBus, GlobalFilterStore};
use ouv_loader::{DataLoader, Fetcher, HttpFetcher};
use std::sync::Arc;

/// Every shared dashboard component
#[derive(Debug)]
pub struct DashboardContext {
    config: DashboardConfig,
    bus: DashboardBus,
    filters: GlobalFilterStore,
    policy: Arc<CachePolicy>,
    store: DataStore,
    loader: DataLoader,
    communication: ChartCommunication,
    crossfilter: Crossfilter,
    pages: PageListeners,
}

impl DashboardContext {
    /// Wire a context around `fetcher`
    ///
    /// # Errors
    /// Returns `DashboardError::Policy` when the cache table is invalid.
    pub fn new(config: DashboardConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let policy = Arc::new(CachePolicy::from_config(config.cache.clone())?);
        let store = DataStore::new(
            Arc::clone(&policy),
            config.store.max_entries,
            config.store.deep_copy_threshold_bytes,
        );
        let loader = DataLoader::new(fetcher, store.clone(), config.loader.clone());

        let bus = DashboardBus::new();
        let filters = GlobalFilterStore::new(bus.clone(), config.filter_debounce());
        let communication =
            ChartCommunication::new(filters.clone(), Arc::new(ChartRegistry::new()));
        let crossfilter = Crossfilter::new(filters.clone(), loader.clone());
        let pages = PageListeners::new(filters.clone(), config.page_debounce());

        tracing::info!(
            api = %config.api_base_url,
            max_concurrent = loader.queue_stats().max_concurrent,
            "dashboard context ready"
        );

        Ok(Self {
            config,
            bus,
            filters,
            policy,
            store,
            loader,
            communication,
            crossfilter,
            pages,
        })
    }

    /// Wire a context talking HTTP to `config.api_base_url`
    ///
    /// # Errors
    /// Policy or HTTP client construction failures.
    pub fn connect(config: DashboardConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.api_base_url.clone())?);
        Self::new(config, fetcher)
    }

    /// Register a page reload with the configured page debounce
    pub fn create_page_filter_listener(
        &self,
        page_key: impl Into<String>,
        loader: Arc<dyn PageLoader>,
    ) -> bool {
        let config = PageListenerConfig::new(page_key, self.config.page_debounce());
        self.pages.create_page_filter_listener(config, loader)
    }

    /// Leave a page: drop its listener and charts, deliver pending filter changes
    pub fn leave_page(&self, page_key: &str, chart_ids: &[&str]) {
        self.pages.remove(page_key);
        self.communication.destroy_page_charts(chart_ids);
        self.filters.flush();
    }

    /// Configuration the context was built from
    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Shared event bus
    #[must_use]
    pub fn event_bus(&self) -> &DashboardBus {
        &self.bus
    }

    /// Global filter store
    #[must_use]
    pub fn filters(&self) -> &GlobalFilterStore {
        &self.filters
    }

    /// Chart facade
    #[must_use]
    pub fn chart_communication(&self) -> &ChartCommunication {
        &self.communication
    }

    /// Chart registry
    #[must_use]
    pub fn charts(&self) -> &Arc<ChartRegistry> {
        self.communication.registry()
    }

    /// Data loader
    #[must_use]
    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    /// Filter-aware loader front-end
    #[must_use]
    pub fn crossfilter(&self) -> &Crossfilter {
        &self.crossfilter
    }

    /// Data store
    #[must_use]
    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// TTL policy
    #[must_use]
    pub fn policy(&self) -> &Arc<CachePolicy> {
        &self.policy
    }

    /// Page listeners
    #[must_use]
    pub fn pages(&self) -> &PageListeners {
        &self.pages
    }
}
