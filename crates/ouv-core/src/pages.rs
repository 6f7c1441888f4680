//! Per-page reactive reloads
//!
//! A page registers one listener on the filter store. Every change restarts
//! the page's own debounce window; when it closes, the page loader runs with
//! the latest filter snapshot. A page key can hold at most one listener, so
//! re-running page setup never stacks duplicate reloads.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ouv_bus::{Debouncer, Subscription};
use ouv_filter::{Filter, GlobalFilterStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Reloads a page's data for a filter set
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Fetch and redraw everything on the page under `filters`
    async fn load(&self, filters: &[Filter]) -> anyhow::Result<()>;
}

/// Listener registration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListenerConfig {
    /// Unique page key
    pub page_key: String,
    /// Quiet period before reloading
    pub debounce: Duration,
}

impl PageListenerConfig {
    /// Config for `page_key`
    #[must_use]
    pub fn new(page_key: impl Into<String>, debounce: Duration) -> Self {
        Self {
            page_key: page_key.into(),
            debounce,
        }
    }
}

struct PageListener {
    subscription: Subscription,
    debouncer: Arc<Debouncer>,
}

/// Page listeners keyed by page
pub struct PageListeners {
    filters: GlobalFilterStore,
    default_debounce: Duration,
    pages: DashMap<String, PageListener>,
}

impl PageListeners {
    /// Listeners reacting to `filters`
    #[must_use]
    pub fn new(filters: GlobalFilterStore, default_debounce: Duration) -> Self {
        Self {
            filters,
            default_debounce,
            pages: DashMap::new(),
        }
    }

    /// Register `loader` for `config.page_key`
    ///
    /// Returns `false`, leaving the existing listener in place, when the page
    /// already has one.
    pub fn create_page_filter_listener(
        &self,
        config: PageListenerConfig,
        loader: Arc<dyn PageLoader>,
    ) -> bool {
        let PageListenerConfig { page_key, debounce } = config;

        let slot = match self.pages.entry(page_key.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(%page_key, "page listener already registered");
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let debouncer = Arc::new(Debouncer::new(debounce));
        let subscription = {
            let debouncer = Arc::downgrade(&debouncer);
            let page_key = page_key.clone();
            self.filters.on_change(move |filters| {
                if let Some(debouncer) = debouncer.upgrade() {
                    let snapshot = filters.to_vec();
                    let loader = Arc::clone(&loader);
                    let page_key = page_key.clone();
                    debouncer.schedule(move || spawn_reload(page_key, loader, snapshot));
                }
                Ok(())
            })
        };

        slot.insert(PageListener {
            subscription,
            debouncer,
        });
        tracing::info!(%page_key, ?debounce, "page filter listener registered");
        true
    }

    /// Register with the default debounce
    pub fn listen(&self, page_key: impl Into<String>, loader: Arc<dyn PageLoader>) -> bool {
        let config = PageListenerConfig::new(page_key, self.default_debounce);
        self.create_page_filter_listener(config, loader)
    }

    /// Remove a page's listener, cancelling any pending reload
    pub fn remove(&self, page_key: &str) -> bool {
        match self.pages.remove(page_key) {
            Some((_, listener)) => {
                listener.subscription.unsubscribe();
                listener.debouncer.cancel();
                tracing::info!(%page_key, "page filter listener removed");
                true
            }
            None => false,
        }
    }

    /// Remove every listener
    pub fn clear(&self) -> usize {
        let keys: Vec<String> = self.pages.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Whether `page_key` has a listener
    #[must_use]
    pub fn is_registered(&self, page_key: &str) -> bool {
        self.pages.contains_key(page_key)
    }

    /// Whether `page_key` has a reload waiting for its debounce window
    #[must_use]
    pub fn has_pending_reload(&self, page_key: &str) -> bool {
        self.pages
            .get(page_key)
            .is_some_and(|listener| listener.debouncer.is_pending())
    }

    /// Registered page keys, sorted
    #[must_use]
    pub fn page_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.pages.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of registered pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if no page is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl Drop for PageListeners {
    fn drop(&mut self) {
        for entry in self.pages.iter() {
            entry.subscription.unsubscribe();
            entry.debouncer.cancel();
        }
    }
}

impl fmt::Debug for PageListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageListeners")
            .field("pages", &self.page_keys())
            .field("default_debounce", &self.default_debounce)
            .finish_non_exhaustive()
    }
}

fn spawn_reload(page_key: String, loader: Arc<dyn PageLoader>, filters: Vec<Filter>) {
    let Ok(runtime) = Handle::try_current() else {
        tracing::warn!(%page_key, "no async runtime available; page reload skipped");
        return;
    };
    runtime.spawn(async move {
        tracing::debug!(%page_key, filters = filters.len(), "reloading page");
        if let Err(error) = loader.load(&filters).await {
            tracing::error!(%page_key, error = %format!("{error:#}"), "page reload failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouv_filter::{DashboardBus, FilterField};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<Filter>>>,
        fail: bool,
    }

    #[async_trait]
    impl PageLoader for Recorder {
        async fn load(&self, filters: &[Filter]) -> anyhow::Result<()> {
            self.calls.lock().push(filters.to_vec());
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(())
        }
    }

    fn store() -> GlobalFilterStore {
        GlobalFilterStore::new(DashboardBus::new(), Duration::from_millis(200))
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reloads_after_both_windows() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let recorder = Arc::new(Recorder::default());
        assert!(pages.listen("overview", recorder.clone()));

        filters.apply(FilterField::Tema, "Saneamento", false);
        advance(250).await;
        assert!(recorder.calls.lock().is_empty());
        assert!(pages.has_pending_reload("overview"));

        advance(350).await;
        assert_eq!(
            *recorder.calls.lock(),
            vec![vec![Filter::equals(FilterField::Tema, "Saneamento")]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_registration_is_ignored() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        assert!(pages.listen("overview", first.clone()));
        assert!(!pages.listen("overview", second.clone()));
        assert_eq!(pages.len(), 1);
        assert_eq!(filters.bus().listener_count(ouv_filter::FILTERS_CHANGED), 1);

        filters.apply(FilterField::Canal, "Telefone", false);
        advance(600).await;
        assert_eq!(first.calls.lock().len(), 1);
        assert!(second.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn page_window_coalesces_store_notifications() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let recorder = Arc::new(Recorder::default());
        pages.listen("overview", recorder.clone());

        filters.apply(FilterField::Tema, "Saneamento", false);
        advance(210).await;
        filters.apply(FilterField::Canal, "Telefone", false);
        advance(700).await;

        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_loader_stays_registered() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        pages.listen("overview", recorder.clone());

        filters.apply(FilterField::Tema, "Saneamento", false);
        advance(600).await;
        filters.apply(FilterField::Tema, "Iluminação", false);
        advance(600).await;

        assert_eq!(recorder.calls.lock().len(), 2);
        assert!(pages.is_registered("overview"));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_cancels_pending_reload() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let recorder = Arc::new(Recorder::default());
        pages.listen("overview", recorder.clone());

        filters.apply(FilterField::Tema, "Saneamento", false);
        advance(250).await;
        assert!(pages.remove("overview"));
        assert!(!pages.remove("overview"));
        advance(600).await;

        assert!(recorder.calls.lock().is_empty());
        assert_eq!(filters.bus().listener_count(ouv_filter::FILTERS_CHANGED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_page_reloads() {
        let filters = store();
        let pages = PageListeners::new(filters.clone(), Duration::from_millis(300));
        let counter = Arc::new(AtomicUsize::new(0));

        struct Counting(Arc<AtomicUsize>);

        #[async_trait]
        impl PageLoader for Counting {
            async fn load(&self, _filters: &[Filter]) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        for page in ["overview", "canais", "unidades"] {
            pages.listen(page, Arc::new(Counting(Arc::clone(&counter))));
        }
        assert_eq!(pages.page_keys(), vec!["canais", "overview", "unidades"]);

        filters.clear();
        advance(350).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        assert_eq!(pages.clear(), 3);
        assert!(pages.is_empty());
    }
}
