//! Data loader
//!
//! Turns "load this resource" into at most one in-flight network operation
//! per request signature:
//!
//! 1. live data store entry → returned without I/O
//! 2. same signature already in flight → the caller joins the shared future
//! 3. ceiling reached → FIFO queue
//! 4. fetch with timeout and bounded retry, then write through to the store
//!
//! The pending table holds in-flight futures only; payloads live in the
//! [`DataStore`]. An entry leaves the table when its request settles, success
//! or failure, so a later retry by the caller starts a fresh fetch.

use crate::error::{FetchError, LoadError};
use crate::fetcher::Fetcher;
use crate::queue::{default_concurrency, SlotQueue};
use crate::request::LoadRequest;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use ouv_cache::{DataStore, SetOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type LoadResult = Result<Arc<Value>, LoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Loader tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt, for transient failures only
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per retry
    pub retry_backoff_ms: u64,
    /// Fixed ceiling; adaptive when `None`
    pub max_concurrent: Option<usize>,
}

impl LoaderConfig {
    /// Per-attempt timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// With a fixed concurrency ceiling
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// With a per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With a retry budget
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 250,
            max_concurrent: None,
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Read from and write through to the data store
    pub use_data_store: bool,
    /// TTL for the write-through; the policy TTL when `None`
    pub ttl: Option<Duration>,
}

impl LoadOptions {
    /// Bypass the data store entirely
    #[must_use]
    pub fn network_only() -> Self {
        Self {
            use_data_store: false,
            ttl: None,
        }
    }

    /// Cache with an explicit TTL
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            use_data_store: true,
            ttl: Some(ttl),
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_data_store: true,
            ttl: None,
        }
    }
}

/// Queue introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Requests holding a slot
    pub active: usize,
    /// Requests waiting for a slot
    pub queued: usize,
    /// Ceiling
    pub max_concurrent: usize,
}

struct LoaderInner {
    fetcher: Arc<dyn Fetcher>,
    store: DataStore,
    config: LoaderConfig,
    queue: Arc<SlotQueue>,
    pending: DashMap<String, SharedLoad>,
    network_calls: AtomicU64,
}

impl LoaderInner {
    async fn fetch_with_retry(&self, request: &LoadRequest) -> Result<Value, LoadError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let timeout = self.config.timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = {
                let _slot = self.queue.acquire(attempt > 1).await?;
                self.network_calls.fetch_add(1, Ordering::Relaxed);
                match tokio::time::timeout(timeout, self.fetcher.fetch(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(%request, attempt, ?delay, %error, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) if error.is_transient() && attempts > 1 => {
                    tracing::error!(%request, attempts, %error, "request failed after retries");
                    return Err(LoadError::RetriesExhausted {
                        attempts,
                        last: error,
                    });
                }
                Err(error) => {
                    tracing::error!(%request, %error, "request failed");
                    return Err(LoadError::Fetch(error));
                }
            }
        }
    }
}

/// Clears a pending entry when its load task ends, panics included
struct PendingGuard {
    inner: Arc<LoaderInner>,
    signature: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.signature);
    }
}

/// Deduplicating, concurrency-bounded loader
///
/// Cloning yields another handle to the same loader.
#[derive(Clone)]
pub struct DataLoader {
    inner: Arc<LoaderInner>,
}

impl DataLoader {
    /// Create a loader writing through to `store`
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, store: DataStore, config: LoaderConfig) -> Self {
        let max = config.max_concurrent.unwrap_or_else(default_concurrency);
        tracing::debug!(max_concurrent = max, "data loader created");
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                store,
                config,
                queue: Arc::new(SlotQueue::new(max)),
                pending: DashMap::new(),
                network_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Load `request`
    ///
    /// # Errors
    /// Network and HTTP failures (after retries), or `LoadError::Cancelled`
    /// when the request was dropped from the queue.
    pub async fn load(&self, request: LoadRequest, options: LoadOptions) -> LoadResult {
        let signature = request.signature();

        if options.use_data_store {
            if let Some(value) = self.inner.store.get(&signature).await {
                tracing::debug!(%signature, "served from data store");
                return Ok(value);
            }
        }

        let shared = match self.inner.pending.entry(signature.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(%signature, "joining in-flight request");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let shared = self.start(signature, request, options);
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await
    }

    /// GET with default options
    ///
    /// # Errors
    /// See [`load`](Self::load).
    pub async fn get(&self, path: &str) -> LoadResult {
        self.load(LoadRequest::get(path), LoadOptions::default()).await
    }

    /// POST with default options
    ///
    /// # Errors
    /// See [`load`](Self::load).
    pub async fn post(&self, path: &str, body: Value) -> LoadResult {
        self.load(LoadRequest::post(path, body), LoadOptions::default())
            .await
    }

    /// Spawn the fetch so it completes even if every caller goes away
    fn start(&self, signature: String, request: LoadRequest, options: LoadOptions) -> SharedLoad {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _pending = PendingGuard {
                inner: Arc::clone(&inner),
                signature: signature.clone(),
            };
            match inner.fetch_with_retry(&request).await {
                Ok(value) if options.use_data_store => {
                    let set = SetOptions {
                        ttl: options.ttl,
                        ..SetOptions::default()
                    };
                    Ok(inner.store.set(&signature, value, set).await)
                }
                Ok(value) => Ok(Arc::new(value)),
                Err(error) => Err(error),
            }
        });

        async move {
            handle
                .await
                .unwrap_or_else(|join| Err(LoadError::Internal(join.to_string())))
        }
        .boxed()
        .shared()
    }

    /// Queue introspection
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        let (active, queued) = self.inner.queue.counts();
        QueueStats {
            active,
            queued,
            max_concurrent: self.inner.queue.max(),
        }
    }

    /// Drop queued requests that have not started; in-flight ones continue
    ///
    /// Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            tracing::info!(dropped, "cleared loader queue");
        }
        dropped
    }

    /// Distinct requests currently in flight or queued
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Network attempts made so far
    #[must_use]
    pub fn network_calls(&self) -> u64 {
        self.inner.network_calls.load(Ordering::Relaxed)
    }

    /// Store the loader writes through to
    #[must_use]
    pub fn store(&self) -> &DataStore {
        &self.inner.store
    }

    /// Loader configuration
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

impl fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("queue", &self.queue_stats())
            .field("in_flight", &self.in_flight())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ouv_cache::CachePolicy;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Semaphore;

    /// Replies from a script, after an optional delay or gate
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<Value, FetchError>>>,
        delay: Duration,
        gate: Option<Arc<Semaphore>>,
        calls: AtomicU64,
    }

    impl ScriptedFetcher {
        fn replying(replies: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                script: Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &LoadRequest) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"path": request.path})))
        }
    }

    fn loader_with(fetcher: Arc<ScriptedFetcher>, config: LoaderConfig) -> DataLoader {
        let store = DataStore::with_policy(Arc::new(CachePolicy::dashboard_defaults()));
        DataLoader::new(fetcher, store, config)
    }

    async fn settle() {
        // With paused time this only returns once every task is idle
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_loads_share_one_fetch() {
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(100),
            ..ScriptedFetcher::replying(vec![Ok(json!({"total": 42}))])
        });
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        let (a, b) = tokio::join!(loader.get("/api/summary"), loader.get("/api/summary"));

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_payload_skips_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        let first = loader.get("/api/distritos").await.unwrap();
        let second = loader.get("/api/distritos").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(loader.network_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_payload_is_refetched() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        loader.get("/api/dashboard-data").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        loader.get("/api/dashboard-data").await.unwrap();

        assert_eq!(loader.network_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn network_only_bypasses_store() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        for _ in 0..2 {
            loader
                .load(LoadRequest::get("/api/summary"), LoadOptions::network_only())
                .await
                .unwrap();
        }
        assert_eq!(loader.network_calls(), 2);
        assert!(!loader.store().contains("GET /api/summary").await);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_ttl_is_written_through() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader = loader_with(fetcher, LoaderConfig::default());

        loader
            .load(
                LoadRequest::get("/api/summary"),
                LoadOptions::with_ttl(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        let entry = loader.store().entry("GET /api/summary").await.unwrap();
        assert_eq!(entry.ttl, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_propagates_and_clears_pending() {
        let fetcher = Arc::new(ScriptedFetcher::replying(vec![Err(FetchError::http(
            404,
            "/api/unit/9",
        ))]));
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        let err = loader.get("/api/unit/9").await.unwrap_err();
        assert_eq!(err, LoadError::Fetch(FetchError::http(404, "/api/unit/9")));
        assert_eq!(loader.in_flight(), 0);

        // Not deduplicated against the dead request
        assert!(loader.get("/api/unit/9").await.is_ok());
        assert_eq!(loader.network_calls(), 2);
    }

    /// Panics on its first call, then echoes the path
    #[derive(Default)]
    struct PanicsOnce {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Fetcher for PanicsOnce {
        async fn fetch(&self, request: &LoadRequest) -> Result<Value, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("fetcher blew up");
            }
            Ok(json!({"path": request.path}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetch_clears_pending() {
        let fetcher = Arc::new(PanicsOnce::default());
        let store = DataStore::with_policy(Arc::new(CachePolicy::dashboard_defaults()));
        let loader = DataLoader::new(
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            store,
            LoaderConfig::default(),
        );

        let err = loader.get("/api/summary").await.unwrap_err();
        assert!(matches!(err, LoadError::Internal(_)), "{err:?}");
        assert_eq!(loader.in_flight(), 0);
        assert_eq!(loader.queue_stats().active, 0);

        let value = loader.get("/api/summary").await.unwrap();
        assert_eq!(*value, json!({"path": "/api/summary"}));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_ttl_is_stored_clamped() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader = loader_with(fetcher, LoaderConfig::default());

        loader
            .load(
                LoadRequest::get("/api/summary"),
                LoadOptions::with_ttl(Duration::MAX),
            )
            .await
            .unwrap();

        assert_eq!(loader.in_flight(), 0);
        let entry = loader.store().entry("GET /api/summary").await.unwrap();
        assert_eq!(entry.ttl, ouv_cache::MAX_TTL);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_queue_spares_requests_awaiting_retry() {
        let gate = Arc::new(Semaphore::new(1));
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedFetcher::replying(vec![Err(FetchError::http(503, "/api/summary"))])
        });
        let loader = loader_with(
            Arc::clone(&fetcher),
            LoaderConfig::default().with_max_concurrent(1),
        );

        let retrying = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.get("/api/summary").await })
        };
        settle().await;

        // Holds the only slot while the first request backs off
        let blocking = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.get("/api/distritos").await })
        };
        settle().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(
            loader.queue_stats(),
            QueueStats {
                active: 1,
                queued: 1,
                max_concurrent: 1
            }
        );
        assert_eq!(loader.clear_queue(), 0);

        gate.add_permits(2);
        assert!(blocking.await.unwrap().is_ok());
        let value = retrying.await.unwrap().unwrap();
        assert_eq!(*value, json!({"path": "/api/summary"}));
        assert_eq!(loader.network_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let fetcher = Arc::new(ScriptedFetcher::replying(vec![
            Err(FetchError::http(503, "/api/summary")),
            Err(FetchError::Connection("reset".into())),
            Ok(json!({"total": 1})),
        ]));
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        let value = loader.get("/api/summary").await.unwrap();
        assert_eq!(*value, json!({"total": 1}));
        assert_eq!(loader.network_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let fetcher = Arc::new(ScriptedFetcher::replying(vec![
            Err(FetchError::http(502, "/api/summary")),
            Err(FetchError::http(502, "/api/summary")),
            Err(FetchError::http(502, "/api/summary")),
            Ok(json!("never reached")),
        ]));
        let loader = loader_with(Arc::clone(&fetcher), LoaderConfig::default());

        let err = loader.get("/api/summary").await.unwrap_err();
        assert_eq!(
            err,
            LoadError::RetriesExhausted {
                attempts: 3,
                last: FetchError::http(502, "/api/summary"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_secs(10),
            ..ScriptedFetcher::default()
        });
        let config = LoaderConfig::default()
            .with_timeout(Duration::from_secs(1))
            .with_retries(0, Duration::ZERO);
        let loader = loader_with(fetcher, config);

        let err = loader.get("/api/summary").await.unwrap_err();
        assert_eq!(err, LoadError::Fetch(FetchError::Timeout(Duration::from_secs(1))));
        assert_eq!(loader.queue_stats().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_queues_and_clear_queue_cancels() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedFetcher::default()
        });
        let loader = loader_with(
            Arc::clone(&fetcher),
            LoaderConfig::default().with_max_concurrent(2),
        );

        let mut tasks = Vec::new();
        for i in 0..4 {
            let loader = loader.clone();
            tasks.push(tokio::spawn(async move {
                loader.get(&format!("/api/unit/{i}")).await
            }));
        }
        settle().await;

        assert_eq!(
            loader.queue_stats(),
            QueueStats {
                active: 2,
                queued: 2,
                max_concurrent: 2
            }
        );

        assert_eq!(loader.clear_queue(), 2);
        gate.add_permits(2);

        let mut ok = 0;
        let mut cancelled = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LoadError::Cancelled) => cancelled += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((ok, cancelled), (2, 2));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.queue_stats().active, 0);
    }

    #[test]
    fn backoff_doubles() {
        let config = LoaderConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(250));
        assert_eq!(config.backoff(2), Duration::from_millis(500));
        assert_eq!(config.backoff(3), Duration::from_millis(1000));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"timeout_ms": 5000, "max_concurrent": 3}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.max_concurrent, Some(3));
        assert_eq!(config.max_retries, 2);
    }
}
