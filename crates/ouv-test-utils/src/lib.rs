//! Testing utilities for the Ouvidoria dashboard workspace
//!
//! Shared fakes and fixtures: a scripted [`Fetcher`], a recording
//! [`PageLoader`] and a small manifestation dataset.

#![allow(missing_docs)]

use async_trait::async_trait;
use ouv_core::{DashboardConfig, DashboardContext, PageLoader};
use ouv_filter::{matches_all, Filter, FilterRequest};
use ouv_loader::{FetchError, Fetcher, LoadRequest, Method};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fetcher with scripted replies and a request log
///
/// Replies queued with [`reply`](Self::reply) are consumed per path in
/// order. Without a scripted reply, POST filter bodies are answered from
/// the record set and anything else echoes the request.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, VecDeque<Result<Value, FetchError>>>>,
    records: Vec<Value>,
    delay: Duration,
    log: Mutex<Vec<LoadRequest>>,
    calls: AtomicU64,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer filter requests from `records`
    pub fn with_records(mut self, records: Vec<Value>) -> Self {
        self.records = records;
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a reply for `path`
    pub fn reply(&self, path: &str, reply: Result<Value, FetchError>) -> &Self {
        self.replies
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<LoadRequest> {
        self.log.lock().clone()
    }

    /// Requests whose path is `path`
    pub fn requests_to(&self, path: &str) -> Vec<LoadRequest> {
        self.log
            .lock()
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_reply(&self, request: &LoadRequest) -> Result<Value, FetchError> {
        if request.method == Method::Get {
            return Ok(json!({ "path": request.path }));
        }
        let body: FilterRequest = serde_json::from_value(request.body.clone().unwrap_or_default())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        let matching: Vec<Value> = self
            .records
            .iter()
            .filter(|record| matches_all(&body.filters, record))
            .cloned()
            .collect();
        Ok(json!({
            "originalUrl": body.original_url,
            "filters": body.filters,
            "total": matching.len(),
            "records": matching,
        }))
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &LoadRequest) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .replies
            .lock()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default_reply(request))
    }
}

/// Page loader that records every filter snapshot it is called with
#[derive(Debug, Default)]
pub struct RecordingPageLoader {
    calls: Mutex<Vec<Vec<Filter>>>,
    fail: bool,
}

impl RecordingPageLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Loader that records, then fails
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<Vec<Filter>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Filters of the most recent call
    pub fn last(&self) -> Option<Vec<Filter>> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl PageLoader for RecordingPageLoader {
    async fn load(&self, filters: &[Filter]) -> anyhow::Result<()> {
        self.calls.lock().push(filters.to_vec());
        if self.fail {
            anyhow::bail!("page backend unavailable");
        }
        Ok(())
    }
}

/// A handful of manifestation records
pub fn sample_records() -> Vec<Value> {
    vec![
        json!({"protocolo": "202400001", "tema": "Saneamento", "canal": "Telefone", "bairro": "Centro", "orgaos": ["SEMAE"]}),
        json!({"protocolo": "202400002", "tema": "Saneamento", "canal": "Internet", "bairro": "Vila Nova", "orgaos": ["SEMAE", "SEMOB"]}),
        json!({"protocolo": "202400003", "tema": "Iluminação", "canal": "Internet", "bairro": "Centro", "orgaos": ["SEMOB"]}),
        json!({"protocolo": "202400004", "tema": "Saúde", "canal": "Presencial", "bairro": "Jardim América", "orgaos": ["SMS"]}),
    ]
}

/// Default configuration with a fixed loader ceiling
pub fn test_config() -> DashboardConfig {
    let loader = ouv_loader::LoaderConfig::default().with_max_concurrent(4);
    DashboardConfig::default().with_loader(loader)
}

/// Context over `fetcher` with [`test_config`]
pub fn setup_test_context(fetcher: Arc<ScriptedFetcher>) -> DashboardContext {
    DashboardContext::new(test_config(), fetcher).expect("default policy is valid")
}

/// Let paused-clock timers fire and spawned tasks settle
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
