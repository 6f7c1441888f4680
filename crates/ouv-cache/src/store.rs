//! Data store: the only cache of API payloads
//!
//! Entries live in a bounded moka cache. Each entry carries its own TTL
//! (resolved from the [`CachePolicy`] unless the writer supplies one) and an
//! `expires_at` deadline on tokio's clock; a read at or past the deadline is
//! a miss and evicts the entry.
//!
//! Payloads are handed out as `Arc<Value>`, which callers cannot mutate in
//! place. The copy policy decides whether the store shares the writer's
//! allocation or detaches a private deep copy; large payloads are detached so
//! a writer that later obtains unique ownership (`Arc::get_mut`) of its own
//! handle cannot change what other readers see.

use crate::policy::CachePolicy;
use moka::future::Cache;
use moka::Expiry;
use ouv_bus::{EventBus, Subscription};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Serialized size above which `CopyPolicy::Auto` deep-copies
pub const DEFAULT_DEEP_COPY_THRESHOLD: usize = 5 * 1024;

/// Default maximum number of cached payloads
pub const DEFAULT_MAX_ENTRIES: u64 = 1_000;

/// Longest TTL an entry is stored with; longer requests are clamped
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// How `set` treats the writer's allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyPolicy {
    /// Share below the size threshold, deep-copy above it
    #[default]
    Auto,
    /// Always share the writer's allocation
    Shallow,
    /// Always store a private deep copy
    Deep,
}

/// Options for [`DataStore::set`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Explicit TTL; the policy TTL for the key is used when `None`
    pub ttl: Option<Duration>,
    /// Copy policy
    pub copy: CopyPolicy,
}

impl SetOptions {
    /// Options with an explicit TTL
    #[inline]
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Override the copy policy
    #[inline]
    #[must_use]
    pub fn copy(mut self, copy: CopyPolicy) -> Self {
        self.copy = copy;
        self
    }
}

/// One cached payload
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Payload
    pub value: Arc<Value>,
    /// TTL the entry was written with
    pub ttl: Duration,
    /// Write time
    pub stored_at: Instant,
    /// `stored_at + ttl`
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Whether the deadline has passed
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before the entry expires
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live entries (approximate)
    pub entries: u64,
    /// Reads that returned a payload
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Reads that found an expired entry
    pub expired: u64,
    /// Successful writes
    pub writes: u64,
}

struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
}

struct StoreInner {
    entries: Cache<String, CacheEntry>,
    policy: Arc<CachePolicy>,
    subscribers: EventBus<Arc<Value>>,
    deep_copy_threshold: usize,
    counters: Counters,
}

/// Single source of cached API responses
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<StoreInner>,
}

impl DataStore {
    /// Create a store bounded to `max_entries`
    #[must_use]
    pub fn new(policy: Arc<CachePolicy>, max_entries: u64, deep_copy_threshold: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            inner: Arc::new(StoreInner {
                entries,
                policy,
                subscribers: EventBus::new(),
                deep_copy_threshold,
                counters: Counters::default(),
            }),
        }
    }

    /// Create a store with default capacity and copy threshold
    #[must_use]
    pub fn with_policy(policy: Arc<CachePolicy>) -> Self {
        Self::new(policy, DEFAULT_MAX_ENTRIES, DEFAULT_DEEP_COPY_THRESHOLD)
    }

    /// Live payload for `key`
    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.entry(key).await.map(|entry| entry.value)
    }

    /// Live entry for `key`, including its deadline
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let counters = &self.inner.counters;
        let Some(entry) = self.inner.entries.get(key).await else {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            counters.expired.fetch_add(1, Ordering::Relaxed);
            self.inner.entries.invalidate(key).await;
            tracing::debug!(key, "cache entry expired");
            return None;
        }

        counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Whether `key` has a live entry
    pub async fn contains(&self, key: &str) -> bool {
        self.inner
            .entries
            .get(key)
            .await
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Store `value` under `key` and notify the key's subscribers
    ///
    /// Returns the payload as stored (shared or detached per copy policy).
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Arc<Value>>,
        options: SetOptions,
    ) -> Arc<Value> {
        let value = value.into();
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.inner.policy.ttl(key))
            .min(MAX_TTL);

        let deep = match options.copy {
            CopyPolicy::Deep => true,
            CopyPolicy::Shallow => false,
            CopyPolicy::Auto => exceeds_size(&value, self.inner.deep_copy_threshold),
        };
        let stored = if deep {
            Arc::new(Value::clone(&value))
        } else {
            value
        };

        let stored_at = Instant::now();
        let entry = CacheEntry {
            value: Arc::clone(&stored),
            ttl,
            stored_at,
            expires_at: stored_at + ttl,
        };
        self.inner.entries.insert(key.to_string(), entry).await;
        self.inner.counters.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, ?ttl, deep, "cache entry stored");

        self.inner.subscribers.emit(key, &stored);
        stored
    }

    /// Call `callback` after every successful `set` of `key`
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Arc<Value>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.on(key, callback)
    }

    /// Number of subscribers for `key`
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscribers.listener_count(key)
    }

    /// Drop one entry, or every entry when `key` is `None`
    pub async fn clear(&self, key: Option<&str>) {
        match key {
            Some(key) => self.inner.entries.invalidate(key).await,
            None => {
                self.inner.entries.invalidate_all();
                self.inner.entries.run_pending_tasks().await;
                tracing::info!("data store cleared");
            }
        }
    }

    /// Default TTL; always the policy's default
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.policy.default_ttl()
    }

    /// Policy used to resolve TTLs
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &Arc<CachePolicy> {
        &self.inner.policy
    }

    /// Cache statistics
    pub async fn stats(&self) -> StoreStats {
        self.inner.entries.run_pending_tasks().await;
        let counters = &self.inner.counters;
        StoreStats {
            entries: self.inner.entries.entry_count(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            expired: counters.expired.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("entries", &self.inner.entries.entry_count())
            .field("default_ttl", &self.default_ttl())
            .field("deep_copy_threshold", &self.inner.deep_copy_threshold)
            .finish_non_exhaustive()
    }
}

/// Whether the JSON encoding of `value` is longer than `limit` bytes
///
/// Walks the value with a running budget instead of serializing it, and stops
/// as soon as the budget is exhausted.
fn exceeds_size(value: &Value, limit: usize) -> bool {
    fn spend(budget: &mut usize, n: usize) -> bool {
        if n > *budget {
            *budget = 0;
            true
        } else {
            *budget -= n;
            false
        }
    }

    fn walk(value: &Value, budget: &mut usize) -> bool {
        match value {
            Value::Null => spend(budget, 4),
            Value::Bool(b) => spend(budget, if *b { 4 } else { 5 }),
            Value::Number(n) => spend(budget, n.to_string().len()),
            Value::String(s) => spend(budget, s.len() + 2),
            Value::Array(items) => {
                spend(budget, items.len().max(1) + 1)
                    || items.iter().any(|item| walk(item, budget))
            }
            Value::Object(map) => {
                spend(budget, map.len().max(1) * 2 + 1)
                    || map
                        .iter()
                        .any(|(k, v)| spend(budget, k.len() + 2) || walk(v, budget))
            }
        }
    }

    let mut budget = limit;
    walk(value, &mut budget)
}
