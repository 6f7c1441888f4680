//! Ouvidoria cache layer
//!
//! - [`CachePolicy`]: endpoint → TTL resolution (exact, wildcard, category,
//!   default), loaded once per process
//! - [`DataStore`]: the only place API payloads are cached
//!
//! # Architecture
//!
//! ```text
//! DataLoader ──set(key, payload)──▶ DataStore ──ttl(key)──▶ CachePolicy
//!                                      │
//!                                      └──▶ per-key subscribers
//! ```
//!
//! # Example
//!
//! ```rust
//! use ouv_cache::CachePolicy;
//! use std::time::Duration;
//!
//! let policy = CachePolicy::dashboard_defaults();
//! assert_eq!(policy.ttl("/api/dashboard-data"), Duration::from_secs(5));
//! assert_eq!(policy.ttl("/api/totally-unknown"), policy.default_ttl());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod policy;
pub mod store;

pub use error::PolicyError;
pub use policy::{normalize_key, CachePolicy, CachePolicyConfig, CategoryRule, TtlSource};
pub use store::{CacheEntry, CopyPolicy, DataStore, SetOptions, StoreStats, MAX_TTL};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
