//! Ouvidoria data loader
//!
//! Request coalescing, a FIFO-queued concurrency ceiling, timeout and
//! bounded retry in front of the dashboard API. Payloads are cached only in
//! the [`ouv_cache::DataStore`] the loader writes through to.
//!
//! # Example
//!
//! ```rust,ignore
//! use ouv_loader::{DataLoader, HttpFetcher, LoaderConfig};
//!
//! # async fn example(store: ouv_cache::DataStore) -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = std::sync::Arc::new(HttpFetcher::new("http://localhost:3000")?);
//! let loader = DataLoader::new(fetcher, store, LoaderConfig::default());
//!
//! let summary = loader.get("/api/summary").await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod fetcher;
pub mod loader;
pub mod queue;
pub mod request;

pub use error::{FetchError, LoadError};
pub use fetcher::{Fetcher, HttpFetcher};
pub use loader::{DataLoader, LoadOptions, LoaderConfig, QueueStats};
pub use queue::{adaptive_concurrency, default_concurrency};
pub use request::{LoadRequest, Method};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
