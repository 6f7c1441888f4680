//! Ouvidoria filters
//!
//! Typed filter predicates and the [`GlobalFilterStore`] that every chart,
//! KPI card and page loader reads from.
//!
//! # Example
//!
//! ```rust
//! use ouv_filter::{DashboardBus, FilterField, GlobalFilterStore};
//!
//! let store = GlobalFilterStore::with_default_debounce(DashboardBus::new());
//! store.apply(FilterField::Tema, "Saneamento", false);
//! assert!(store.is_active(FilterField::Tema, None));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod events;
pub mod filter;
pub mod request;
pub mod store;

pub use error::FilterError;
pub use events::{DashboardBus, DashboardEvent, CHART_CLICKED, FILTERS_CHANGED};
pub use filter::{matches_all, Filter, FilterField, FilterOp};
pub use request::{FilterRequest, FILTER_AGGREGATED_ENDPOINT, FILTER_ENDPOINT};
pub use store::{GlobalFilterStore, DEFAULT_FILTER_DEBOUNCE};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
