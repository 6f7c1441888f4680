//! Ouvidoria dashboard core
//!
//! Wires the bus, filter store, cache policy, data store and loader into a
//! [`DashboardContext`], and adds the chart-facing pieces:
//! - Chart registry and factory contract
//! - Click-to-filter facade
//! - Per-page debounced reload listeners
//! - Filter-aware request rewriting
//!
//! # Example
//!
//! ```rust,ignore
//! use ouv_core::{ChartKind, ChartSpec, DashboardConfig, DashboardContext, HeadlessChartFactory};
//! use ouv_filter::FilterField;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = DashboardContext::connect(DashboardConfig::default().with_env_overrides())?;
//! let factory = HeadlessChartFactory::new();
//!
//! let rows = ctx.loader().get("/api/aggregate/tema").await?;
//! let spec = ChartSpec::from_rows("chart-tema", ChartKind::Bar, &rows)
//!     .filtering_by(FilterField::Tema);
//! ctx.chart_communication().render_chart(&factory, &spec);
//!
//! ctx.chart_communication().handle_chart_click("chart-tema", "Saneamento", false);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod charts;
pub mod communication;
pub mod config;
pub mod context;
pub mod crossfilter;
pub mod error;
pub mod pages;
pub mod simulation;

pub use charts::{
    ChartFactory, ChartHandle, ChartKind, ChartOptions, ChartRegistration, ChartRegistry,
    ChartSpec, HeadlessChart, HeadlessChartFactory,
};
pub use communication::{ChartCommunication, ClickOutcome};
pub use config::{DashboardConfig, StoreConfig, API_BASE_URL_ENV};
pub use context::DashboardContext;
pub use crossfilter::Crossfilter;
pub use error::{DashboardError, Result};
pub use pages::{PageListenerConfig, PageListeners, PageLoader};
pub use simulation::{run_simulation, EndpointPage, MemoryFetcher, PageReload, SimulationReport};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for dashboard code
    pub use crate::{
        ChartCommunication, ChartFactory, ChartKind, ChartSpec, DashboardConfig,
        DashboardContext, PageLoader,
    };
    pub use ouv_filter::{Filter, FilterField, GlobalFilterStore};
    pub use ouv_loader::{DataLoader, LoadOptions, LoadRequest};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
