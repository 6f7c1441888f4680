//! Dashboard-wide events carried on the shared bus

use crate::filter::{Filter, FilterField};
use ouv_bus::EventBus;
use serde_json::Value;

/// Emitted by the filter store once per debounce window (and on clear)
pub const FILTERS_CHANGED: &str = "filters:changed";

/// Emitted when a chart segment is clicked
pub const CHART_CLICKED: &str = "chart:clicked";

/// Payload of every dashboard event
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    /// Current filter set after a change
    FiltersChanged(Vec<Filter>),
    /// A chart segment was clicked
    ChartClicked {
        /// Registry id of the chart
        chart_id: String,
        /// Field the chart is bound to, if any
        field: Option<FilterField>,
        /// Clicked label
        value: Value,
    },
}

/// The bus type shared by all dashboard components
pub type DashboardBus = EventBus<DashboardEvent>;
