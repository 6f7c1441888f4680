//! Chart ↔ filter glue
//!
//! [`ChartCommunication`] is what chart code talks to: it renders through a
//! [`ChartFactory`], keeps the registry in sync and turns clicks into filter
//! toggles on the shared store.

use crate::charts::{ChartFactory, ChartHandle, ChartRegistry, ChartSpec};
use ouv_bus::Subscription;
use ouv_filter::{DashboardEvent, Filter, FilterField, GlobalFilterStore, CHART_CLICKED};
use serde_json::Value;
use std::sync::Arc;

/// Result of a chart click
#[derive(Debug, Clone, PartialEq)]
pub struct ClickOutcome {
    /// Field the click filtered by
    pub field: FilterField,
    /// Clicked label
    pub value: Value,
    /// Whether the filter is active after the click
    pub active: bool,
}

/// Chart-facing facade over the registry and the filter store
#[derive(Debug, Clone)]
pub struct ChartCommunication {
    filters: GlobalFilterStore,
    registry: Arc<ChartRegistry>,
}

impl ChartCommunication {
    /// Facade over `filters` and `registry`
    #[must_use]
    pub fn new(filters: GlobalFilterStore, registry: Arc<ChartRegistry>) -> Self {
        Self { filters, registry }
    }

    /// Render `spec` and register the chart under its element id
    ///
    /// Any chart already registered under the id is destroyed. Returns
    /// `None` when the factory could not render.
    pub fn render_chart(
        &self,
        factory: &dyn ChartFactory,
        spec: &ChartSpec,
    ) -> Option<Arc<dyn ChartHandle>> {
        let Some(handle) = factory.create_chart(spec) else {
            tracing::warn!(chart_id = %spec.element_id, "chart factory declined to render");
            return None;
        };
        let field = spec.options.field.filter(|_| spec.options.clickable);
        self.registry
            .register(spec.element_id.clone(), Arc::clone(&handle), field);
        Some(handle)
    }

    /// Toggle the filter behind a click on `label` in `chart_id`
    ///
    /// Charts without a bound field ignore clicks and return `None`.
    pub fn handle_chart_click(
        &self,
        chart_id: &str,
        label: impl Into<Value>,
        multi_select: bool,
    ) -> Option<ClickOutcome> {
        let value = label.into();
        let Some(field) = self.registry.field_of(chart_id) else {
            tracing::debug!(%chart_id, "click on chart without filter binding ignored");
            return None;
        };

        let active = self.filters.toggle(field, value.clone(), multi_select);
        tracing::info!(%chart_id, %field, %value, active, "chart click");

        self.filters.bus().emit(
            CHART_CLICKED,
            &DashboardEvent::ChartClicked {
                chart_id: chart_id.to_string(),
                field: Some(field),
                value: value.clone(),
            },
        );

        Some(ClickOutcome {
            field,
            value,
            active,
        })
    }

    /// Listen to chart clicks
    pub fn on_chart_click<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, FilterField, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.filters.bus().on(CHART_CLICKED, move |event| match event {
            DashboardEvent::ChartClicked {
                chart_id,
                field: Some(field),
                value,
            } => callback(chart_id, *field, value),
            _ => Ok(()),
        })
    }

    /// Current filter snapshot
    #[must_use]
    pub fn filters(&self) -> Vec<Filter> {
        self.filters.filters()
    }

    /// Remove every filter and notify immediately
    pub fn clear_filters(&self) {
        self.filters.clear();
    }

    /// Destroy and unregister a page's charts; returns how many existed
    pub fn destroy_page_charts(&self, chart_ids: &[&str]) -> usize {
        chart_ids
            .iter()
            .filter(|id| self.registry.unregister(id))
            .count()
    }

    /// Registry the facade keeps in sync
    #[must_use]
    pub fn registry(&self) -> &Arc<ChartRegistry> {
        &self.registry
    }

    /// Filter store clicks are applied to
    #[must_use]
    pub fn filter_store(&self) -> &GlobalFilterStore {
        &self.filters
    }
}
