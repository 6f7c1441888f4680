//! Chart registry and chart factory contract
//!
//! The registry maps chart ids to live handles and the filter field each
//! chart is bound to, so a click can be turned into a filter without the
//! chart knowing about the filter store. It never keeps entries for
//! destroyed handles: replacing or unregistering an id destroys the old one.

use dashmap::DashMap;
use ouv_filter::FilterField;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A rendered chart
pub trait ChartHandle: Send + Sync + fmt::Debug {
    /// Element id the chart was rendered into
    fn id(&self) -> &str;

    /// Release the chart; called at most once by the registry
    fn destroy(&self);
}

/// Chart type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Bar chart, vertical unless `horizontal` is set
    #[default]
    Bar,
    /// Line chart
    Line,
    /// Doughnut chart
    Doughnut,
}

/// Rendering options understood by every factory
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartOptions {
    /// Horizontal bars
    pub horizontal: bool,
    /// Palette index
    pub color_index: usize,
    /// Field a click on this chart filters by
    pub field: Option<FilterField>,
    /// Element id receiving a custom legend
    pub legend_container: Option<String>,
    /// Fill area under lines
    pub fill: bool,
    /// Line curve tension
    pub tension: Option<f64>,
    /// Whether clicks produce filters
    pub clickable: bool,
}

/// Everything a factory needs to draw one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Target element id, also the registry id
    pub element_id: String,
    /// Chart type
    pub kind: ChartKind,
    /// Category labels
    pub labels: Vec<Value>,
    /// One value per label
    pub values: Vec<f64>,
    /// Rendering options
    #[serde(default)]
    pub options: ChartOptions,
}

impl ChartSpec {
    /// Spec for a chart of `kind` in `element_id`
    #[must_use]
    pub fn new(element_id: impl Into<String>, kind: ChartKind) -> Self {
        Self {
            element_id: element_id.into(),
            kind,
            labels: Vec::new(),
            values: Vec::new(),
            options: ChartOptions::default(),
        }
    }

    /// With data points
    #[must_use]
    pub fn with_data(mut self, labels: Vec<Value>, values: Vec<f64>) -> Self {
        self.labels = labels;
        self.values = values;
        self
    }

    /// Clickable, filtering by `field`
    #[must_use]
    pub fn filtering_by(mut self, field: FilterField) -> Self {
        self.options.field = Some(field);
        self.options.clickable = true;
        self
    }

    /// Build from `[{label, count}]` rows as returned by aggregate endpoints
    #[must_use]
    pub fn from_rows(element_id: impl Into<String>, kind: ChartKind, rows: &Value) -> Self {
        let (labels, values) = rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let label = row.get("label")?.clone();
                        let count = row.get("count")?.as_f64()?;
                        Some((label, count))
                    })
                    .unzip()
            })
            .unwrap_or_default();
        Self::new(element_id, kind).with_data(labels, values)
    }
}

/// Chart rendering backend
pub trait ChartFactory: Send + Sync {
    /// Draw a chart; `None` when the backend cannot render it
    fn create_chart(&self, spec: &ChartSpec) -> Option<Arc<dyn ChartHandle>>;

    /// Destroy charts by id; unknown ids are ignored
    fn destroy_charts(&self, ids: &[&str]);

    /// Live chart by id
    fn get_chart(&self, id: &str) -> Option<Arc<dyn ChartHandle>>;
}

/// One registry entry
#[derive(Debug, Clone)]
pub struct ChartRegistration {
    /// Chart id
    pub chart_id: String,
    /// Live handle
    pub instance: Arc<dyn ChartHandle>,
    /// Field a click filters by
    pub field: Option<FilterField>,
}

/// Live charts by id
#[derive(Debug, Default)]
pub struct ChartRegistry {
    charts: DashMap<String, ChartRegistration>,
}

impl ChartRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` under `chart_id`
    ///
    /// A different handle already registered under the id is destroyed.
    pub fn register(
        &self,
        chart_id: impl Into<String>,
        instance: Arc<dyn ChartHandle>,
        field: Option<FilterField>,
    ) {
        let chart_id = chart_id.into();
        let registration = ChartRegistration {
            chart_id: chart_id.clone(),
            instance: Arc::clone(&instance),
            field,
        };
        let replaced = self.charts.insert(chart_id.clone(), registration);

        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old.instance, &instance) {
                old.instance.destroy();
                tracing::debug!(%chart_id, "replaced chart destroyed");
            }
        }
        tracing::debug!(%chart_id, ?field, "chart registered");
    }

    /// Remove and destroy; `false` when the id was unknown
    pub fn unregister(&self, chart_id: &str) -> bool {
        match self.charts.remove(chart_id) {
            Some((_, registration)) => {
                registration.instance.destroy();
                tracing::debug!(%chart_id, "chart unregistered");
                true
            }
            None => false,
        }
    }

    /// Registration for `chart_id`
    #[must_use]
    pub fn get(&self, chart_id: &str) -> Option<ChartRegistration> {
        self.charts.get(chart_id).map(|entry| entry.value().clone())
    }

    /// Field bound to `chart_id`
    #[must_use]
    pub fn field_of(&self, chart_id: &str) -> Option<FilterField> {
        self.charts.get(chart_id).and_then(|entry| entry.field)
    }

    /// All registrations, ordered by id
    #[must_use]
    pub fn get_all(&self) -> Vec<ChartRegistration> {
        let mut all: Vec<_> = self.charts.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| a.chart_id.cmp(&b.chart_id));
        all
    }

    /// Registrations bound to `field`, ordered by id
    #[must_use]
    pub fn get_by_field(&self, field: FilterField) -> Vec<ChartRegistration> {
        let mut bound: Vec<_> = self
            .charts
            .iter()
            .filter(|entry| entry.field == Some(field))
            .map(|entry| entry.value().clone())
            .collect();
        bound.sort_by(|a, b| a.chart_id.cmp(&b.chart_id));
        bound
    }

    /// Destroy and remove every chart
    pub fn clear(&self) -> usize {
        let ids: Vec<String> = self.charts.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.unregister(id)).count()
    }

    /// Number of registered charts
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.charts.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }
}

/// Chart that renders nowhere and remembers what it was asked to draw
#[derive(Debug)]
pub struct HeadlessChart {
    spec: ChartSpec,
    destroyed: AtomicBool,
}

impl HeadlessChart {
    /// Spec the chart was created from
    #[must_use]
    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    /// Whether `destroy` has been called
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl ChartHandle for HeadlessChart {
    fn id(&self) -> &str {
        &self.spec.element_id
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Factory for [`HeadlessChart`]s, used by the CLI and server-side rendering
#[derive(Debug, Default)]
pub struct HeadlessChartFactory {
    charts: Mutex<Vec<Arc<HeadlessChart>>>,
}

impl HeadlessChartFactory {
    /// Create new factory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chart created so far, destroyed ones included
    #[must_use]
    pub fn created(&self) -> Vec<Arc<HeadlessChart>> {
        self.charts.lock().clone()
    }

    /// Latest live chart with `id`
    #[must_use]
    pub fn live(&self, id: &str) -> Option<Arc<HeadlessChart>> {
        self.charts
            .lock()
            .iter()
            .rev()
            .find(|chart| chart.id() == id && !chart.is_destroyed())
            .cloned()
    }
}

impl ChartFactory for HeadlessChartFactory {
    fn create_chart(&self, spec: &ChartSpec) -> Option<Arc<dyn ChartHandle>> {
        if spec.labels.len() != spec.values.len() {
            tracing::warn!(
                chart_id = %spec.element_id,
                labels = spec.labels.len(),
                values = spec.values.len(),
                "label/value length mismatch, chart not rendered"
            );
            return None;
        }
        let chart = Arc::new(HeadlessChart {
            spec: spec.clone(),
            destroyed: AtomicBool::new(false),
        });
        self.charts.lock().push(Arc::clone(&chart));
        Some(chart)
    }

    fn destroy_charts(&self, ids: &[&str]) {
        for chart in self.charts.lock().iter() {
            if ids.iter().any(|id| *id == chart.id()) {
                chart.destroy();
            }
        }
    }

    fn get_chart(&self, id: &str) -> Option<Arc<dyn ChartHandle>> {
        self.live(id).map(|chart| chart as Arc<dyn ChartHandle>)
    }
}
