//! Offline dashboard simulation
//!
//! [`MemoryFetcher`] answers the dashboard API from an in-memory set of
//! manifestation records, and [`run_simulation`] drives the whole
//! click → filter → page reload cycle against it.

use crate::charts::{ChartKind, ChartSpec, HeadlessChartFactory};
use crate::config::DashboardConfig;
use crate::context::DashboardContext;
use crate::crossfilter::Crossfilter;
use crate::error::Result;
use crate::pages::PageLoader;
use async_trait::async_trait;
use indexmap::IndexMap;
use ouv_filter::{matches_all, Filter, FilterField, FilterRequest};
use ouv_loader::{FetchError, Fetcher, LoadRequest, Method};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const AGGREGATE_PREFIX: &str = "/api/aggregate/";

/// Fetcher serving the dashboard API from memory
///
/// Routes:
/// - `GET /api/summary` → `{ "total": n }`
/// - `GET /api/aggregate/<field>` → `[{ "label", "count" }]`, most frequent first
/// - `POST /api/filter` → matching records
/// - `POST /api/filter/aggregated` → the `originalUrl` route over matching records
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    records: Vec<Value>,
    calls: AtomicU64,
}

impl MemoryFetcher {
    /// Fetcher over `records`
    #[must_use]
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            calls: AtomicU64::new(0),
        }
    }

    /// Fetcher over a small built-in dataset
    #[must_use]
    pub fn sample() -> Self {
        Self::new(sample_records())
    }

    /// Requests answered so far
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn route(&self, path: &str, filters: &[Filter]) -> std::result::Result<Value, FetchError> {
        let path = path.split('?').next().unwrap_or_default();
        let records = self
            .records
            .iter()
            .filter(|record| matches_all(filters, record));

        if path == "/api/summary" {
            return Ok(json!({ "total": records.count() }));
        }
        if let Some(name) = path.strip_prefix(AGGREGATE_PREFIX) {
            let field: FilterField = name
                .parse()
                .map_err(|_| FetchError::http(404, path))?;
            return Ok(count_by(records, field));
        }
        Err(FetchError::http(404, path))
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &LoadRequest) -> std::result::Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        match request.method {
            Method::Get => self.route(&request.path, &[]),
            Method::Post => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let body: FilterRequest = serde_json::from_value(body)
                    .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
                match body.original_url.as_deref() {
                    Some(original) => self.route(original, &body.filters),
                    None => Ok(Value::Array(
                        self.records
                            .iter()
                            .filter(|record| matches_all(&body.filters, record))
                            .cloned()
                            .collect(),
                    )),
                }
            }
        }
    }
}

fn count_by<'a>(records: impl Iterator<Item = &'a Value>, field: FilterField) -> Value {
    let mut counts: IndexMap<String, u64> = IndexMap::new();
    for record in records {
        let values = match record.get(field.api_name()) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        };
        for value in values {
            let label = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            *counts.entry(label).or_default() += 1;
        }
    }
    counts.sort_by(|la, ca, lb, cb| cb.cmp(ca).then_with(|| la.cmp(lb)));
    counts
        .into_iter()
        .map(|(label, count)| json!({ "label": label, "count": count }))
        .collect()
}

fn sample_records() -> Vec<Value> {
    let rows = [
        ("Saneamento", "Reclamação", "Telefone", "Centro", "Em andamento"),
        ("Saneamento", "Reclamação", "Internet", "Jardim América", "Concluída"),
        ("Saneamento", "Solicitação", "Presencial", "Centro", "Em andamento"),
        ("Iluminação", "Reclamação", "Internet", "Vila Nova", "Concluída"),
        ("Iluminação", "Elogio", "Telefone", "Centro", "Concluída"),
        ("Saúde", "Reclamação", "Presencial", "Jardim América", "Vencida"),
        ("Saúde", "Denúncia", "Internet", "Vila Nova", "Em andamento"),
        ("Transporte", "Sugestão", "Internet", "Centro", "Concluída"),
    ];
    rows.iter()
        .enumerate()
        .map(|(i, (tema, tipo, canal, bairro, status))| {
            json!({
                "protocolo": format!("2024{:05}", i + 1),
                "tema": tema,
                "tipoDeManifestacao": tipo,
                "canal": canal,
                "bairro": bairro,
                "status": status,
                "orgaos": if *tema == "Saneamento" { json!(["SEMAE", "SEMOB"]) } else { json!(["SEMOB"]) },
            })
        })
        .collect()
}

/// One page reload observed during a simulation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageReload {
    /// Page key
    pub page: String,
    /// Filters the page reloaded with
    pub filters: Vec<Filter>,
    /// Endpoint the page displays
    pub endpoint: String,
    /// Payload received, or the error text
    pub outcome: std::result::Result<Value, String>,
}

/// Page that reloads one endpoint through the crossfilter adapter
#[derive(Debug)]
pub struct EndpointPage {
    name: String,
    endpoint: String,
    crossfilter: Crossfilter,
    log: Arc<Mutex<Vec<PageReload>>>,
}

impl EndpointPage {
    /// Page `name` showing `endpoint`, appending reloads to `log`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        crossfilter: Crossfilter,
        log: Arc<Mutex<Vec<PageReload>>>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            crossfilter,
            log,
        }
    }
}

#[async_trait]
impl PageLoader for EndpointPage {
    async fn load(&self, filters: &[Filter]) -> anyhow::Result<()> {
        let result = self
            .crossfilter
            .load_with(filters.to_vec(), &self.endpoint)
            .await;
        let outcome = match &result {
            Ok(value) => Ok(Value::clone(value)),
            Err(error) => Err(error.to_string()),
        };
        self.log.lock().push(PageReload {
            page: self.name.clone(),
            filters: filters.to_vec(),
            endpoint: self.endpoint.clone(),
            outcome,
        });
        result.map(|_| ()).map_err(Into::into)
    }
}

/// What a simulation run observed
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Label clicked on the theme chart
    pub clicked: String,
    /// Filter set after the click settled
    pub filters: Vec<Filter>,
    /// Page reloads, in completion order
    pub reloads: Vec<PageReload>,
    /// Network calls the loader made
    pub network_calls: u64,
}

impl SimulationReport {
    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = format!("Clicked: {}\n", self.clicked);
        let active: Vec<_> = self.filters.iter().map(Filter::describe).collect();
        out.push_str(&format!("Active filters: {}\n", active.join(", ")));
        out.push_str(&format!("Network calls: {}\n", self.network_calls));
        for reload in &self.reloads {
            match &reload.outcome {
                Ok(value) => out.push_str(&format!(
                    "  {} ({}) reloaded with {} filter(s): {value}\n",
                    reload.page,
                    reload.endpoint,
                    reload.filters.len()
                )),
                Err(error) => out.push_str(&format!(
                    "  {} ({}) failed: {error}\n",
                    reload.page, reload.endpoint
                )),
            }
        }
        out
    }
}

/// Render the theme chart, click `label` on it and wait for the pages
///
/// # Errors
/// Fails if the context cannot be built or the initial chart load fails.
pub async fn run_simulation(config: DashboardConfig, label: &str) -> Result<SimulationReport> {
    let settle = config.filter_debounce() + config.page_debounce() + Duration::from_millis(200);
    let ctx = DashboardContext::new(config, Arc::new(MemoryFetcher::sample()))?;
    let factory = HeadlessChartFactory::new();

    let rows = ctx.loader().get("/api/aggregate/tema").await?;
    let spec = ChartSpec::from_rows("chart-tema", ChartKind::Bar, &rows).filtering_by(FilterField::Tema);
    ctx.chart_communication().render_chart(&factory, &spec);

    let log = Arc::new(Mutex::new(Vec::new()));
    for (page, endpoint) in [
        ("visao-geral", "/api/summary"),
        ("canais", "/api/aggregate/canal"),
        ("bairros", "/api/aggregate/bairro"),
    ] {
        let loader = EndpointPage::new(page, endpoint, ctx.crossfilter().clone(), Arc::clone(&log));
        ctx.create_page_filter_listener(page, Arc::new(loader));
    }

    ctx.chart_communication()
        .handle_chart_click("chart-tema", label, false);
    tokio::time::sleep(settle).await;

    let reloads = log.lock().clone();
    Ok(SimulationReport {
        clicked: label.to_string(),
        filters: ctx.filters().filters(),
        reloads,
        network_calls: ctx.loader().network_calls(),
    })
}
