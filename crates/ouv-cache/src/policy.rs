//! TTL policy
//!
//! One table maps endpoint paths to time-to-live. Resolution order:
//!
//! 1. exact path match
//! 2. first wildcard pattern that matches, in table order (`*` stands for
//!    exactly one non-empty path segment)
//! 3. category default, by path prefix, in table order
//! 4. global default
//!
//! All durations are milliseconds in the policy document. Server-side
//! consumers read the same document through [`CachePolicy::server_table_secs`]
//! instead of keeping a second copy in seconds.

use crate::error::PolicyError;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Global default TTL of the built-in table (5 minutes)
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Serialized form of the policy (`cache` table of the dashboard config)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicyConfig {
    /// TTL for anything no other rule covers
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Endpoint (exact or single-`*` wildcard) → TTL, order significant
    #[serde(default)]
    pub endpoints: IndexMap<String, u64>,

    /// Prefix-based category defaults, order significant
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

/// Category default applied by path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Category name, for diagnostics
    pub name: String,
    /// Path prefix the category covers
    pub prefix: String,
    /// TTL in milliseconds
    pub ttl_ms: u64,
}

impl CategoryRule {
    fn new(name: &str, prefix: &str, ttl_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            ttl_ms,
        }
    }
}

impl Default for CachePolicyConfig {
    /// The dashboard's built-in table
    fn default() -> Self {
        const MINUTE: u64 = 60 * 1000;

        let endpoints = [
            ("/api/dashboard-data", 5_000),
            ("/api/summary", MINUTE),
            ("/api/notifications", 30_000),
            ("/api/distritos", 30 * MINUTE),
            ("/api/distinct", 10 * MINUTE),
            ("/api/metadata/filter-options", 30 * MINUTE),
            ("/api/sla/iniciais", 5 * MINUTE),
            ("/api/stats/status-overview", 5 * MINUTE),
            ("/api/unit/*", 10 * MINUTE),
            ("/api/distritos/*", 30 * MINUTE),
            ("/api/aggregate/*", 10 * MINUTE),
            ("/api/stats/*", 5 * MINUTE),
        ]
        .into_iter()
        .map(|(path, ttl)| (path.to_string(), ttl))
        .collect();

        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            endpoints,
            categories: vec![
                CategoryRule::new("filter", "/api/filter", 2 * MINUTE),
                CategoryRule::new("aggregate", "/api/aggregate/", 10 * MINUTE),
                CategoryRule::new("stats", "/api/stats/", 5 * MINUTE),
                CategoryRule::new("ai", "/api/ai/", 60 * MINUTE),
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct WildcardRule {
    pattern: String,
    matcher: Regex,
    ttl: Duration,
}

/// Which rule produced a TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlSource<'a> {
    /// Exact endpoint entry
    Exact,
    /// Wildcard entry (pattern)
    Wildcard(&'a str),
    /// Category default (category name)
    Category(&'a str),
    /// Global default
    Default,
}

/// Compiled, immutable TTL policy
#[derive(Debug, Clone)]
pub struct CachePolicy {
    exact: HashMap<String, Duration>,
    wildcards: Vec<WildcardRule>,
    categories: Vec<(CategoryRule, Duration)>,
    default_ttl: Duration,
    config: CachePolicyConfig,
}

impl CachePolicy {
    /// Compile a policy document
    ///
    /// # Errors
    /// `PolicyError::InvalidPattern` for patterns with more than one `*` or a
    /// `*` that is not a whole path segment.
    pub fn from_config(config: CachePolicyConfig) -> Result<Self, PolicyError> {
        let mut exact = HashMap::new();
        let mut wildcards = Vec::new();

        for (pattern, ttl_ms) in &config.endpoints {
            let ttl = Duration::from_millis(*ttl_ms);
            if pattern.contains('*') {
                wildcards.push(WildcardRule {
                    pattern: pattern.clone(),
                    matcher: compile_wildcard(pattern)?,
                    ttl,
                });
            } else {
                exact.insert(normalize_key(pattern).to_string(), ttl);
            }
        }

        let categories = config
            .categories
            .iter()
            .map(|rule| (rule.clone(), Duration::from_millis(rule.ttl_ms)))
            .collect();

        Ok(Self {
            exact,
            wildcards,
            categories,
            default_ttl: Duration::from_millis(config.default_ttl_ms),
            config,
        })
    }

    /// The dashboard's built-in table
    #[must_use]
    pub fn dashboard_defaults() -> Self {
        Self::from_config(CachePolicyConfig::default())
            .expect("built-in cache policy patterns are valid")
    }

    /// Parse a TOML policy document
    ///
    /// # Errors
    /// Parse errors and invalid patterns.
    pub fn from_toml_str(document: &str) -> Result<Self, PolicyError> {
        let config: CachePolicyConfig = toml::from_str(document)?;
        Self::from_config(config)
    }

    /// Read a TOML policy document from disk
    ///
    /// # Errors
    /// IO errors, parse errors and invalid patterns.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    /// TTL for a request key (path, URL or `METHOD path` signature)
    #[must_use]
    pub fn ttl(&self, key: &str) -> Duration {
        self.resolve(key).0
    }

    /// TTL together with the rule that produced it
    #[must_use]
    pub fn resolve(&self, key: &str) -> (Duration, TtlSource<'_>) {
        let path = normalize_key(key);
        if path.is_empty() {
            return (self.default_ttl, TtlSource::Default);
        }

        if let Some(ttl) = self.exact.get(path) {
            return (*ttl, TtlSource::Exact);
        }

        if let Some(rule) = self.wildcards.iter().find(|r| r.matcher.is_match(path)) {
            return (rule.ttl, TtlSource::Wildcard(&rule.pattern));
        }

        if let Some((rule, ttl)) = self
            .categories
            .iter()
            .find(|(rule, _)| path.starts_with(&rule.prefix))
        {
            return (*ttl, TtlSource::Category(&rule.name));
        }

        (self.default_ttl, TtlSource::Default)
    }

    /// Global default TTL
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The document this policy was compiled from
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CachePolicyConfig {
        &self.config
    }

    /// Same table in whole seconds (rounded up), for server-side consumers
    ///
    /// Endpoints first (table order), then `category:<name>` rows, then
    /// `default`.
    #[must_use]
    pub fn server_table_secs(&self) -> Vec<(String, u64)> {
        let secs = |ms: u64| ms.div_ceil(1000);
        self.config
            .endpoints
            .iter()
            .map(|(pattern, ms)| (pattern.clone(), secs(*ms)))
            .chain(
                self.config
                    .categories
                    .iter()
                    .map(|rule| (format!("category:{}", rule.name), secs(rule.ttl_ms))),
            )
            .chain(std::iter::once((
                "default".to_string(),
                secs(self.config.default_ttl_ms),
            )))
            .collect()
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::dashboard_defaults()
    }
}

/// Reduce a URL or request signature to its path
///
/// `GET /api/x?y=1` → `/api/x`, `https://host/api/x/` → `/api/x`
#[must_use]
pub fn normalize_key(key: &str) -> &str {
    let mut path = key.trim();

    // Method prefix of a request signature
    if let Some((method, rest)) = path.split_once(' ') {
        if !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase()) {
            path = rest.trim_start();
        }
    }

    if let Some(index) = path.find(['?', '#']) {
        path = &path[..index];
    }

    // Scheme and authority; `://` only counts ahead of the first slash
    if let Some(index) = path.find("://") {
        if path.find('/') == Some(index + 1) {
            let after = &path[index + 3..];
            path = after.find('/').map_or("", |slash| &after[slash..]);
        }
    }

    if path.len() > 1 {
        path = path.trim_end_matches('/');
    }
    path
}

fn compile_wildcard(pattern: &str) -> Result<Regex, PolicyError> {
    let pattern = normalize_key(pattern);
    let Some((prefix, suffix)) = pattern.split_once('*') else {
        return Err(PolicyError::invalid_pattern(pattern, "no wildcard"));
    };
    if suffix.contains('*') {
        return Err(PolicyError::invalid_pattern(pattern, "only one '*' allowed"));
    }
    if !prefix.ends_with('/') || !(suffix.is_empty() || suffix.starts_with('/')) {
        return Err(PolicyError::invalid_pattern(
            pattern,
            "'*' must be a whole path segment",
        ));
    }

    let source = format!(
        "^{}[^/]+{}$",
        regex::escape(prefix),
        regex::escape(suffix)
    );
    Regex::new(&source).map_err(|e| PolicyError::invalid_pattern(pattern, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn dashboard_data_is_five_seconds() {
        let policy = CachePolicy::dashboard_defaults();
        assert_eq!(policy.ttl("/api/dashboard-data"), Duration::from_millis(5000));
    }

    #[test]
    fn distritos_is_thirty_minutes() {
        let policy = CachePolicy::dashboard_defaults();
        assert_eq!(policy.ttl("/api/distritos"), Duration::from_secs(30 * 60));
    }

    #[test]
    fn unit_wildcard_matches_one_segment() {
        let policy = CachePolicy::dashboard_defaults();
        let (ttl, source) = policy.resolve("/api/unit/123");
        assert_eq!(source, TtlSource::Wildcard("/api/unit/*"));
        assert_eq!(ttl, Duration::from_secs(10 * 60));

        // Two segments fall through to the default
        assert_eq!(policy.resolve("/api/unit/123/history").1, TtlSource::Default);
    }

    #[test]
    fn unknown_endpoint_uses_default() {
        let policy = CachePolicy::dashboard_defaults();
        assert_eq!(policy.ttl("/api/totally-unknown"), policy.default_ttl());
        assert_eq!(policy.default_ttl(), Duration::from_millis(DEFAULT_TTL_MS));
    }

    #[test]
    fn empty_key_uses_default() {
        let policy = CachePolicy::dashboard_defaults();
        assert_eq!(policy.resolve("  ").1, TtlSource::Default);
    }

    #[test]
    fn exact_beats_wildcard() {
        let policy = CachePolicy::dashboard_defaults();
        let (ttl, source) = policy.resolve("/api/stats/status-overview");
        assert_eq!(source, TtlSource::Exact);
        assert_eq!(ttl, Duration::from_secs(5 * 60));
    }

    #[test]
    fn category_covers_deeper_paths() {
        let policy = CachePolicy::dashboard_defaults();
        let (ttl, source) = policy.resolve("/api/filter/aggregated");
        assert_eq!(source, TtlSource::Category("filter"));
        assert_eq!(ttl, Duration::from_secs(2 * 60));

        assert_eq!(
            policy.resolve("/api/aggregate/by-month/2025").1,
            TtlSource::Category("aggregate")
        );
    }

    #[test]
    fn signatures_and_urls_are_normalized() {
        let policy = CachePolicy::dashboard_defaults();
        assert_eq!(policy.ttl("GET /api/dashboard-data?x=1"), Duration::from_millis(5000));
        assert_eq!(
            policy.ttl("https://ouvidoria.example/api/distritos/"),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(normalize_key("POST /api/filter#abc"), "/api/filter");
        assert_eq!(
            policy.ttl("/api/dashboard-data?redirect=https://host/x"),
            Duration::from_millis(5000)
        );
        assert_eq!(normalize_key("/api/summary#https://host/y"), "/api/summary");
        assert_eq!(normalize_key("/"), "/");
    }

    #[test]
    fn wildcard_table_order_is_significant() {
        let policy = CachePolicy::from_toml_str(
            r#"
            default_ttl_ms = 1000

            [endpoints]
            "/api/*/latest" = 10
            "/api/stats/*" = 20
            "#,
        )
        .unwrap();

        assert_eq!(policy.ttl("/api/stats/latest"), Duration::from_millis(10));
        assert_eq!(policy.ttl("/api/stats/monthly"), Duration::from_millis(20));
    }

    #[test]
    fn rejects_bad_patterns() {
        for bad in ["/api/*/x/*", "/api/un*", "/api/*x"] {
            let mut config = CachePolicyConfig::default();
            config.endpoints.insert(bad.to_string(), 1);
            assert!(matches!(
                CachePolicy::from_config(config),
                Err(PolicyError::InvalidPattern { .. })
            ));
        }
    }

    #[test]
    fn server_export_is_in_seconds() {
        let policy = CachePolicy::dashboard_defaults();
        let table = policy.server_table_secs();

        assert_eq!(table[0], ("/api/dashboard-data".to_string(), 5));
        assert!(table.contains(&("/api/distritos".to_string(), 1800)));
        assert!(table.contains(&("category:filter".to_string(), 120)));
        assert_eq!(table.last(), Some(&("default".to_string(), 300)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_ttl_ms = 60000\n[endpoints]\n\"/api/summary\" = 1500"
        )
        .unwrap();

        let policy = CachePolicy::from_file(file.path()).unwrap();
        assert_eq!(policy.ttl("/api/summary"), Duration::from_millis(1500));
        assert_eq!(policy.ttl("/api/other"), Duration::from_secs(60));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CachePolicy::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }
}
