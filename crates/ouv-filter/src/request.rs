//! Outbound filter request bodies
//!
//! `POST /api/filter` returns matching records, `POST /api/filter/aggregated`
//! returns the payload `originalUrl` would have returned, recomputed over the
//! filtered records.

use crate::filter::Filter;
use serde::{Deserialize, Serialize};

/// Raw filtered records
pub const FILTER_ENDPOINT: &str = "/api/filter";

/// Aggregation of the original endpoint over filtered records
pub const FILTER_AGGREGATED_ENDPOINT: &str = "/api/filter/aggregated";

/// Body shared by both filter endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    /// Active filters
    pub filters: Vec<Filter>,
    /// Endpoint whose aggregation should be recomputed
    #[serde(rename = "originalUrl", skip_serializing_if = "Option::is_none", default)]
    pub original_url: Option<String>,
}

impl FilterRequest {
    /// Request for raw filtered records
    #[must_use]
    pub fn records(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            original_url: None,
        }
    }

    /// Request for an aggregation of `original_url` under `filters`
    #[must_use]
    pub fn aggregated(filters: Vec<Filter>, original_url: impl Into<String>) -> Self {
        Self {
            filters,
            original_url: Some(original_url.into()),
        }
    }

    /// Endpoint this body should be posted to
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        if self.original_url.is_some() {
            FILTER_AGGREGATED_ENDPOINT
        } else {
            FILTER_ENDPOINT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterField;
    use serde_json::json;

    #[test]
    fn aggregated_body_shape() {
        let body = FilterRequest::aggregated(
            vec![Filter::equals(FilterField::Tema, "Saneamento")],
            "/api/aggregate/by-theme",
        );
        assert_eq!(body.endpoint(), FILTER_AGGREGATED_ENDPOINT);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "filters": [{"field": "tema", "op": "eq", "value": "Saneamento"}],
                "originalUrl": "/api/aggregate/by-theme"
            })
        );
    }

    #[test]
    fn records_body_omits_original_url() {
        let body = FilterRequest::records(vec![]);
        assert_eq!(body.endpoint(), FILTER_ENDPOINT);
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"filters": []}));
    }
}
