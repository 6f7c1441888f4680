//! Filter predicates
//!
//! A [`Filter`] is `{field, op, value}`. Fields form a closed set
//! ([`FilterField`]) so a chart cannot bind to a field the API does not
//! understand.

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Filterable fields of an ombudsman record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterField {
    /// Theme of the manifestation
    #[serde(rename = "tema")]
    Tema,
    /// Subject within a theme
    #[serde(rename = "assunto")]
    Assunto,
    /// Manifestation type (complaint, request, praise, ...)
    #[serde(rename = "tipoDeManifestacao")]
    TipoDeManifestacao,
    /// Responsible public bodies
    #[serde(rename = "orgaos")]
    Orgaos,
    /// Protocol status
    #[serde(rename = "status")]
    Status,
    /// Demand status as reported by the unit
    #[serde(rename = "statusDemanda")]
    StatusDemanda,
    /// Intake channel
    #[serde(rename = "canal")]
    Canal,
    /// Priority
    #[serde(rename = "prioridade")]
    Prioridade,
    /// Registering unit
    #[serde(rename = "unidadeCadastro")]
    UnidadeCadastro,
    /// Person responsible
    #[serde(rename = "responsavel")]
    Responsavel,
    /// Civil servant handling the case
    #[serde(rename = "servidor")]
    Servidor,
    /// Neighbourhood
    #[serde(rename = "bairro")]
    Bairro,
    /// Administrative district
    #[serde(rename = "distrito")]
    Distrito,
    /// Creation date (ISO 8601)
    #[serde(rename = "dataCriacaoIso")]
    DataCriacaoIso,
}

impl FilterField {
    /// Every filterable field
    pub const ALL: [FilterField; 14] = [
        Self::Tema,
        Self::Assunto,
        Self::TipoDeManifestacao,
        Self::Orgaos,
        Self::Status,
        Self::StatusDemanda,
        Self::Canal,
        Self::Prioridade,
        Self::UnidadeCadastro,
        Self::Responsavel,
        Self::Servidor,
        Self::Bairro,
        Self::Distrito,
        Self::DataCriacaoIso,
    ];

    /// Field name as used by the API and in record payloads
    #[must_use]
    pub const fn api_name(self) -> &'static str {
        match self {
            Self::Tema => "tema",
            Self::Assunto => "assunto",
            Self::TipoDeManifestacao => "tipoDeManifestacao",
            Self::Orgaos => "orgaos",
            Self::Status => "status",
            Self::StatusDemanda => "statusDemanda",
            Self::Canal => "canal",
            Self::Prioridade => "prioridade",
            Self::UnidadeCadastro => "unidadeCadastro",
            Self::Responsavel => "responsavel",
            Self::Servidor => "servidor",
            Self::Bairro => "bairro",
            Self::Distrito => "distrito",
            Self::DataCriacaoIso => "dataCriacaoIso",
        }
    }

    /// Human label for the active-filter banner
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tema => "Tema",
            Self::Assunto => "Assunto",
            Self::TipoDeManifestacao => "Tipo",
            Self::Orgaos => "Órgão",
            Self::Status => "Status",
            Self::StatusDemanda => "Status da demanda",
            Self::Canal => "Canal",
            Self::Prioridade => "Prioridade",
            Self::UnidadeCadastro => "Unidade",
            Self::Responsavel => "Responsável",
            Self::Servidor => "Servidor",
            Self::Bairro => "Bairro",
            Self::Distrito => "Distrito",
            Self::DataCriacaoIso => "Data",
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for FilterField {
    type Err = FilterError;

    /// Case-insensitive match on the API name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.api_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FilterError::UnknownField(s.to_string()))
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equality; click-to-filter always uses this
    #[default]
    Eq,
    /// Value is one of an array
    In,
    /// Case-insensitive substring
    Contains,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
}

impl FilterOp {
    /// Wire name of the operator
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }
}

impl FromStr for FilterOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "in" => Ok(Self::In),
            "contains" => Ok(Self::Contains),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            _ => Err(FilterError::UnknownOperator(s.to_string())),
        }
    }
}

/// One active filter predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field the predicate applies to
    pub field: FilterField,
    /// Operator
    pub op: FilterOp,
    /// Operand
    pub value: Value,
}

impl Filter {
    /// Create a filter
    #[inline]
    #[must_use]
    pub fn new(field: FilterField, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    /// Equality filter, as produced by a chart click
    #[inline]
    #[must_use]
    pub fn equals(field: FilterField, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Same field and value (operator ignored)
    #[inline]
    #[must_use]
    pub fn same_target(&self, field: FilterField, value: &Value) -> bool {
        self.field == field && self.value == *value
    }

    /// Evaluate the predicate against one record object
    ///
    /// Array-valued record fields (e.g. `orgaos`) match when any element
    /// matches. A missing field never matches.
    #[must_use]
    pub fn matches_record(&self, record: &Value) -> bool {
        match record.get(self.field.api_name()) {
            Some(Value::Array(items)) => items.iter().any(|item| self.matches_value(item)),
            Some(actual) => self.matches_value(actual),
            None => false,
        }
    }

    fn matches_value(&self, actual: &Value) -> bool {
        match self.op {
            FilterOp::Eq => loosely_equal(actual, &self.value),
            FilterOp::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| loosely_equal(actual, o)),
                other => loosely_equal(actual, other),
            },
            FilterOp::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                _ => false,
            },
            FilterOp::Gte => compare(actual, &self.value).is_some_and(Ordering::is_ge),
            FilterOp::Lte => compare(actual, &self.value).is_some_and(Ordering::is_le),
        }
    }

    /// Banner text, e.g. `Tema: Saneamento`
    #[must_use]
    pub fn describe(&self) -> String {
        let value = match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match self.op {
            FilterOp::Eq => format!("{}: {value}", self.field.label()),
            op => format!("{} {} {value}", self.field.label(), op.as_str()),
        }
    }
}

/// Whether `record` passes a whole filter set
///
/// Filters on the same field are alternatives (multi-select); filters on
/// different fields must all match. An empty set matches everything.
#[must_use]
pub fn matches_all(filters: &[Filter], record: &Value) -> bool {
    filters.iter().all(|filter| {
        filters
            .iter()
            .filter(|other| other.field == filter.field)
            .any(|other| other.matches_record(record))
    })
}

impl FromStr for Filter {
    type Err = FilterError;

    /// Parse `field=value`, `field~value`, `field>=value` or `field<=value`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const OPERATORS: [(&str, FilterOp); 4] = [
            (">=", FilterOp::Gte),
            ("<=", FilterOp::Lte),
            ("~", FilterOp::Contains),
            ("=", FilterOp::Eq),
        ];

        // The leftmost operator splits; the value may contain the others
        let (index, token, op) = OPERATORS
            .into_iter()
            .filter_map(|(token, op)| s.find(token).map(|index| (index, token, op)))
            .min_by_key(|&(index, token, _)| (index, std::cmp::Reverse(token.len())))
            .ok_or_else(|| FilterError::InvalidExpression(s.to_string()))?;

        let field: FilterField = s[..index].parse()?;
        let value = s[index + token.len()..].trim();
        if value.is_empty() {
            return Err(FilterError::InvalidExpression(s.to_string()));
        }
        Ok(Self::new(field, op, parse_scalar(value)))
    }
}

/// Numbers stay numbers so `prioridade>=2` compares numerically
fn parse_scalar(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .or_else(|_| raw.parse::<f64>().map(Value::from))
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}
