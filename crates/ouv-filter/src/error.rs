//! Error types for filter parsing
//!
//! Field names and operators arrive as strings from chart bindings, the CLI
//! and request bodies; they are validated here, once, at the boundary.

/// Errors while turning external input into typed filters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Field is not one of the filterable dashboard fields
    #[error("unknown filter field: '{0}'")]
    UnknownField(String),

    /// Operator is not supported
    #[error("unknown filter operator: '{0}'")]
    UnknownOperator(String),

    /// `field<op>value` expression could not be split
    #[error("invalid filter expression: '{0}' (expected field=value)")]
    InvalidExpression(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_error_display() {
        let err = FilterError::UnknownField("colour".to_string());
        assert_eq!(err.to_string(), "unknown filter field: 'colour'");

        let err = FilterError::InvalidExpression("tema".to_string());
        assert!(err.to_string().contains("expected field=value"));
    }
}
