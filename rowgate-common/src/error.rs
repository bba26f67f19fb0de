//! Error types for rowgate

use thiserror::Error;

/// rowgate error types
#[derive(Error, Debug)]
pub enum Error {
    // Request Errors
    #[error("Invalid query parameter: {0}")]
    InvalidQueryParam(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Query Build Errors
    #[error("No data provided")]
    NoDataProvided,

    #[error("WHERE clause required for {0}")]
    WhereRequiredForSafety(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid condition on {field}: {reason}")]
    InvalidCondition { field: String, reason: String },

    // Policy Errors
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid policy expression: {0}")]
    InvalidExpression(String),

    #[error("Policy limit exceeded for table {table}: max {max}")]
    PolicyLimitExceeded { table: String, max: usize },

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    // Authorization Errors
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Storage Errors
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // General Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for rowgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status code for each error type
impl Error {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidQueryParam(_)
            | Self::InvalidIdentifier(_)
            | Self::ValidationError(_)
            | Self::NoDataProvided
            | Self::WhereRequiredForSafety(_)
            | Self::UnsupportedOperation(_)
            | Self::InvalidCondition { .. }
            | Self::InvalidPolicy(_)
            | Self::InvalidExpression(_)
            | Self::PolicyLimitExceeded { .. } => 400,

            // 403 Forbidden
            Self::PermissionDenied(_) => 403,

            // 404 Not Found
            Self::TableNotFound(_) | Self::PolicyNotFound(_) => 404,

            // 500 Internal Server Error
            Self::QueryExecution(_)
            | Self::ConfigError(_)
            | Self::InternalError(_)
            | Self::IoError(_)
            | Self::JsonError(_) => 500,
        }
    }

    /// Error code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidQueryParam(_) => "invalid_query",
            Self::InvalidIdentifier(_)
            | Self::ValidationError(_)
            | Self::InvalidPolicy(_)
            | Self::InvalidExpression(_)
            | Self::PolicyLimitExceeded { .. } => "validation_error",
            Self::NoDataProvided
            | Self::WhereRequiredForSafety(_)
            | Self::UnsupportedOperation(_)
            | Self::InvalidCondition { .. } => "query_build_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::TableNotFound(_) | Self::PolicyNotFound(_) => "not_found",
            Self::QueryExecution(_) => "query_execution_error",
            Self::ConfigError(_) => "config_error",
            Self::InternalError(_) => "internal_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }

    /// Whether the failure came from the underlying storage
    #[must_use]
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::QueryExecution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::NoDataProvided.status_code(), 400);
        assert_eq!(Error::PermissionDenied("x".into()).status_code(), 403);
        assert_eq!(Error::PolicyNotFound("p1".into()).status_code(), 404);
        assert_eq!(Error::QueryExecution("boom".into()).status_code(), 500);
        assert_eq!(
            Error::PolicyLimitExceeded {
                table: "orders".into(),
                max: 50
            }
            .status_code(),
            400
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::WhereRequiredForSafety("DELETE".into()).error_code(),
            "query_build_error"
        );
        assert_eq!(
            Error::InvalidIdentifier("drop".into()).error_code(),
            "validation_error"
        );
        assert_eq!(
            Error::InvalidQueryParam("limit".into()).error_code(),
            "invalid_query"
        );
        assert_eq!(
            Error::QueryExecution("boom".into()).error_code(),
            "query_execution_error"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidCondition {
            field: "age".into(),
            reason: "BETWEEN requires exactly two values".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid condition on age: BETWEEN requires exactly two values"
        );
    }
}
