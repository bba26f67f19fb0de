//! Common response types for rowgate

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Response Types
// ============================================================================

/// Standard API error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Build the client-facing body for a failure raised while serving
    /// `stage` (for example "query execution"). Storage errors keep their
    /// original text under `details` only.
    pub fn from_error(err: &Error, stage: &str) -> Self {
        if err.is_execution_error() {
            Self::new(err.error_code(), format!("{stage} failed"))
                .with_details(serde_json::Value::String(err.to_string()))
        } else {
            Self::new(err.error_code(), err.to_string())
        }
    }
}

/// Failure envelope: `{"error": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

impl From<ApiError> for ErrorResponse {
    fn from(error: ApiError) -> Self {
        Self { error }
    }
}

/// Success envelope for table reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub has_next: bool,
}

impl QueryResponse {
    pub fn new(data: Vec<serde_json::Value>) -> Self {
        Self {
            data,
            count: None,
            limit: None,
            offset: None,
            has_next: false,
        }
    }

    /// Attach pagination; `has_next` is true while rows remain past this page.
    #[must_use]
    pub fn with_page(mut self, count: u64, limit: Option<u64>, offset: Option<u64>) -> Self {
        let seen = offset.unwrap_or(0) + self.data.len() as u64;
        self.count = Some(count);
        self.limit = limit;
        self.offset = offset;
        self.has_next = seen < count;
        self
    }
}
