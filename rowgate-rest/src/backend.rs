//! Storage backends for built statements

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use rowgate_common::error::{Error, Result};

use crate::builder::BuiltQuery;

/// Query execution result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result rows as JSON objects
    pub rows: Vec<JsonValue>,
    /// Number of rows affected (for mutations)
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<JsonValue>) -> Self {
        Self {
            rows_affected: rows.len() as u64,
            rows,
        }
    }
}

/// Executes parameterized statements against storage
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run a statement and return its rows
    async fn execute(&self, query: &BuiltQuery) -> Result<QueryResult>;

    /// Run a `COUNT(*)` statement
    async fn count(&self, query: &BuiltQuery) -> Result<u64>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// Dry run
// ============================================================================

/// Logs every statement and returns no rows
#[derive(Debug, Default)]
pub struct DryRunBackend;

impl DryRunBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl QueryBackend for DryRunBackend {
    async fn execute(&self, query: &BuiltQuery) -> Result<QueryResult> {
        info!(sql = %query.sql, args = ?query.args, "dry run");
        Ok(QueryResult::empty())
    }

    async fn count(&self, query: &BuiltQuery) -> Result<u64> {
        info!(sql = %query.sql, args = ?query.args, "dry run count");
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

// ============================================================================
// Recording (tests and local development)
// ============================================================================

/// Records statements and replays queued results
#[derive(Debug, Default)]
pub struct RecordingBackend {
    queries: Mutex<Vec<BuiltQuery>>,
    results: Mutex<VecDeque<Result<QueryResult>>>,
    count: Mutex<u64>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rows for the next `execute`
    pub fn push_rows(&self, rows: Vec<JsonValue>) {
        self.results.lock().push_back(Ok(QueryResult::from_rows(rows)));
    }

    /// Make the next `execute` fail with a storage error
    pub fn push_error(&self, message: &str) {
        self.results
            .lock()
            .push_back(Err(Error::QueryExecution(message.to_string())));
    }

    pub fn set_count(&self, count: u64) {
        *self.count.lock() = count;
    }

    /// Every statement seen so far, oldest first
    pub fn queries(&self) -> Vec<BuiltQuery> {
        self.queries.lock().clone()
    }

    pub fn last_query(&self) -> Option<BuiltQuery> {
        self.queries.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl QueryBackend for RecordingBackend {
    async fn execute(&self, query: &BuiltQuery) -> Result<QueryResult> {
        self.queries.lock().push(query.clone());
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::empty()))
    }

    async fn count(&self, query: &BuiltQuery) -> Result<u64> {
        self.queries.lock().push(query.clone());
        Ok(*self.count.lock())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(sql: &str) -> BuiltQuery {
        BuiltQuery {
            sql: sql.to_string(),
            args: vec![json!(1)],
        }
    }

    #[tokio::test]
    async fn test_recording_backend_replays() {
        let backend = RecordingBackend::new();
        backend.push_rows(vec![json!({"id": 1}), json!({"id": 2})]);
        backend.push_error("connection reset");
        backend.set_count(42);

        let first = backend.execute(&query("SELECT 1")).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.rows_affected, 2);

        let second = backend.execute(&query("SELECT 2")).await;
        assert!(matches!(second, Err(Error::QueryExecution(_))));

        let third = backend.execute(&query("SELECT 3")).await.unwrap();
        assert!(third.rows.is_empty());

        assert_eq!(backend.count(&query("SELECT COUNT(*)")).await.unwrap(), 42);
        assert_eq!(backend.queries().len(), 4);
        assert_eq!(backend.last_query().unwrap().sql, "SELECT COUNT(*)");
    }

    #[tokio::test]
    async fn test_dry_run_backend() {
        let backend = DryRunBackend::new();
        assert_eq!(backend.name(), "dry-run");
        assert!(backend.execute(&query("DELETE")).await.unwrap().rows.is_empty());
        assert_eq!(backend.count(&query("SELECT")).await.unwrap(), 0);
    }
}
