//! Configuration types for rowgate

use serde::{Deserialize, Serialize};

/// Main configuration for all rowgate services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowgateConfig {
    /// REST API configuration
    pub rest: RestConfig,
    /// Row-level security configuration
    pub rls: RlsConfig,
    /// SQL generation configuration
    pub query: QueryConfig,
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Host to bind to
    pub host: String,
    /// Port for REST API (default: 3000)
    pub port: u16,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// HTTP worker threads
    pub workers: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["*".to_string()],
            workers: 4,
        }
    }
}

/// Row-level security engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RlsConfig {
    /// Master switch; when off every request is allowed unfiltered
    pub enabled: bool,
    /// Memoize decisions per (table, operation, user, tenant, roles)
    pub cache_enabled: bool,
    /// Maximum number of cached decisions
    pub cache_size: usize,
    /// Decision lifetime in seconds
    pub cache_ttl_secs: u64,
    /// Log every decision at info level
    pub debug_mode: bool,
    /// Ceiling on registered policies per table
    pub max_policies_per_table: usize,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_enabled: true,
            cache_size: 1000,
            cache_ttl_secs: 300,
            debug_mode: false,
            max_policies_per_table: 50,
        }
    }
}

/// Bind parameter placeholder convention for generated SQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `$1, $2, ...` (PostgreSQL)
    #[default]
    Numbered,
    /// `?` (SQLite, MySQL)
    Anonymous,
}

/// SQL generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub placeholder_style: PlaceholderStyle,
    /// Largest accepted `limit` query parameter
    pub max_limit: u64,
    /// Limit applied when the request does not carry one
    pub default_limit: Option<u64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            placeholder_style: PlaceholderStyle::Numbered,
            max_limit: 1000,
            default_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RowgateConfig::default();
        assert_eq!(config.rest.port, 3000);
        assert!(config.rls.enabled);
        assert_eq!(config.rls.max_policies_per_table, 50);
        assert_eq!(config.query.placeholder_style, PlaceholderStyle::Numbered);
    }

    #[test]
    fn test_config_serialization() {
        let config = RowgateConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RowgateConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.rest.port, parsed.rest.port);
        assert_eq!(config.rls.cache_ttl_secs, parsed.rls.cache_ttl_secs);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: RowgateConfig =
            serde_json::from_str(r#"{"query": {"placeholder_style": "anonymous"}}"#).unwrap();
        assert_eq!(parsed.query.placeholder_style, PlaceholderStyle::Anonymous);
        assert_eq!(parsed.query.max_limit, 1000);
        assert_eq!(parsed.rls.cache_size, 1000);
    }
}
