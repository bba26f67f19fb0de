//! rowgate: relational tables as a REST API with row-level security
//!
//! # Features
//!
//! - **Parameterized SQL builder** - identifiers quoted, values always bound
//! - **Row Level Security** - ALLOW/DENY policies with default deny
//! - **Decision cache** - TTL-bound, invalidated per table on policy changes
//! - **Admin API** - policy CRUD and cache inspection over HTTP

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use rowgate_common as common;
pub use rowgate_rest as rest;
pub use rowgate_rls as rls;

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use rowgate_common::config::RowgateConfig;
use rowgate_common::error::{Error, Result};
use rowgate_rest::{DryRunBackend, QueryBackend, RestServer};
use rowgate_rls::RlsEngine;

/// Load configuration from a TOML file, or defaults when it does not exist
///
/// # Errors
/// Returns an error if the file cannot be read or is not valid TOML.
pub fn load_config(path: &Path) -> Result<RowgateConfig> {
    if !path.exists() {
        info!("Using default configuration");
        return Ok(RowgateConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))
}

/// Main rowgate server
pub struct RowgateServer {
    config: RowgateConfig,
    engine: Arc<RlsEngine>,
    rest_server: RestServer,
}

impl RowgateServer {
    /// Create a server that logs statements instead of executing them
    #[must_use]
    pub fn new(config: RowgateConfig) -> Self {
        Self::with_backend(config, Arc::new(DryRunBackend::new()))
    }

    /// Create a server over a specific storage backend
    #[must_use]
    pub fn with_backend(config: RowgateConfig, backend: Arc<dyn QueryBackend>) -> Self {
        info!("Initializing rowgate");
        let engine = Arc::new(RlsEngine::new(config.rls.clone()));
        let rest_server = RestServer::new(&config.rest, config.query.clone(), engine.clone(), backend);
        Self {
            config,
            engine,
            rest_server,
        }
    }

    #[must_use]
    pub fn engine(&self) -> Arc<RlsEngine> {
        self.engine.clone()
    }

    #[must_use]
    pub fn rest(&self) -> &RestServer {
        &self.rest_server
    }

    #[must_use]
    pub fn config(&self) -> &RowgateConfig {
        &self.config
    }

    /// Serve until the HTTP server stops
    ///
    /// # Errors
    /// Returns an error if the REST server fails to bind or run.
    pub async fn run(&self) -> Result<()> {
        info!(
            rls_enabled = self.config.rls.enabled,
            placeholder_style = ?self.config.query.placeholder_style,
            "Starting rowgate"
        );
        self.rest_server.run().await
    }
}
