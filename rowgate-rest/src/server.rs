//! REST API server implementation

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::info;

use rowgate_common::config::{QueryConfig, RestConfig};
use rowgate_common::error::Result;
use rowgate_rls::RlsEngine;

use crate::admin;
use crate::backend::QueryBackend;
use crate::handlers::{self, RestState};

/// Register the table, count and health routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_handler))
        .service(
            web::scope("/rest/v1")
                .route("/{table}/count", web::get().to(handlers::count_handler))
                .route("/{table}", web::get().to(handlers::select_handler))
                .route("/{table}", web::post().to(handlers::insert_handler))
                .route("/{table}", web::patch().to(handlers::update_handler))
                .route("/{table}", web::delete().to(handlers::delete_handler)),
        )
        .configure(admin::configure);
}

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Cors::permissive();
    }
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}

/// RLS-enforcing REST API server
pub struct RestServer {
    config: RestConfig,
    state: Arc<RestState>,
}

impl RestServer {
    pub fn new(
        config: &RestConfig,
        query: QueryConfig,
        engine: Arc<RlsEngine>,
        backend: Arc<dyn QueryBackend>,
    ) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RestState::new(engine, backend, query)),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<RestState> {
        self.state.clone()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Run the REST server
    pub async fn run(&self) -> Result<()> {
        let state = self.state.clone();
        let origins = self.config.cors_origins.clone();
        let address = self.address();

        info!("Starting REST API server on {}", address);
        info!(
            "  Backend: {}, RLS enabled: {}",
            state.backend.name(),
            state.engine.is_enabled()
        );

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(cors(&origins))
                .wrap(middleware::Logger::default())
                .configure(configure)
        })
        .workers(self.config.workers.max(1))
        .bind(address)?
        .run()
        .await?;

        Ok(())
    }
}
