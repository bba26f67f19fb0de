//! HTTP handlers for table endpoints
//!
//! Every data request runs: parse query string, RLS decision, identifier
//! validation, SQL build, backend execution. Failures at any step map to the
//! `{error: {code, message, details}}` envelope with the status of the error.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rowgate_common::config::QueryConfig;
use rowgate_common::error::{Error, Result};
use rowgate_common::types::{ApiError, ErrorResponse, QueryResponse};
use rowgate_rls::{ExecutionContext, Operation, PolicyEvaluationResult, RlsEngine};

use crate::backend::QueryBackend;
use crate::builder::{BuiltQuery, QueryBuilder};
use crate::options::QueryOptions;
use crate::query::parse_query;

pub const HEADER_USER_ID: &str = "X-User-Id";
pub const HEADER_TENANT_ID: &str = "X-Tenant-Id";
pub const HEADER_PROJECT_ID: &str = "X-Project-Id";
pub const HEADER_ROLES: &str = "X-Roles";
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

/// Shared REST API state
pub struct RestState {
    pub engine: Arc<RlsEngine>,
    pub backend: Arc<dyn QueryBackend>,
    pub builder: QueryBuilder,
    pub query: QueryConfig,
}

impl RestState {
    pub fn new(engine: Arc<RlsEngine>, backend: Arc<dyn QueryBackend>, query: QueryConfig) -> Self {
        Self {
            engine,
            backend,
            builder: QueryBuilder::new(query.placeholder_style),
            query,
        }
    }

    /// Build the execution context from gateway headers
    pub fn build_context(&self, req: &HttpRequest) -> ExecutionContext {
        let roles = header(req, HEADER_ROLES)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let request_id = header(req, HEADER_REQUEST_ID)
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        let ip = req.peer_addr().map(|addr| addr.ip().to_string()).unwrap_or_default();

        ExecutionContext::new(
            header(req, HEADER_USER_ID).unwrap_or_default(),
            header(req, HEADER_TENANT_ID).unwrap_or_default(),
        )
        .with_project(header(req, HEADER_PROJECT_ID).unwrap_or_default())
        .with_roles(roles)
        .with_request_id(request_id)
        .with_client(ip, header(req, "User-Agent").unwrap_or_default())
    }

    fn parse(&self, req: &HttpRequest) -> Result<QueryOptions> {
        parse_query(req.query_string(), &self.query)
    }

    async fn execute(&self, query: &BuiltQuery, ctx: &ExecutionContext) -> Result<Vec<Value>> {
        debug!(sql = %query.sql, args = query.args.len(), request_id = %ctx.request_id, "built query");
        let result = self.backend.execute(query).await?;
        info!(
            backend = self.backend.name(),
            rows = result.rows.len(),
            rows_affected = result.rows_affected,
            request_id = %ctx.request_id,
            "query executed"
        );
        Ok(result.rows)
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn prefers_representation(req: &HttpRequest) -> bool {
    header(req, "Prefer").is_some_and(|p| p.contains("return=representation"))
}

/// Error envelope with the status matching `err`
pub fn error_response(err: &Error) -> HttpResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(ErrorResponse::from(ApiError::from_error(err, "query execution")))
}

fn respond(result: Result<HttpResponse>) -> HttpResponse {
    result.unwrap_or_else(|err| error_response(&err))
}

fn require_allowed(
    result: PolicyEvaluationResult,
    table: &str,
    operation: Operation,
    ctx: &ExecutionContext,
) -> Result<PolicyEvaluationResult> {
    if result.allowed {
        return Ok(result);
    }
    warn!(
        table = %table,
        operation = %operation,
        user_id = %ctx.user_id,
        reason = %result.reason,
        request_id = %ctx.request_id,
        "request denied by RLS"
    );
    Err(Error::PermissionDenied(result.reason))
}

fn body_rows(body: Value) -> Result<Vec<Map<String, Value>>> {
    let rows = match body {
        Value::Object(row) => vec![row],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(Error::ValidationError("every row must be a JSON object".into())),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(Error::ValidationError(
                "body must be a JSON object or an array of objects".into(),
            ))
        }
    };
    if rows.is_empty() {
        return Err(Error::NoDataProvided);
    }
    Ok(rows)
}

fn to_page_value(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// GET /rest/v1/{table}
pub async fn select_handler(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    respond(select(&state, &path.into_inner(), &req).await)
}

async fn select(state: &RestState, table: &str, req: &HttpRequest) -> Result<HttpResponse> {
    let ctx = state.build_context(req);
    let opts = state.parse(req)?;
    let row_filter = state.engine.get_row_filter(table, &ctx).inspect_err(|err| {
        warn!(table = %table, user_id = %ctx.user_id, error = %err, "read denied by RLS");
    })?;
    let opts = opts.with_row_filter(row_filter);
    state.builder.validate_query(table, &opts)?;

    let query = state.builder.build_select(table, &opts)?;
    let rows = state.execute(&query, &ctx).await?;

    let mut response = QueryResponse::new(rows);
    if opts.limit.is_some() {
        let count_query = state.builder.build_count_query(table, &opts)?;
        let count = state.backend.count(&count_query).await?;
        response = response.with_page(count, to_page_value(opts.limit), to_page_value(opts.offset));
    }
    Ok(HttpResponse::Ok().json(response))
}

/// GET /rest/v1/{table}/count
pub async fn count_handler(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    respond(count(&state, &path.into_inner(), &req).await)
}

async fn count(state: &RestState, table: &str, req: &HttpRequest) -> Result<HttpResponse> {
    let ctx = state.build_context(req);
    let opts = state.parse(req)?;
    let opts = opts.with_row_filter(state.engine.get_row_filter(table, &ctx)?);
    state.builder.validate_query(table, &opts)?;

    let query = state.builder.build_count_query(table, &opts)?;
    debug!(sql = %query.sql, request_id = %ctx.request_id, "built count query");
    let count = state.backend.count(&query).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "count": count })))
}

/// POST /rest/v1/{table}
pub async fn insert_handler(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    body: web::Json<Value>,
    req: HttpRequest,
) -> HttpResponse {
    respond(insert(&state, &path.into_inner(), body.into_inner(), &req).await)
}

async fn insert(state: &RestState, table: &str, body: Value, req: &HttpRequest) -> Result<HttpResponse> {
    let ctx = state.build_context(req);
    let rows = body_rows(body)?;
    let decision = require_allowed(
        state.engine.check_permission(table, Operation::Insert, &ctx),
        table,
        Operation::Insert,
        &ctx,
    )?;

    let mut opts = QueryOptions::new();
    if prefers_representation(req) {
        opts = opts.returning(&["*"]);
    }

    let mut statements = Vec::with_capacity(rows.len());
    for row in &rows {
        let checked = state.engine.enforce_check(&decision, row, &ctx);
        require_allowed(checked, table, Operation::Insert, &ctx)?;
        statements.push(state.builder.build_insert(table, row, &opts)?);
    }

    let mut inserted = Vec::new();
    for statement in &statements {
        inserted.extend(state.execute(statement, &ctx).await?);
    }
    Ok(HttpResponse::Created().json(QueryResponse::new(inserted)))
}

/// PATCH /rest/v1/{table}
pub async fn update_handler(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    body: web::Json<Value>,
    req: HttpRequest,
) -> HttpResponse {
    respond(update(&state, &path.into_inner(), body.into_inner(), &req).await)
}

async fn update(state: &RestState, table: &str, body: Value, req: &HttpRequest) -> Result<HttpResponse> {
    let ctx = state.build_context(req);
    let Value::Object(data) = body else {
        return Err(Error::ValidationError("body must be a JSON object".into()));
    };
    let opts = state.parse(req)?;
    let decision = require_allowed(
        state.engine.check_permission(table, Operation::Update, &ctx),
        table,
        Operation::Update,
        &ctx,
    )?;
    let checked = state.engine.enforce_patch_check(&decision, &data, &ctx);
    let decision = require_allowed(checked, table, Operation::Update, &ctx)?;

    let mut opts = opts.with_row_filter(state.engine.row_filter(&decision, &ctx)?);
    if prefers_representation(req) {
        opts = opts.returning(&["*"]);
    }
    let query = state.builder.build_update(table, &data, &opts)?;
    let rows = state.execute(&query, &ctx).await?;
    Ok(HttpResponse::Ok().json(QueryResponse::new(rows)))
}

/// DELETE /rest/v1/{table}
pub async fn delete_handler(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    respond(delete(&state, &path.into_inner(), &req).await)
}

async fn delete(state: &RestState, table: &str, req: &HttpRequest) -> Result<HttpResponse> {
    let ctx = state.build_context(req);
    let opts = state.parse(req)?;
    let decision = require_allowed(
        state.engine.check_permission(table, Operation::Delete, &ctx),
        table,
        Operation::Delete,
        &ctx,
    )?;

    let representation = prefers_representation(req);
    let mut opts = opts.with_row_filter(state.engine.row_filter(&decision, &ctx)?);
    if representation {
        opts = opts.returning(&["*"]);
    }
    let query = state.builder.build_delete(table, &opts)?;
    debug!(sql = %query.sql, request_id = %ctx.request_id, "built delete");
    let result = state.backend.execute(&query).await?;
    info!(
        table = %table,
        rows_affected = result.rows_affected,
        request_id = %ctx.request_id,
        "rows deleted"
    );

    if representation {
        Ok(HttpResponse::Ok().json(QueryResponse::new(result.rows)))
    } else {
        Ok(HttpResponse::NoContent()
            .insert_header(("X-Deleted-Count", result.rows_affected.to_string()))
            .finish())
    }
}

/// GET /health
pub async fn health_handler(state: web::Data<Arc<RestState>>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "rowgate",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend.name(),
        "rls_enabled": state.engine.is_enabled(),
    }))
}
