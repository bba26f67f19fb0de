//! Policy administration endpoints

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;
use uuid::Uuid;

use rowgate_common::error::Result;
use rowgate_rls::Policy;

use crate::handlers::{error_response, RestState, HEADER_USER_ID};

fn respond(result: Result<HttpResponse>) -> HttpResponse {
    result.unwrap_or_else(|err| error_response(&err))
}

fn actor(req: &HttpRequest) -> String {
    req.headers()
        .get(HEADER_USER_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// GET /admin/policies/{table}
pub async fn list_policies(state: web::Data<Arc<RestState>>, path: web::Path<String>) -> HttpResponse {
    let table = path.into_inner();
    let policies = state.engine.list_policies(&table);
    HttpResponse::Ok().json(serde_json::json!({
        "table": table,
        "count": policies.len(),
        "policies": policies,
    }))
}

/// POST /admin/policies/{table}; the table always comes from the path
pub async fn create_policy(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    body: web::Json<Policy>,
    req: HttpRequest,
) -> HttpResponse {
    let table = path.into_inner();
    let mut policy = body.into_inner();
    policy.table.clone_from(&table);
    if policy.id.is_empty() {
        policy.id = Uuid::new_v4().to_string();
    }
    if policy.created_by.is_empty() {
        policy.created_by = actor(&req);
    }
    respond(register(&state, policy))
}

fn register(state: &RestState, policy: Policy) -> Result<HttpResponse> {
    let (table, id) = (policy.table.clone(), policy.id.clone());
    state.engine.add_policy(policy)?;
    let created = state.engine.get_policy(&table, &id)?;
    info!(table = %table, policy_id = %id, "policy created via admin API");
    Ok(HttpResponse::Created().json(created))
}

/// GET /admin/policies/{table}/{id}
pub async fn get_policy(
    state: web::Data<Arc<RestState>>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (table, id) = path.into_inner();
    respond(
        state
            .engine
            .get_policy(&table, &id)
            .map(|policy| HttpResponse::Ok().json(policy)),
    )
}

/// PUT /admin/policies/{table}/{id}
pub async fn update_policy(
    state: web::Data<Arc<RestState>>,
    path: web::Path<(String, String)>,
    body: web::Json<Policy>,
    req: HttpRequest,
) -> HttpResponse {
    let (table, id) = path.into_inner();
    let mut policy = body.into_inner();
    policy.table.clone_from(&table);
    policy.id.clone_from(&id);
    policy.updated_by = actor(&req);

    respond(
        state
            .engine
            .update_policy(policy)
            .and_then(|()| state.engine.get_policy(&table, &id))
            .map(|updated| HttpResponse::Ok().json(updated)),
    )
}

/// DELETE /admin/policies/{table}/{id}
pub async fn delete_policy(
    state: web::Data<Arc<RestState>>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (table, id) = path.into_inner();
    respond(
        state
            .engine
            .remove_policy(&table, &id)
            .map(|()| HttpResponse::NoContent().finish()),
    )
}

/// GET /admin/cache
pub async fn cache_stats(state: web::Data<Arc<RestState>>) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.cache_stats())
}

/// DELETE /admin/cache
pub async fn clear_cache(state: web::Data<Arc<RestState>>) -> HttpResponse {
    state.engine.clear_cache();
    HttpResponse::NoContent().finish()
}

/// Register the admin routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/cache", web::get().to(cache_stats))
            .route("/cache", web::delete().to(clear_cache))
            .route("/policies/{table}", web::get().to(list_policies))
            .route("/policies/{table}", web::post().to(create_policy))
            .route("/policies/{table}/{id}", web::get().to(get_policy))
            .route("/policies/{table}/{id}", web::put().to(update_policy))
            .route("/policies/{table}/{id}", web::delete().to(delete_policy)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use rowgate_common::config::{QueryConfig, RlsConfig};
    use rowgate_rls::{ExecutionContext, Operation, RlsEngine};
    use serde_json::{json, Value};

    use crate::backend::RecordingBackend;

    fn state() -> Arc<RestState> {
        Arc::new(RestState::new(
            Arc::new(RlsEngine::new(RlsConfig::default())),
            Arc::new(RecordingBackend::new()),
            QueryConfig::default(),
        ))
    }

    #[actix_web::test]
    async fn test_policy_lifecycle() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;
        let ctx = ExecutionContext::new("u1", "t1");
        assert!(!state.engine.check_permission("notes", Operation::Select, &ctx).allowed);

        let req = test::TestRequest::post()
            .uri("/admin/policies/notes")
            .insert_header((HEADER_USER_ID, "admin-1"))
            .set_json(json!({
                "tenant_id": "t1",
                "type": "SELECT",
                "effect": "ALLOW",
                "using": "row.owner_id = ${user.id}"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(created["table"], json!("notes"));
        assert_eq!(created["created_by"], json!("admin-1"));
        assert!(state.engine.check_permission("notes", Operation::Select, &ctx).allowed);

        let req = test::TestRequest::get().uri("/admin/policies/notes").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["count"], json!(1));

        let req = test::TestRequest::put()
            .uri(&format!("/admin/policies/notes/{id}"))
            .set_json(json!({"tenant_id": "t1", "type": "SELECT", "effect": "DENY"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!state.engine.check_permission("notes", Operation::Select, &ctx).allowed);

        let req = test::TestRequest::delete()
            .uri(&format!("/admin/policies/notes/{id}"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::delete()
            .uri(&format!("/admin/policies/notes/{id}"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_invalid_policy_rejected() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/policies/notes")
            .set_json(json!({"tenant_id": "t1", "effect": "ALLOW", "definition": "just words"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], json!("validation_error"));
        assert_eq!(state.engine.policy_count("notes"), 0);
    }

    #[actix_web::test]
    async fn test_cache_endpoints() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;
        state
            .engine
            .check_permission("notes", Operation::Select, &ExecutionContext::new("u1", "t1"));

        let req = test::TestRequest::get().uri("/admin/cache").to_request();
        let stats: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["entries"], json!(1));

        let req = test::TestRequest::delete().uri("/admin/cache").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.engine.cache_stats().entries, 0);
    }
}
