use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::api::{fail, ApiResponse};
use crate::rule_service::{CreateRuleRequest, UpdateRuleRequest};
use crate::AppState;

/// GET /api/rules
pub async fn list_rules(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.rules.list().await {
        Ok(items) => (StatusCode::OK, ApiResponse::success(items)),
        Err(e) => fail(e),
    }
}

/// POST /api/rules
pub async fn create_rule(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    match state.rules.create(req).await {
        Ok(model) => (StatusCode::CREATED, ApiResponse::success(model)),
        Err(e) => fail(e),
    }
}

/// PUT /api/rules/{id}
pub async fn update_rule(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    match state.rules.update(id, req).await {
        Ok(model) => (StatusCode::OK, ApiResponse::success(model)),
        Err(e) => fail(e),
    }
}

/// DELETE /api/rules/{id}
pub async fn delete_rule(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.rules.delete(id).await {
        Ok(()) => (StatusCode::OK, ApiResponse::success(())),
        Err(e) => fail(e),
    }
}
