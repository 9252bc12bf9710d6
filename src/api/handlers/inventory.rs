use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::api::{fail, ApiResponse};
use crate::inventory;
use crate::AppState;

fn default_count() -> u64 {
    1
}

#[derive(Deserialize)]
pub struct CheckQuery {
    #[serde(default = "default_count")]
    pub count: u64,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub ok: bool,
    pub message: String,
}

/// GET /api/inventory
pub async fn list_inventories(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match inventory::all_inventories(&state.db).await {
        Ok(items) => (StatusCode::OK, ApiResponse::success(items)),
        Err(e) => fail(e),
    }
}

/// GET /api/inventory/{rule_id}
pub async fn get_inventory(
    Extension(state): Extension<AppState>,
    Path(rule_id): Path<i64>,
) -> impl IntoResponse {
    match inventory::inventory(&state.db, rule_id).await {
        Ok(inv) => (StatusCode::OK, ApiResponse::success(inv)),
        Err(e) => fail(e),
    }
}

/// GET /api/inventory/{rule_id}/check?count=N
pub async fn check_inventory(
    Extension(state): Extension<AppState>,
    Path(rule_id): Path<i64>,
    Query(query): Query<CheckQuery>,
) -> impl IntoResponse {
    match inventory::can_provision(&state.db, rule_id, query.count).await {
        Ok((ok, message)) => (StatusCode::OK, ApiResponse::success(CheckResult { ok, message })),
        Err(e) => fail(e),
    }
}
