use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::api::{fail, ApiResponse};
use crate::egress_service::{CreateEgressRequest, UpdateEgressRequest};
use crate::inventory;
use crate::AppState;

/// GET /api/egress
pub async fn list_egress(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.egress.list().await {
        Ok(items) => (StatusCode::OK, ApiResponse::success(items)),
        Err(e) => fail(e),
    }
}

/// POST /api/egress
pub async fn create_egress(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateEgressRequest>,
) -> impl IntoResponse {
    match state.egress.create(req).await {
        Ok(model) => (StatusCode::CREATED, ApiResponse::success(model)),
        Err(e) => fail(e),
    }
}

/// POST /api/egress/scan
/// 扫描引擎网卡，为新发现的 IP 创建出口
pub async fn scan_interfaces(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.egress.scan_interfaces().await {
        Ok(created) => (StatusCode::OK, ApiResponse::success(created)),
        Err(e) => fail(e),
    }
}

/// PUT /api/egress/{id}
pub async fn update_egress(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEgressRequest>,
) -> impl IntoResponse {
    match state.egress.update(id, req).await {
        Ok(model) => (StatusCode::OK, ApiResponse::success(model)),
        Err(e) => fail(e),
    }
}

/// DELETE /api/egress/{id}
pub async fn delete_egress(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.egress.delete(id).await {
        Ok(()) => (StatusCode::OK, ApiResponse::success(())),
        Err(e) => fail(e),
    }
}

/// GET /api/egress/{id}/usage
pub async fn get_egress_usage(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match inventory::target_usage(&state.db, id).await {
        Ok(usage) => (StatusCode::OK, ApiResponse::success(usage)),
        Err(e) => fail(e),
    }
}
