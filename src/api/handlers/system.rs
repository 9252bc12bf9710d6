use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

use crate::api::{fail, ApiResponse};
use crate::engine;
use crate::error::PanelError;
use crate::AppState;

fn default_operation() -> String {
    "GreenServer".to_string()
}

#[derive(Serialize)]
pub struct ExpireReport {
    pub expired: u64,
}

#[derive(Deserialize)]
pub struct RestartRequest {
    #[serde(default = "default_operation")]
    pub operation: String,
}

impl Default for RestartRequest {
    fn default() -> Self {
        Self {
            operation: default_operation(),
        }
    }
}

/// POST /api/system/expire
pub async fn run_expiration(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.sweeper.expire_overdue().await {
        Ok(expired) => (StatusCode::OK, ApiResponse::success(ExpireReport { expired })),
        Err(e) => fail(e),
    }
}

/// POST /api/system/sync-traffic
pub async fn run_traffic_sync(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.sweeper.sync_traffic().await {
        Ok(report) => (StatusCode::OK, ApiResponse::success(report)),
        Err(e) => fail(e),
    }
}

/// POST /api/system/engine/test
/// 测试引擎连通性，返回延迟和网卡列表
pub async fn test_engine(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match engine::probe(state.reconciler.engine().as_ref()).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(PanelError::Engine(e)),
    }
}

/// GET /api/system/engine/info
pub async fn engine_info(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.reconciler.engine().system_info().await {
        Ok(info) => (StatusCode::OK, ApiResponse::success(info)),
        Err(e) => fail(PanelError::Engine(e)),
    }
}

/// POST /api/system/engine/restart
pub async fn restart_engine(
    Extension(state): Extension<AppState>,
    body: Option<Json<RestartRequest>>,
) -> impl IntoResponse {
    let Json(req) = body.unwrap_or_default();
    tracing::warn!("🔄 请求重启引擎: {}", req.operation);
    match state.reconciler.engine().restart(&req.operation).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(PanelError::Engine(e)),
    }
}
