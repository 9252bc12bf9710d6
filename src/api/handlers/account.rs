use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

use crate::account_service::{
    BatchUpdateItem, CreateAccountRequest, ProvisionRequest, QuickProvisionRequest, RenewRequest,
    UpdateAccountRequest,
};
use crate::api::{fail, ApiResponse};
use crate::AppState;

#[derive(Deserialize)]
pub struct BatchDeleteRequest {
    pub ports: Vec<i32>,
}

#[derive(Deserialize)]
pub struct BatchCreateRequest {
    pub accounts: Vec<CreateAccountRequest>,
}

#[derive(Deserialize)]
pub struct BatchUpdateRequest {
    pub updates: Vec<BatchUpdateItem>,
}

/// GET /api/accounts
pub async fn list_accounts(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.accounts.list().await {
        Ok(items) => (StatusCode::OK, ApiResponse::success(items)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts
pub async fn create_account(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> impl IntoResponse {
    match state.accounts.create(req).await {
        Ok(result) => (StatusCode::CREATED, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/provision
pub async fn provision_account(
    Extension(state): Extension<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> impl IntoResponse {
    match state.accounts.provision(req).await {
        Ok(result) => (StatusCode::CREATED, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/quick
pub async fn quick_provision(
    Extension(state): Extension<AppState>,
    Json(req): Json<QuickProvisionRequest>,
) -> impl IntoResponse {
    match state.accounts.quick_provision(req).await {
        Ok(result) => (StatusCode::CREATED, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/batch
pub async fn batch_create_accounts(
    Extension(state): Extension<AppState>,
    Json(req): Json<BatchCreateRequest>,
) -> impl IntoResponse {
    match state.accounts.create_many(req.accounts).await {
        Ok(batch) => (StatusCode::OK, ApiResponse::success(batch)),
        Err(e) => fail(e),
    }
}

/// PUT /api/accounts/batch
pub async fn batch_update_accounts(
    Extension(state): Extension<AppState>,
    Json(req): Json<BatchUpdateRequest>,
) -> impl IntoResponse {
    match state.accounts.update_many(req.updates).await {
        Ok(batch) => (StatusCode::OK, ApiResponse::success(batch)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/batch-delete
pub async fn batch_delete_accounts(
    Extension(state): Extension<AppState>,
    Json(req): Json<BatchDeleteRequest>,
) -> impl IntoResponse {
    let results = state.accounts.delete_by_ports(&req.ports).await;
    (StatusCode::OK, ApiResponse::success(results))
}

/// GET /api/accounts/{id}
pub async fn get_account(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.accounts.get(id).await {
        Ok(detail) => (StatusCode::OK, ApiResponse::success(detail)),
        Err(e) => fail(e),
    }
}

/// GET /api/accounts/port/{port}
pub async fn get_account_by_port(
    Extension(state): Extension<AppState>,
    Path(port): Path<i32>,
) -> impl IntoResponse {
    match state.accounts.get_by_port(port).await {
        Ok(detail) => (StatusCode::OK, ApiResponse::success(detail)),
        Err(e) => fail(e),
    }
}

/// PUT /api/accounts/{id}
pub async fn update_account(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAccountRequest>,
) -> impl IntoResponse {
    match state.accounts.update(id, req).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// DELETE /api/accounts/{id}
pub async fn delete_account(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.accounts.delete(id).await {
        Ok(sync) => (StatusCode::OK, ApiResponse::success(sync)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/{id}/toggle
pub async fn toggle_account(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.accounts.toggle(id).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/{id}/renew
pub async fn renew_account(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RenewRequest>,
) -> impl IntoResponse {
    match state.accounts.renew(id, req).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

/// POST /api/accounts/{id}/reset-traffic
pub async fn reset_account_traffic(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.accounts.reset_traffic(id).await {
        Ok(result) => (StatusCode::OK, ApiResponse::success(result)),
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_egress, FakeEngine};
    use std::sync::Arc;

    fn request(port: i32, egress_id: i64) -> CreateAccountRequest {
        serde_json::from_value(serde_json::json!({
            "port": port,
            "egress_id": egress_id,
            "expiration_days": 7
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_conflict() {
        let (state, _engine) = AppState::for_tests(Arc::new(FakeEngine::new())).await;
        let egress = insert_egress(&state.db, "eth0-ip", 10).await;

        let resp = create_account(Extension(state.clone()), Json(request(9001, egress.id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = create_account(Extension(state.clone()), Json(request(9001, egress.id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = get_account_by_port(Extension(state.clone()), Path(9001))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_account(Extension(state), Path(999)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_create_reports_per_item() {
        let (state, engine) = AppState::for_tests(Arc::new(FakeEngine::new())).await;
        let egress = insert_egress(&state.db, "eth0-ip", 10).await;

        let resp = batch_create_accounts(
            Extension(state.clone()),
            Json(BatchCreateRequest {
                accounts: vec![request(9001, egress.id), request(9001, egress.id)],
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(engine.has_account("0.0.0.0:9001"));

        let resp = batch_update_accounts(
            Extension(state),
            Json(BatchUpdateRequest { updates: Vec::new() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
