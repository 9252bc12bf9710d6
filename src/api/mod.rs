use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::{Extension, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::PanelError;
use crate::AppState;

pub mod handlers;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        })
    }

    pub fn error(message: String) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            message,
        })
    }
}

/// 错误到 HTTP 状态码的映射
pub fn status_of(err: &PanelError) -> StatusCode {
    match err {
        PanelError::InvalidPort(_)
        | PanelError::InvalidRequest(_)
        | PanelError::InsufficientInventory { .. }
        | PanelError::NoAdmissibleTarget(_)
        | PanelError::NoFreePort => StatusCode::BAD_REQUEST,
        PanelError::AccountNotFound(_)
        | PanelError::AccountPortNotFound(_)
        | PanelError::EgressNotFound(_)
        | PanelError::RuleNotFound(_) => StatusCode::NOT_FOUND,
        PanelError::DuplicatePort(_)
        | PanelError::DuplicateName { .. }
        | PanelError::EgressInUse { .. } => StatusCode::CONFLICT,
        PanelError::Engine(_) => StatusCode::BAD_GATEWAY,
        PanelError::ReferenceMissing(_) | PanelError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn fail<T>(err: PanelError) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = status_of(&err);
    if status.is_server_error() {
        tracing::error!("请求失败: {}", err);
    }
    (status, ApiResponse::error(err.to_string()))
}

pub fn router(app_state: AppState) -> Router {
    let api_routes = Router::new()
        // 账户
        .route("/accounts", get(handlers::list_accounts).post(handlers::create_account))
        .route("/accounts/provision", post(handlers::provision_account))
        .route("/accounts/quick", post(handlers::quick_provision))
        .route(
            "/accounts/batch",
            post(handlers::batch_create_accounts).put(handlers::batch_update_accounts),
        )
        .route("/accounts/batch-delete", post(handlers::batch_delete_accounts))
        .route(
            "/accounts/{id}",
            get(handlers::get_account)
                .put(handlers::update_account)
                .delete(handlers::delete_account),
        )
        .route("/accounts/{id}/toggle", post(handlers::toggle_account))
        .route("/accounts/{id}/renew", post(handlers::renew_account))
        .route("/accounts/{id}/reset-traffic", post(handlers::reset_account_traffic))
        .route("/accounts/port/{port}", get(handlers::get_account_by_port))
        // 出口
        .route("/egress", get(handlers::list_egress).post(handlers::create_egress))
        .route("/egress/scan", post(handlers::scan_interfaces))
        .route("/egress/{id}", put(handlers::update_egress).delete(handlers::delete_egress))
        .route("/egress/{id}/usage", get(handlers::get_egress_usage))
        // 规则组
        .route("/rules", get(handlers::list_rules).post(handlers::create_rule))
        .route("/rules/{id}", put(handlers::update_rule).delete(handlers::delete_rule))
        // 库存
        .route("/inventory", get(handlers::list_inventories))
        .route("/inventory/{rule_id}", get(handlers::get_inventory))
        .route("/inventory/{rule_id}/check", get(handlers::check_inventory))
        // 系统
        .route("/system/expire", post(handlers::run_expiration))
        .route("/system/sync-traffic", post(handlers::run_traffic_sync))
        .route("/system/engine/test", post(handlers::test_engine))
        .route("/system/engine/info", get(handlers::engine_info))
        .route("/system/engine/restart", post(handlers::restart_engine))
        .layer(Extension(app_state));

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

/// 启动 Web API 服务
pub fn start_web_server(app_state: AppState) -> tokio::task::JoinHandle<()> {
    let web_port = app_state.config.web_port;

    tokio::spawn(async move {
        let app = router(app_state);

        let web_addr = format!("0.0.0.0:{}", web_port);
        match tokio::net::TcpListener::bind(web_addr.clone()).await {
            Ok(listener) => {
                info!("🌐 管理接口: http://{}", web_addr);
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!("Web服务错误：{}", err);
                }
            }
            Err(err) => {
                tracing::error!("Web服务启动失败：{}", err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&PanelError::DuplicatePort(9001)), StatusCode::CONFLICT);
        assert_eq!(status_of(&PanelError::AccountNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&PanelError::InsufficientInventory { available: 0, requested: 1 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&PanelError::Engine(EngineError::Timeout("slow".to_string()))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_envelope() {
        let (status, Json(body)) = fail::<()>(PanelError::EgressInUse {
            name: "eth0-ip".to_string(),
            count: 2,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);
        assert!(body.data.is_none());
        assert!(body.message.contains("eth0-ip"));
    }
}
