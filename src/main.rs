mod account_service;
mod api;
mod config;
mod egress_service;
mod engine;
mod entity;
mod error;
mod inventory;
mod migration;
mod payload;
mod port_range;
mod reconciler;
mod rule_service;
mod status;
mod sweeper;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::account_service::AccountService;
use crate::config::Config;
use crate::egress_service::EgressService;
use crate::engine::{EngineClient, ExecutionEngine};
use crate::inventory::Allocator;
use crate::reconciler::Reconciler;
use crate::rule_service::RuleService;
use crate::sweeper::Sweeper;

#[derive(Parser)]
#[command(name = "proxy-panel", version, about = "代理账户管理面板")]
struct Cli {
    /// 配置文件路径，缺省时依次查找 panel.toml 和 ../panel.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub reconciler: Arc<Reconciler>,
    pub accounts: Arc<AccountService>,
    pub egress: Arc<EgressService>,
    pub rules: Arc<RuleService>,
    pub sweeper: Arc<Sweeper>,
}

impl AppState {
    pub fn build(
        config: Arc<Config>,
        db: DatabaseConnection,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(db.clone(), engine));
        let allocator = Arc::new(Allocator::new());

        Self {
            accounts: Arc::new(AccountService::new(
                db.clone(),
                config.clone(),
                reconciler.clone(),
                allocator,
            )),
            egress: Arc::new(EgressService::new(db.clone(), reconciler.clone())),
            rules: Arc::new(RuleService::new(db.clone(), reconciler.clone())),
            sweeper: Arc::new(Sweeper::new(db.clone(), reconciler.clone())),
            config,
            db,
            reconciler,
        }
    }
}

#[cfg(test)]
impl AppState {
    pub async fn for_tests(
        engine: Arc<test_support::FakeEngine>,
    ) -> (Self, Arc<test_support::FakeEngine>) {
        let db = test_support::memory_db().await;
        let state = Self::build(Arc::new(Config::default()), db, engine.clone());
        (state, engine)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化 tracing 日志系统
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    // 读取配置
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    info!("📋 proxy-panel 启动");
    info!("🌐 Web管理端口: {}", config.web_port);
    info!("🔗 执行引擎: {}", config.engine.api_url);

    // 初始化数据库
    let db = migration::connect(&config.db_path).await?;
    migration::Migrator::up(&db, None).await?;
    info!("✅ 数据库初始化完成");

    let engine: Arc<dyn ExecutionEngine> = Arc::new(EngineClient::new(&config.engine)?);
    let app_state = AppState::build(config.clone(), db, engine);

    // 启动周期任务
    app_state.sweeper.clone().start(&config.sweep);

    // 启动 Web API 服务
    let _web_handle = api::start_web_server(app_state);

    info!("✅ 所有服务已启动，等待终止信号...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C 信号，正在关闭服务...");
        }
        _ = wait_sigterm() => {
            info!("收到 SIGTERM 信号，正在关闭服务...");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("无法监听 SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_sigterm() {
    std::future::pending::<()>().await;
}
