//! 周期纠偏任务：过期降级和流量回拉

use std::sync::Arc;
use std::time::Duration;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::SweepConfig;
use crate::entity::{account, Account};
use crate::error::PanelResult;
use crate::payload::parse_port;
use crate::reconciler::Reconciler;
use crate::status::{self, AccountStatus};

/// 一次流量同步的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSyncReport {
    pub updated: u64,
    pub skipped: u64,
    /// 引擎不可达时的错误信息，本地数据保持不变
    pub engine_error: Option<String>,
}

pub struct Sweeper {
    db: DatabaseConnection,
    reconciler: Arc<Reconciler>,
}

impl Sweeper {
    pub fn new(db: DatabaseConnection, reconciler: Arc<Reconciler>) -> Self {
        Self { db, reconciler }
    }

    /// 将已到期的 active 账户降级为 expired 并从引擎中移除
    ///
    /// 每个账户的状态转换是带条件的单行更新，重复执行不会产生额外变化。
    pub async fn expire_overdue(&self) -> PanelResult<u64> {
        let now = status::now();
        let overdue = Account::find()
            .filter(account::Column::Status.eq(AccountStatus::Active))
            .filter(account::Column::ExpireTime.lte(now))
            .all(&self.db)
            .await?;

        let mut expired = 0;
        for model in overdue {
            let result = Account::update_many()
                .col_expr(account::Column::Status, Expr::value(AccountStatus::Expired))
                .col_expr(account::Column::UpdatedAt, Expr::value(now))
                .filter(account::Column::Id.eq(model.id))
                .filter(account::Column::Status.eq(AccountStatus::Active))
                .filter(account::Column::ExpireTime.lte(now))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                continue;
            }
            expired += 1;
            self.reconciler.apply(model.id).await;
        }

        if expired > 0 {
            info!("⏰ 过期账户 {} 个", expired);
        }
        Ok(expired)
    }

    /// 从引擎拉取流量计数并覆盖本地记录，无法匹配的条目直接跳过
    pub async fn sync_traffic(&self) -> PanelResult<TrafficSyncReport> {
        let entries = match self.reconciler.engine().list_accounts().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("从引擎同步流量失败: {}", e);
                return Ok(TrafficSyncReport {
                    engine_error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        };

        let now = status::now();
        let mut report = TrafficSyncReport::default();
        for entry in entries {
            let Some(port) = parse_port(&entry.listen_addr) else {
                report.skipped += 1;
                continue;
            };

            let result = Account::update_many()
                .col_expr(account::Column::UpTraffic, Expr::value(entry.send_byte))
                .col_expr(account::Column::DownTraffic, Expr::value(entry.receive_byte))
                .col_expr(account::Column::LastSeen, Expr::value(now))
                .filter(account::Column::Port.eq(port))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                report.skipped += 1;
            } else {
                report.updated += 1;
            }
        }

        info!("📊 流量同步完成: 更新 {}，跳过 {}", report.updated, report.skipped);
        Ok(report)
    }

    /// 按配置启动后台任务，间隔为 0 的任务不启动
    pub fn start(self: Arc<Self>, config: &SweepConfig) {
        if config.expiration_interval_secs > 0 {
            let sweeper = self.clone();
            let period = Duration::from_secs(config.expiration_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);

                loop {
                    interval.tick().await;

                    if let Err(e) = sweeper.expire_overdue().await {
                        error!("过期检查失败: {}", e);
                    }
                }
            });
            info!("⏰ 过期检查已启动，间隔 {} 秒", config.expiration_interval_secs);
        }

        if config.traffic_interval_secs > 0 {
            let sweeper = self;
            let period = Duration::from_secs(config.traffic_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);

                loop {
                    interval.tick().await;

                    if let Err(e) = sweeper.sync_traffic().await {
                        error!("流量同步失败: {}", e);
                    }
                }
            });
            info!("📊 流量同步已启动，间隔 {} 秒", config.traffic_interval_secs);
        }
    }
}
