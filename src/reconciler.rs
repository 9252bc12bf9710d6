//! 账户与执行引擎之间的同步
//!
//! 同一监听地址上同一时刻只允许一个同步流程，避免 "列表-查找-创建/编辑" 探测在并发下交错。
//! 除连通性测试外，所有引擎错误都在这里记录并吸收，本地存储始终是权威数据。

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::engine::{EnginePayload, EngineResult, ExecutionEngine};
use crate::entity::{account, Account};
use crate::error::PanelResult;
use crate::payload::{self, listen_addr};
use crate::status;

/// 一次同步的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Created,
    Updated,
    Evicted,
    /// 引擎中本来就不存在
    Absent,
    /// 地址已被其他账户占用，未做任何操作
    Skipped,
    /// 引擎调用失败，等待下一次同步或周期任务收敛
    Failed,
}

pub struct Reconciler {
    db: DatabaseConnection,
    engine: Arc<dyn ExecutionEngine>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(db: DatabaseConnection, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            db,
            engine,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    /// 获取监听地址锁，顺带清理没有持有者的条目
    async fn lock_addr(&self, addr: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks
                .entry(addr.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// 直接创建，身份已存在时由引擎报错
    async fn upsert_if_absent(&self, payload: &EnginePayload) -> EngineResult<SyncOutcome> {
        self.engine.create_account(payload).await?;
        Ok(SyncOutcome::Created)
    }

    /// 列出全部账户，按监听地址精确匹配后编辑或创建
    async fn upsert_probe(&self, payload: &EnginePayload) -> EngineResult<SyncOutcome> {
        let existing = self.engine.list_accounts().await?;
        if existing.iter().any(|e| e.listen_addr == payload.listen_addr) {
            self.engine
                .edit_account(&payload.listen_addr, payload)
                .await?;
            Ok(SyncOutcome::Updated)
        } else {
            self.engine.create_account(payload).await?;
            Ok(SyncOutcome::Created)
        }
    }

    /// 删除，"不存在" 视为已满足
    async fn evict(&self, addr: &str) -> EngineResult<SyncOutcome> {
        match self.engine.delete_account(addr).await {
            Ok(()) => Ok(SyncOutcome::Evicted),
            Err(e) if e.is_not_found() => {
                debug!("引擎中不存在 {}，无需删除", addr);
                Ok(SyncOutcome::Absent)
            }
            Err(e) => Err(e),
        }
    }

    /// 账户首次创建后的同步
    pub async fn apply_created(&self, account_id: i64) -> SyncOutcome {
        self.run(account_id, true).await
    }

    /// 按 should-sync 判定执行 upsert 或 evict
    pub async fn apply(&self, account_id: i64) -> SyncOutcome {
        self.run(account_id, false).await
    }

    /// 端口变更：先清理旧地址，再同步新状态
    pub async fn apply_port_change(&self, old_port: i32, account_id: i64) -> SyncOutcome {
        self.evict_vacated(old_port).await;
        self.apply(account_id).await
    }

    /// 清理一个已不属于任何账户的端口；端口已被其他账户占用时跳过
    pub async fn evict_vacated(&self, port: i32) -> SyncOutcome {
        let addr = listen_addr(port);
        let _guard = self.lock_addr(&addr).await;

        match Account::find()
            .filter(account::Column::Port.eq(port))
            .one(&self.db)
            .await
        {
            Ok(Some(owner)) => {
                debug!("端口 {} 已属于账户 #{}，跳过清理", port, owner.id);
                SyncOutcome::Skipped
            }
            Ok(None) => self.absorb(0, &addr, self.evict(&addr).await),
            Err(e) => {
                warn!("清理 {} 前查询账户失败: {}", addr, e);
                SyncOutcome::Failed
            }
        }
    }

    async fn run(&self, account_id: i64, first_creation: bool) -> SyncOutcome {
        // 端口可能在加锁前被修改，最多重试几次以锁住最新地址
        for _ in 0..3 {
            let port = match self.load(account_id).await {
                Ok(Some(model)) => model.port,
                Ok(None) => {
                    debug!("账户 #{} 已不存在，跳过同步", account_id);
                    return SyncOutcome::Skipped;
                }
                Err(e) => {
                    warn!("同步账户 #{} 时读取失败: {}", account_id, e);
                    return SyncOutcome::Failed;
                }
            };

            let addr = listen_addr(port);
            let _guard = self.lock_addr(&addr).await;

            let model = match self.load(account_id).await {
                Ok(Some(model)) if model.port == port => model,
                Ok(Some(_)) => continue,
                Ok(None) => return SyncOutcome::Skipped,
                Err(e) => {
                    warn!("同步账户 #{} 时读取失败: {}", account_id, e);
                    return SyncOutcome::Failed;
                }
            };

            return self.decide(&model, &addr, first_creation).await;
        }

        warn!("账户 #{} 端口持续变化，放弃本次同步", account_id);
        SyncOutcome::Failed
    }

    async fn decide(&self, model: &account::Model, addr: &str, first_creation: bool) -> SyncOutcome {
        if !status::should_sync(model.enable, model.expire_time, status::now()) {
            return self.absorb(model.id, addr, self.evict(addr).await);
        }

        let payload = match payload::build_for(&self.db, model).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("构建账户 #{} ({}) 的引擎结构失败: {}", model.id, addr, e);
                return SyncOutcome::Failed;
            }
        };

        let result = if first_creation {
            self.upsert_if_absent(&payload).await
        } else {
            self.upsert_probe(&payload).await
        };
        self.absorb(model.id, addr, result)
    }

    fn absorb(&self, account_id: i64, addr: &str, result: EngineResult<SyncOutcome>) -> SyncOutcome {
        match result {
            Ok(outcome) => {
                debug!("账户 #{} ({}) 同步完成: {:?}", account_id, addr, outcome);
                outcome
            }
            Err(e) => {
                warn!("账户 #{} ({}) 同步到引擎失败: {}", account_id, addr, e);
                SyncOutcome::Failed
            }
        }
    }

    async fn load(&self, account_id: i64) -> PanelResult<Option<account::Model>> {
        Ok(Account::find_by_id(account_id).one(&self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_account, insert_egress, memory_db, EngineCall, FakeEngine};
    use sea_orm::{ActiveModelTrait, Set};
    use std::time::Duration;

    async fn setup() -> (DatabaseConnection, Arc<FakeEngine>, Reconciler) {
        let db = memory_db().await;
        let engine = Arc::new(FakeEngine::new());
        let reconciler = Reconciler::new(db.clone(), engine.clone());
        (db, engine, reconciler)
    }

    #[tokio::test]
    async fn test_apply_creates_then_updates() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let account = insert_account(&db, 9001, egress.id, true, 30, &[]).await;

        assert_eq!(reconciler.apply(account.id).await, SyncOutcome::Created);
        assert_eq!(reconciler.apply(account.id).await, SyncOutcome::Updated);

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::ListAccounts,
                EngineCall::CreateAccount("0.0.0.0:9001".to_string()),
                EngineCall::ListAccounts,
                EngineCall::EditAccount("0.0.0.0:9001".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_evicts_disabled_and_expired() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let disabled = insert_account(&db, 9001, egress.id, false, 30, &[]).await;
        let expired = insert_account(&db, 9002, egress.id, true, -1, &[]).await;

        // 引擎中没有这些账户，删除返回不存在并被吸收
        assert_eq!(reconciler.apply(disabled.id).await, SyncOutcome::Absent);
        assert_eq!(reconciler.apply(expired.id).await, SyncOutcome::Absent);

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::DeleteAccount("0.0.0.0:9001".to_string()),
                EngineCall::DeleteAccount("0.0.0.0:9002".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_engine_outage_is_absorbed() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let account = insert_account(&db, 9001, egress.id, true, 30, &[]).await;

        engine.set_offline(true);
        assert_eq!(reconciler.apply(account.id).await, SyncOutcome::Failed);
        assert_eq!(reconciler.apply_created(account.id).await, SyncOutcome::Failed);

        engine.set_offline(false);
        assert_eq!(reconciler.apply(account.id).await, SyncOutcome::Created);
        assert!(engine.has_account("0.0.0.0:9001"));
    }

    #[tokio::test]
    async fn test_apply_created_uses_direct_create() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let account = insert_account(&db, 9001, egress.id, true, 30, &[]).await;

        assert_eq!(reconciler.apply_created(account.id).await, SyncOutcome::Created);
        // 再次直接创建会被引擎拒绝，失败被吸收
        assert_eq!(reconciler.apply_created(account.id).await, SyncOutcome::Failed);

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::CreateAccount("0.0.0.0:9001".to_string()),
                EngineCall::CreateAccount("0.0.0.0:9001".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_port_change_evicts_old_address() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let account = insert_account(&db, 9001, egress.id, true, 30, &[]).await;
        reconciler.apply(account.id).await;
        engine.clear_calls();

        let mut active: account::ActiveModel = account.clone().into();
        active.port = Set(9100);
        active.update(&db).await.unwrap();

        assert_eq!(
            reconciler.apply_port_change(9001, account.id).await,
            SyncOutcome::Created
        );
        assert!(!engine.has_account("0.0.0.0:9001"));
        assert!(engine.has_account("0.0.0.0:9100"));
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::DeleteAccount("0.0.0.0:9001".to_string()),
                EngineCall::ListAccounts,
                EngineCall::CreateAccount("0.0.0.0:9100".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_evict_vacated_skips_reused_port() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        insert_account(&db, 9001, egress.id, true, 30, &[]).await;

        assert_eq!(reconciler.evict_vacated(9001).await, SyncOutcome::Skipped);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_same_address_is_serialized() {
        let (db, engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        let account = insert_account(&db, 9001, egress.id, true, 30, &[]).await;
        engine.set_latency(Duration::from_millis(20));

        let (a, b) = tokio::join!(reconciler.apply(account.id), reconciler.apply(account.id));

        let mut outcomes = vec![a, b];
        outcomes.sort_by_key(|o| format!("{:?}", o));
        assert_eq!(outcomes, vec![SyncOutcome::Created, SyncOutcome::Updated]);
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::ListAccounts,
                EngineCall::CreateAccount("0.0.0.0:9001".to_string()),
                EngineCall::ListAccounts,
                EngineCall::EditAccount("0.0.0.0:9001".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_lock_map_is_pruned() {
        let (db, _engine, reconciler) = setup().await;
        let egress = insert_egress(&db, "eth0-ip", 10).await;
        for port in 9001..9006 {
            let account = insert_account(&db, port, egress.id, true, 30, &[]).await;
            reconciler.apply(account.id).await;
        }

        let _guard = reconciler.lock_addr("0.0.0.0:1").await;
        assert_eq!(reconciler.locks.lock().await.len(), 1);
    }
}
