//! 账户生命周期操作
//!
//! 每个变更先在本地校验并提交，再交给 `Reconciler` 同步到执行引擎。
//! 涉及出口分配或端口占用的变更都在 `Allocator` 守卫下的单个事务里完成。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::entity::{account, account_rule, egress_target, rule_group};
use crate::entity::{Account, AccountRule, EgressTarget, RuleGroup};
use crate::error::{PanelError, PanelResult};
use crate::inventory::{self, Allocator};
use crate::port_range::{free_ports, is_valid_port, parse_port_ranges};
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::status;

const SUPPORTED_PROTOCOLS: [&str; 3] = ["socks5", "http", "ss"];
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MAX_QUICK_COUNT: u32 = 500;
const MAX_BATCH_SIZE: usize = 100;
const MAX_DAYS: i64 = 36500;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: i32,
    pub protocol: Option<String>,
    #[serde(default)]
    pub total_traffic: i64,
    pub expire_time: Option<DateTime<Utc>>,
    pub expiration_days: Option<i64>,
    #[serde(default = "default_true")]
    pub enable: bool,
    pub send_limit: Option<i32>,
    pub receive_limit: Option<i32>,
    pub max_conn_count: Option<i32>,
    pub egress_id: i64,
    #[serde(default)]
    pub rule_ids: Vec<i64>,
    pub remark: Option<String>,
    pub email: Option<String>,
}

/// 由分配器选择出口的创建请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    /// 不指定时从配置的端口范围中取最小空闲端口
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub total_traffic: Option<i64>,
    pub expiration_days: Option<i64>,
    #[serde(default)]
    pub rule_ids: Vec<i64>,
    pub remark: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuickProvisionRequest {
    pub rule_id: i64,
    pub count: u32,
    pub protocol: Option<String>,
    pub expiration_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccountRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub total_traffic: Option<i64>,
    pub expire_time: Option<DateTime<Utc>>,
    pub enable: Option<bool>,
    pub send_limit: Option<i32>,
    pub receive_limit: Option<i32>,
    pub max_conn_count: Option<i32>,
    pub egress_id: Option<i64>,
    pub rule_ids: Option<Vec<i64>>,
    pub remark: Option<String>,
    pub email: Option<String>,
}

/// 续期：显式过期时间或在当前基础上延长天数，可同时增加流量
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenewRequest {
    pub expire_time: Option<DateTime<Utc>>,
    pub extend_days: Option<i64>,
    pub add_traffic_gb: Option<f64>,
}

/// 变更后的账户及其同步结果
#[derive(Debug, Clone, Serialize)]
pub struct AccountSync {
    #[serde(flatten)]
    pub account: account::Model,
    pub sync: SyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRef {
    pub id: i64,
    pub name: String,
}

/// 带出口名和规则组的账户视图
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub account: account::Model,
    #[serde(rename = "egressName")]
    pub egress_name: Option<String>,
    pub rules: Vec<RuleRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDeletion {
    pub port: i32,
    pub deleted: bool,
    pub message: String,
}

/// 批量更新中的一项
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUpdateItem {
    pub account_id: i64,
    pub updates: UpdateAccountRequest,
}

/// 批量创建或更新中单项的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    fn done(result: &AccountSync) -> Self {
        Self {
            success: true,
            account_id: Some(result.account.id),
            username: Some(result.account.username.clone()),
            port: Some(result.account.port),
            sync: Some(result.sync),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub success_count: u64,
    pub failure_count: u64,
    pub results: Vec<BatchItem>,
}

impl BatchResult {
    fn record(&mut self, item: BatchItem) {
        if item.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.results.push(item);
    }
}

fn ensure_batch_size(len: usize) -> PanelResult<()> {
    if len == 0 || len > MAX_BATCH_SIZE {
        return Err(PanelError::InvalidRequest(format!(
            "批量数量必须在 1-{} 之间",
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

/// 新账户的全部字段
struct NewAccount {
    username: String,
    password: String,
    port: i32,
    protocol: String,
    total_traffic: i64,
    expire_time: DateTime<Utc>,
    enable: bool,
    send_limit: i32,
    receive_limit: i32,
    max_conn_count: i32,
    egress_id: i64,
    remark: Option<String>,
    email: Option<String>,
}

pub struct AccountService {
    db: DatabaseConnection,
    config: Arc<Config>,
    reconciler: Arc<Reconciler>,
    allocator: Arc<Allocator>,
}

fn validate_protocol(protocol: &str) -> PanelResult<()> {
    if SUPPORTED_PROTOCOLS.contains(&protocol) {
        Ok(())
    } else {
        Err(PanelError::InvalidRequest(format!("不支持的协议: {}", protocol)))
    }
}

fn validate_limits(values: &[(&str, i64)]) -> PanelResult<()> {
    for (name, value) in values {
        if *value < 0 {
            return Err(PanelError::InvalidRequest(format!("{} 不能为负数", name)));
        }
    }
    Ok(())
}

async fn ensure_port_free<C: ConnectionTrait>(
    db: &C,
    port: i32,
    except: Option<i64>,
) -> PanelResult<()> {
    if !is_valid_port(port) {
        return Err(PanelError::InvalidPort(port));
    }

    let mut query = Account::find().filter(account::Column::Port.eq(port));
    if let Some(id) = except {
        query = query.filter(account::Column::Id.ne(id));
    }
    if query.one(db).await?.is_some() {
        return Err(PanelError::DuplicatePort(port));
    }
    Ok(())
}

async fn ensure_egress<C: ConnectionTrait>(db: &C, egress_id: i64) -> PanelResult<egress_target::Model> {
    EgressTarget::find_by_id(egress_id)
        .one(db)
        .await?
        .ok_or_else(|| PanelError::EgressNotFound(format!("#{}", egress_id)))
}

/// 校验规则组存在，返回去重后的 id
async fn ensure_rules<C: ConnectionTrait>(db: &C, rule_ids: &[i64]) -> PanelResult<Vec<i64>> {
    let unique: BTreeSet<i64> = rule_ids.iter().copied().collect();
    if unique.is_empty() {
        return Ok(Vec::new());
    }

    let found: BTreeSet<i64> = RuleGroup::find()
        .filter(rule_group::Column::Id.is_in(unique.iter().copied()))
        .all(db)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();

    if let Some(missing) = unique.difference(&found).next() {
        return Err(PanelError::RuleNotFound(format!("#{}", missing)));
    }
    Ok(unique.into_iter().collect())
}

async fn insert_account<C: ConnectionTrait>(
    db: &C,
    new: NewAccount,
    rule_ids: &[i64],
) -> PanelResult<account::Model> {
    let now = status::now();
    let expire_time = status::normalize(new.expire_time);

    let model = account::ActiveModel {
        username: Set(new.username),
        password: Set(new.password),
        port: Set(new.port),
        protocol: Set(new.protocol),
        total_traffic: Set(new.total_traffic),
        up_traffic: Set(0),
        down_traffic: Set(0),
        expire_time: Set(expire_time),
        last_seen: Set(None),
        enable: Set(new.enable),
        status: Set(status::derive(new.enable, expire_time, now)),
        send_limit: Set(new.send_limit),
        receive_limit: Set(new.receive_limit),
        max_conn_count: Set(new.max_conn_count),
        egress_id: Set(new.egress_id),
        remark: Set(new.remark),
        email: Set(new.email),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    replace_links(db, model.id, rule_ids).await?;
    Ok(model)
}

async fn replace_links<C: ConnectionTrait>(db: &C, account_id: i64, rule_ids: &[i64]) -> PanelResult<()> {
    AccountRule::delete_many()
        .filter(account_rule::Column::AccountId.eq(account_id))
        .exec(db)
        .await?;

    let now = status::now();
    for rule_id in rule_ids {
        account_rule::ActiveModel {
            account_id: Set(account_id),
            rule_id: Set(*rule_id),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// base 之后 days 天，天数限制在 1..=MAX_DAYS
fn add_days(base: DateTime<Utc>, days: i64) -> PanelResult<DateTime<Utc>> {
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(PanelError::InvalidRequest(format!(
            "天数必须在 1-{} 之间",
            MAX_DAYS
        )));
    }
    Duration::try_days(days)
        .and_then(|delta| base.checked_add_signed(delta))
        .ok_or_else(|| PanelError::InvalidRequest(format!("过期时间超出范围: {} 天", days)))
}

async fn used_ports<C: ConnectionTrait>(db: &C) -> PanelResult<BTreeSet<i32>> {
    let ports: Vec<i32> = Account::find()
        .select_only()
        .column(account::Column::Port)
        .into_tuple()
        .all(db)
        .await?;
    Ok(ports.into_iter().collect())
}

impl AccountService {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<Config>,
        reconciler: Arc<Reconciler>,
        allocator: Arc<Allocator>,
    ) -> Self {
        Self {
            db,
            config,
            reconciler,
            allocator,
        }
    }

    fn expiry_from_days(&self, days: Option<i64>) -> PanelResult<DateTime<Utc>> {
        add_days(
            status::now(),
            days.unwrap_or(self.config.defaults.expiration_days),
        )
    }

    fn credentials(
        &self,
        protocol: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> (String, String) {
        let (gen_user, gen_pass) = self.config.defaults.generate_credentials(protocol);
        (
            username.filter(|u| !u.is_empty()).unwrap_or(gen_user),
            password.filter(|p| !p.is_empty()).unwrap_or(gen_pass),
        )
    }

    async fn find(&self, id: i64) -> PanelResult<account::Model> {
        Account::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(PanelError::AccountNotFound(id))
    }

    /// 指定出口创建账户
    pub async fn create(&self, req: CreateAccountRequest) -> PanelResult<AccountSync> {
        let protocol = req
            .protocol
            .clone()
            .unwrap_or_else(|| self.config.defaults.protocol.clone());
        validate_protocol(&protocol)?;
        validate_limits(&[
            ("total_traffic", req.total_traffic),
            ("send_limit", req.send_limit.unwrap_or(0) as i64),
            ("receive_limit", req.receive_limit.unwrap_or(0) as i64),
            ("max_conn_count", req.max_conn_count.unwrap_or(0) as i64),
        ])?;
        let expire_time = match req.expire_time {
            Some(t) => t,
            None => self.expiry_from_days(req.expiration_days)?,
        };
        let (username, password) = self.credentials(&protocol, req.username, req.password);
        let defaults = &self.config.defaults;

        let model = {
            let _guard = self.allocator.reserve().await;
            let txn = self.db.begin().await?;

            ensure_port_free(&txn, req.port, None).await?;
            let egress = ensure_egress(&txn, req.egress_id).await?;
            let rule_ids = ensure_rules(&txn, &req.rule_ids).await?;

            if req.enable {
                let usage = inventory::target_usage(&txn, egress.id).await?;
                if usage.available_slots == 0 {
                    warn!("出口 {} 已达到容量上限 {}，仍按指定创建", egress.name, egress.max_users);
                }
            }

            let model = insert_account(
                &txn,
                NewAccount {
                    username,
                    password,
                    port: req.port,
                    protocol,
                    total_traffic: req.total_traffic,
                    expire_time,
                    enable: req.enable,
                    send_limit: req.send_limit.unwrap_or(defaults.send_limit),
                    receive_limit: req.receive_limit.unwrap_or(defaults.receive_limit),
                    max_conn_count: req.max_conn_count.unwrap_or(defaults.max_conn_count),
                    egress_id: egress.id,
                    remark: req.remark,
                    email: req.email,
                },
                &rule_ids,
            )
            .await?;

            txn.commit().await?;
            model
        };

        info!("✅ 创建账户 #{} 端口 {}", model.id, model.port);
        let sync = self.reconciler.apply_created(model.id).await;
        Ok(AccountSync { account: model, sync })
    }

    /// 由分配器在规则组内选择出口并创建账户
    pub async fn provision(&self, req: ProvisionRequest) -> PanelResult<AccountSync> {
        let defaults = &self.config.defaults;
        let protocol = req.protocol.clone().unwrap_or_else(|| defaults.protocol.clone());
        validate_protocol(&protocol)?;
        let total_traffic = req.total_traffic.unwrap_or_else(|| defaults.total_traffic());
        validate_limits(&[("total_traffic", total_traffic)])?;
        let expire_time = self.expiry_from_days(req.expiration_days)?;
        let (username, password) = self.credentials(&protocol, req.username, req.password);

        let model = {
            let _guard = self.allocator.reserve().await;
            let txn = self.db.begin().await?;

            let port = match req.port {
                Some(port) => {
                    ensure_port_free(&txn, port, None).await?;
                    port
                }
                None => self.next_free_ports(&txn, 1).await?[0],
            };
            let rule_ids = ensure_rules(&txn, &req.rule_ids).await?;
            let target = inventory::select_targets(&txn, &rule_ids, 1)
                .await?
                .remove(0);

            let model = insert_account(
                &txn,
                NewAccount {
                    username,
                    password,
                    port,
                    protocol,
                    total_traffic,
                    expire_time,
                    enable: true,
                    send_limit: defaults.send_limit,
                    receive_limit: defaults.receive_limit,
                    max_conn_count: defaults.max_conn_count,
                    egress_id: target.id,
                    remark: req.remark,
                    email: req.email,
                },
                &rule_ids,
            )
            .await?;

            txn.commit().await?;
            model
        };

        info!("✅ 分配账户 #{} 端口 {} 出口 #{}", model.id, model.port, model.egress_id);
        let sync = self.reconciler.apply_created(model.id).await;
        Ok(AccountSync { account: model, sync })
    }

    /// 按默认配置为一个规则组批量创建账户
    pub async fn quick_provision(&self, req: QuickProvisionRequest) -> PanelResult<Vec<AccountSync>> {
        if req.count == 0 || req.count > MAX_QUICK_COUNT {
            return Err(PanelError::InvalidRequest(format!(
                "数量必须在 1-{} 之间",
                MAX_QUICK_COUNT
            )));
        }
        let defaults = &self.config.defaults;
        let protocol = req.protocol.clone().unwrap_or_else(|| defaults.protocol.clone());
        validate_protocol(&protocol)?;
        let expire_time = self.expiry_from_days(req.expiration_days)?;

        let (ok, reason) = inventory::can_provision(&self.db, req.rule_id, req.count as u64).await?;
        if !ok {
            warn!("规则 #{} 批量创建被拒绝: {}", req.rule_id, reason);
            let inv = inventory::inventory(&self.db, req.rule_id).await?;
            return Err(PanelError::InsufficientInventory {
                available: inv.available,
                requested: req.count as u64,
            });
        }

        let created = {
            let _guard = self.allocator.reserve().await;
            let txn = self.db.begin().await?;

            let count = req.count as usize;
            let targets = inventory::select_targets(&txn, &[req.rule_id], count).await?;
            let ports = self.next_free_ports(&txn, count).await?;

            let mut created = Vec::with_capacity(count);
            for (target, port) in targets.into_iter().zip(ports) {
                let (username, password) = self.credentials(&protocol, None, None);
                let model = insert_account(
                    &txn,
                    NewAccount {
                        username,
                        password,
                        port,
                        protocol: protocol.clone(),
                        total_traffic: defaults.total_traffic(),
                        expire_time,
                        enable: true,
                        send_limit: defaults.send_limit,
                        receive_limit: defaults.receive_limit,
                        max_conn_count: defaults.max_conn_count,
                        egress_id: target.id,
                        remark: None,
                        email: None,
                    },
                    &[req.rule_id],
                )
                .await?;
                created.push(model);
            }

            txn.commit().await?;
            created
        };

        info!("✅ 规则 #{} 批量创建 {} 个账户", req.rule_id, created.len());
        let mut results = Vec::with_capacity(created.len());
        for model in created {
            let sync = self.reconciler.apply_created(model.id).await;
            results.push(AccountSync { account: model, sync });
        }
        Ok(results)
    }

    async fn next_free_ports<C: ConnectionTrait>(&self, db: &C, count: usize) -> PanelResult<Vec<i32>> {
        let ranges = parse_port_ranges(&self.config.defaults.port_range)
            .map_err(|e| PanelError::InvalidRequest(e.to_string()))?;
        let used = used_ports(db).await?;
        let ports = free_ports(&ranges, &used, count);
        if ports.len() < count {
            return Err(PanelError::NoFreePort);
        }
        Ok(ports)
    }

    /// 修改字段；端口变化时旧地址会先从引擎中清理
    pub async fn update(&self, id: i64, req: UpdateAccountRequest) -> PanelResult<AccountSync> {
        if let Some(protocol) = &req.protocol {
            validate_protocol(protocol)?;
        }
        validate_limits(&[
            ("total_traffic", req.total_traffic.unwrap_or(0)),
            ("send_limit", req.send_limit.unwrap_or(0) as i64),
            ("receive_limit", req.receive_limit.unwrap_or(0) as i64),
            ("max_conn_count", req.max_conn_count.unwrap_or(0) as i64),
        ])?;

        let (model, old_port) = {
            let _guard = self.allocator.reserve().await;
            let txn = self.db.begin().await?;

            let existing = Account::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or(PanelError::AccountNotFound(id))?;
            let old_port = existing.port;

            if let Some(port) = req.port {
                if port != old_port {
                    ensure_port_free(&txn, port, Some(id)).await?;
                }
            }
            if let Some(egress_id) = req.egress_id {
                ensure_egress(&txn, egress_id).await?;
            }
            let rule_ids = match &req.rule_ids {
                Some(ids) => Some(ensure_rules(&txn, ids).await?),
                None => None,
            };

            let enable = req.enable.unwrap_or(existing.enable);
            let expire_time = req
                .expire_time
                .map(status::normalize)
                .unwrap_or(existing.expire_time);
            let now = status::now();

            let mut active: account::ActiveModel = existing.into();
            if let Some(username) = req.username {
                active.username = Set(username);
            }
            if let Some(password) = req.password {
                active.password = Set(password);
            }
            if let Some(port) = req.port {
                active.port = Set(port);
            }
            if let Some(protocol) = req.protocol {
                active.protocol = Set(protocol);
            }
            if let Some(total) = req.total_traffic {
                active.total_traffic = Set(total);
            }
            if let Some(limit) = req.send_limit {
                active.send_limit = Set(limit);
            }
            if let Some(limit) = req.receive_limit {
                active.receive_limit = Set(limit);
            }
            if let Some(max) = req.max_conn_count {
                active.max_conn_count = Set(max);
            }
            if let Some(egress_id) = req.egress_id {
                active.egress_id = Set(egress_id);
            }
            if req.remark.is_some() {
                active.remark = Set(req.remark);
            }
            if req.email.is_some() {
                active.email = Set(req.email);
            }
            active.enable = Set(enable);
            active.expire_time = Set(expire_time);
            active.status = Set(status::derive(enable, expire_time, now));
            active.updated_at = Set(now);

            let model = active.update(&txn).await?;
            if let Some(rule_ids) = rule_ids {
                replace_links(&txn, id, &rule_ids).await?;
            }

            txn.commit().await?;
            (model, old_port)
        };

        let sync = if model.port != old_port {
            info!("账户 #{} 端口 {} -> {}", id, old_port, model.port);
            self.reconciler.apply_port_change(old_port, id).await
        } else {
            self.reconciler.apply(id).await
        };
        Ok(AccountSync { account: model, sync })
    }

    /// 续期，过期时间只增不减
    pub async fn renew(&self, id: i64, req: RenewRequest) -> PanelResult<AccountSync> {
        let add_bytes = match req.add_traffic_gb {
            Some(gb) if gb < 0.0 || !gb.is_finite() => {
                return Err(PanelError::InvalidRequest("增加流量不能为负数".to_string()));
            }
            Some(gb) => (gb * BYTES_PER_GB).round() as i64,
            None => 0,
        };

        let model = {
            let _guard = self.allocator.reserve().await;
            let txn = self.db.begin().await?;

            let existing = Account::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or(PanelError::AccountNotFound(id))?;
            let now = status::now();

            let requested = match (req.expire_time, req.extend_days) {
                (Some(t), _) => status::normalize(t),
                (None, Some(days)) => {
                    let base = if existing.expire_time <= now {
                        now
                    } else {
                        existing.expire_time
                    };
                    add_days(base, days)?
                }
                _ => {
                    return Err(PanelError::InvalidRequest(
                        "需要指定新的过期时间或延长天数".to_string(),
                    ));
                }
            };
            let expire_time = requested.max(existing.expire_time);

            let enable = if self.config.defaults.renew_reenables {
                true
            } else {
                existing.enable
            };

            // 不限流量的账户保持不限
            let total_traffic = if existing.total_traffic > 0 {
                existing.total_traffic.saturating_add(add_bytes)
            } else {
                existing.total_traffic
            };

            let mut active: account::ActiveModel = existing.into();
            active.expire_time = Set(expire_time);
            active.enable = Set(enable);
            active.total_traffic = Set(total_traffic);
            active.status = Set(status::derive(enable, expire_time, now));
            active.updated_at = Set(now);
            let model = active.update(&txn).await?;

            txn.commit().await?;
            model
        };

        info!("账户 #{} 续期至 {}", id, model.expire_time);
        let sync = self.reconciler.apply(id).await;
        Ok(AccountSync { account: model, sync })
    }

    /// 切换启用状态
    pub async fn toggle(&self, id: i64) -> PanelResult<AccountSync> {
        let model = {
            let _guard = self.allocator.reserve().await;
            let existing = self.find(id).await?;
            let now = status::now();
            let enable = !existing.enable;
            let expire_time = existing.expire_time;

            let mut active: account::ActiveModel = existing.into();
            active.enable = Set(enable);
            active.status = Set(status::derive(enable, expire_time, now));
            active.updated_at = Set(now);
            active.update(&self.db).await?
        };

        info!("账户 #{} {}", id, if model.enable { "已启用" } else { "已禁用" });
        let sync = self.reconciler.apply(id).await;
        Ok(AccountSync { account: model, sync })
    }

    /// 清零已用流量
    pub async fn reset_traffic(&self, id: i64) -> PanelResult<AccountSync> {
        let existing = self.find(id).await?;
        let now = status::now();
        let status = status::derive(existing.enable, existing.expire_time, now);

        let mut active: account::ActiveModel = existing.into();
        active.up_traffic = Set(0);
        active.down_traffic = Set(0);
        active.status = Set(status);
        active.updated_at = Set(now);
        let model = active.update(&self.db).await?;

        let sync = self.reconciler.apply(id).await;
        Ok(AccountSync { account: model, sync })
    }

    /// 删除账户并从引擎中移除
    pub async fn delete(&self, id: i64) -> PanelResult<SyncOutcome> {
        let existing = self.find(id).await?;

        let txn = self.db.begin().await?;
        AccountRule::delete_many()
            .filter(account_rule::Column::AccountId.eq(id))
            .exec(&txn)
            .await?;
        Account::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!("🗑️ 删除账户 #{} 端口 {}", id, existing.port);
        Ok(self.reconciler.evict_vacated(existing.port).await)
    }

    /// 逐项创建，单项失败只记录在结果中
    pub async fn create_many(&self, requests: Vec<CreateAccountRequest>) -> PanelResult<BatchResult> {
        ensure_batch_size(requests.len())?;

        let mut batch = BatchResult::default();
        for req in requests {
            let (username, port) = (req.username.clone(), req.port);
            match self.create(req).await {
                Ok(result) => batch.record(BatchItem::done(&result)),
                Err(e) => {
                    warn!("批量创建端口 {} 失败: {}", port, e);
                    batch.record(BatchItem {
                        success: false,
                        account_id: None,
                        username,
                        port: Some(port),
                        sync: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "📦 批量创建完成: 成功 {}，失败 {}",
            batch.success_count, batch.failure_count
        );
        Ok(batch)
    }

    /// 逐项更新，单项失败只记录在结果中
    pub async fn update_many(&self, items: Vec<BatchUpdateItem>) -> PanelResult<BatchResult> {
        ensure_batch_size(items.len())?;

        let mut batch = BatchResult::default();
        for item in items {
            let id = item.account_id;
            match self.update(id, item.updates).await {
                Ok(result) => batch.record(BatchItem::done(&result)),
                Err(e) => {
                    warn!("批量更新账户 #{} 失败: {}", id, e);
                    batch.record(BatchItem {
                        success: false,
                        account_id: Some(id),
                        username: None,
                        port: None,
                        sync: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "📦 批量更新完成: 成功 {}，失败 {}",
            batch.success_count, batch.failure_count
        );
        Ok(batch)
    }

    /// 按端口批量删除，单个失败不影响其他端口
    pub async fn delete_by_ports(&self, ports: &[i32]) -> Vec<PortDeletion> {
        let mut results = Vec::with_capacity(ports.len());
        for port in ports {
            let outcome = match self.find_by_port(*port).await {
                Ok(model) => self.delete(model.id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            results.push(match outcome {
                Ok(()) => PortDeletion {
                    port: *port,
                    deleted: true,
                    message: "OK".to_string(),
                },
                Err(e) => PortDeletion {
                    port: *port,
                    deleted: false,
                    message: e.to_string(),
                },
            });
        }
        results
    }

    async fn find_by_port(&self, port: i32) -> PanelResult<account::Model> {
        Account::find()
            .filter(account::Column::Port.eq(port))
            .one(&self.db)
            .await?
            .ok_or(PanelError::AccountPortNotFound(port))
    }

    pub async fn get(&self, id: i64) -> PanelResult<AccountDetail> {
        let model = self.find(id).await?;
        Ok(self.details(vec![model]).await?.remove(0))
    }

    pub async fn get_by_port(&self, port: i32) -> PanelResult<AccountDetail> {
        let model = self.find_by_port(port).await?;
        Ok(self.details(vec![model]).await?.remove(0))
    }

    pub async fn list(&self) -> PanelResult<Vec<AccountDetail>> {
        let models = Account::find()
            .order_by_asc(account::Column::Id)
            .all(&self.db)
            .await?;
        self.details(models).await
    }

    async fn details(&self, models: Vec<account::Model>) -> PanelResult<Vec<AccountDetail>> {
        let egress_names: HashMap<i64, String> = EgressTarget::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|e| (e.id, e.name))
            .collect();
        let rules: HashMap<i64, rule_group::Model> = RuleGroup::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
        let links = if ids.is_empty() {
            Vec::new()
        } else {
            AccountRule::find()
                .filter(account_rule::Column::AccountId.is_in(ids))
                .all(&self.db)
                .await?
        };

        let mut by_account: HashMap<i64, Vec<&rule_group::Model>> = HashMap::new();
        for link in &links {
            if let Some(rule) = rules.get(&link.rule_id) {
                by_account.entry(link.account_id).or_default().push(rule);
            }
        }

        Ok(models
            .into_iter()
            .map(|account| {
                let mut linked = by_account.remove(&account.id).unwrap_or_default();
                linked.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
                AccountDetail {
                    egress_name: egress_names.get(&account.egress_id).cloned(),
                    rules: linked
                        .into_iter()
                        .map(|r| RuleRef {
                            id: r.id,
                            name: r.name.clone(),
                        })
                        .collect(),
                    account,
                }
            })
            .collect())
    }
}
