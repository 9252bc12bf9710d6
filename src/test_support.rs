//! 测试用内存数据库和执行引擎假实现

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::json;

use crate::engine::{
    EngineAccountEntry, EngineError, EngineInterface, EngineOutbound, EnginePayload, EngineResult,
    EngineRule, ExecutionEngine,
};
use crate::entity::{account, account_rule, egress_target, rule_group};
use crate::migration::Migrator;
use crate::status::{self, AccountStatus};

/// 已迁移的内存 SQLite
pub async fn memory_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ListAccounts,
    CreateAccount(String),
    EditAccount(String),
    DeleteAccount(String),
    ListOutbounds,
    CreateOutbound(String),
    EditOutbound(String),
    DeleteOutbound(String),
    ListRules,
    AddRule(String),
    EditRule(String),
    DeleteRule(String),
    ListInterfaces,
    SystemInfo,
    Restart(String),
}

#[derive(Default)]
struct FakeState {
    accounts: BTreeMap<String, EnginePayload>,
    traffic: BTreeMap<String, (i64, i64)>,
    raw_entries: Vec<EngineAccountEntry>,
    outbounds: BTreeMap<String, EngineOutbound>,
    rules: BTreeMap<String, String>,
    interfaces: Vec<EngineInterface>,
    calls: Vec<EngineCall>,
    offline: bool,
    latency: Option<Duration>,
}

/// 记录调用的内存执行引擎
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

fn exists(what: &str) -> EngineError {
    EngineError::Status {
        status: 400,
        body: format!("{} already exists", what),
    }
}

fn missing(what: &str) -> EngineError {
    EngineError::Status {
        status: 404,
        body: format!("{} not found", what),
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    async fn enter(&self, call: EngineCall) -> EngineResult<()> {
        let (offline, latency) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.offline, state.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(EngineError::Connect("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn set_traffic(&self, addr: &str, send: i64, receive: i64) {
        self.lock().traffic.insert(addr.to_string(), (send, receive));
    }

    pub fn push_raw_entry(&self, entry: EngineAccountEntry) {
        self.lock().raw_entries.push(entry);
    }

    pub fn set_interfaces(&self, interfaces: Vec<EngineInterface>) {
        self.lock().interfaces = interfaces;
    }

    pub fn has_account(&self, addr: &str) -> bool {
        self.lock().accounts.contains_key(addr)
    }

    pub fn account(&self, addr: &str) -> Option<EnginePayload> {
        self.lock().accounts.get(addr).cloned()
    }

    pub fn outbound(&self, name: &str) -> Option<EngineOutbound> {
        self.lock().outbounds.get(name).cloned()
    }

    pub fn rule(&self, name: &str) -> Option<String> {
        self.lock().rules.get(name).cloned()
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn list_accounts(&self) -> EngineResult<Vec<EngineAccountEntry>> {
        self.enter(EngineCall::ListAccounts).await?;
        let state = self.lock();
        let mut entries: Vec<EngineAccountEntry> = state
            .accounts
            .values()
            .map(|payload| {
                let (send_byte, receive_byte) = state
                    .traffic
                    .get(&payload.listen_addr)
                    .copied()
                    .unwrap_or((payload.send_byte, payload.receive_byte));
                EngineAccountEntry {
                    listen_addr: payload.listen_addr.clone(),
                    send_byte,
                    receive_byte,
                }
            })
            .collect();
        entries.extend(state.raw_entries.iter().cloned());
        Ok(entries)
    }

    async fn create_account(&self, payload: &EnginePayload) -> EngineResult<()> {
        self.enter(EngineCall::CreateAccount(payload.listen_addr.clone()))
            .await?;
        let mut state = self.lock();
        if state.accounts.contains_key(&payload.listen_addr) {
            return Err(exists(&payload.listen_addr));
        }
        state
            .accounts
            .insert(payload.listen_addr.clone(), payload.clone());
        Ok(())
    }

    async fn edit_account(&self, listen_addr: &str, payload: &EnginePayload) -> EngineResult<()> {
        self.enter(EngineCall::EditAccount(listen_addr.to_string()))
            .await?;
        let mut state = self.lock();
        if state.accounts.remove(listen_addr).is_none() {
            return Err(missing(listen_addr));
        }
        state
            .accounts
            .insert(payload.listen_addr.clone(), payload.clone());
        Ok(())
    }

    async fn delete_account(&self, listen_addr: &str) -> EngineResult<()> {
        self.enter(EngineCall::DeleteAccount(listen_addr.to_string()))
            .await?;
        match self.lock().accounts.remove(listen_addr) {
            Some(_) => Ok(()),
            None => Err(missing(listen_addr)),
        }
    }

    async fn list_outbounds(&self) -> EngineResult<Vec<EngineOutbound>> {
        self.enter(EngineCall::ListOutbounds).await?;
        Ok(self.lock().outbounds.values().cloned().collect())
    }

    async fn create_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()> {
        self.enter(EngineCall::CreateOutbound(outbound.name.clone()))
            .await?;
        let mut state = self.lock();
        if state.outbounds.contains_key(&outbound.name) {
            return Err(exists(&outbound.name));
        }
        state
            .outbounds
            .insert(outbound.name.clone(), outbound.clone());
        Ok(())
    }

    async fn edit_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()> {
        self.enter(EngineCall::EditOutbound(outbound.name.clone()))
            .await?;
        let mut state = self.lock();
        match state.outbounds.get_mut(&outbound.name) {
            Some(existing) => {
                *existing = outbound.clone();
                Ok(())
            }
            None => Err(missing(&outbound.name)),
        }
    }

    async fn delete_outbound(&self, name: &str) -> EngineResult<()> {
        self.enter(EngineCall::DeleteOutbound(name.to_string()))
            .await?;
        match self.lock().outbounds.remove(name) {
            Some(_) => Ok(()),
            None => Err(missing(name)),
        }
    }

    async fn list_rules(&self) -> EngineResult<Vec<EngineRule>> {
        self.enter(EngineCall::ListRules).await?;
        Ok(self
            .lock()
            .rules
            .iter()
            .map(|(name, data)| EngineRule {
                name: name.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn add_rule(&self, rule: &EngineRule) -> EngineResult<()> {
        self.enter(EngineCall::AddRule(rule.name.clone())).await?;
        let mut state = self.lock();
        if state.rules.contains_key(&rule.name) {
            return Err(exists(&rule.name));
        }
        state.rules.insert(rule.name.clone(), rule.data.clone());
        Ok(())
    }

    async fn edit_rule(&self, rule: &EngineRule) -> EngineResult<()> {
        self.enter(EngineCall::EditRule(rule.name.clone())).await?;
        let mut state = self.lock();
        match state.rules.get_mut(&rule.name) {
            Some(data) => {
                *data = rule.data.clone();
                Ok(())
            }
            None => Err(missing(&rule.name)),
        }
    }

    async fn delete_rule(&self, name: &str) -> EngineResult<()> {
        self.enter(EngineCall::DeleteRule(name.to_string())).await?;
        match self.lock().rules.remove(name) {
            Some(_) => Ok(()),
            None => Err(missing(name)),
        }
    }

    async fn list_interfaces(&self) -> EngineResult<Vec<EngineInterface>> {
        self.enter(EngineCall::ListInterfaces).await?;
        Ok(self.lock().interfaces.clone())
    }

    async fn system_info(&self) -> EngineResult<serde_json::Value> {
        self.enter(EngineCall::SystemInfo).await?;
        Ok(json!({"cpu": 1.5, "mem": 42.0}))
    }

    async fn restart(&self, operation: &str) -> EngineResult<serde_json::Value> {
        self.enter(EngineCall::Restart(operation.to_string())).await?;
        Ok(json!("ok"))
    }
}

/// 未入库的账户，id 为 0
pub fn sample_account(port: i32, egress_id: i64) -> account::Model {
    let now = status::now();
    account::Model {
        id: 0,
        username: "abc123".to_string(),
        password: "pw123".to_string(),
        port,
        protocol: "socks5".to_string(),
        total_traffic: 0,
        up_traffic: 0,
        down_traffic: 0,
        expire_time: now + ChronoDuration::days(30),
        last_seen: None,
        enable: true,
        status: AccountStatus::Active,
        send_limit: 0,
        receive_limit: 0,
        max_conn_count: 0,
        egress_id,
        remark: None,
        email: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_egress(id: i64, name: &str) -> egress_target::Model {
    let now = status::now();
    egress_target::Model {
        id,
        name: name.to_string(),
        protocol: "direct".to_string(),
        config: json!({"eh": "10.0.0.1", "proxyUrl": ""}),
        local_ip: Some("10.0.0.1".to_string()),
        remark: None,
        auto_generated: false,
        max_users: 10,
        created_at: now,
        updated_at: now,
    }
}

pub async fn insert_egress(db: &DatabaseConnection, name: &str, max_users: i32) -> egress_target::Model {
    let now = status::now();
    egress_target::ActiveModel {
        name: Set(name.to_string()),
        protocol: Set("direct".to_string()),
        config: Set(json!({"eh": format!("10.0.0.{}", name.len()), "proxyUrl": ""})),
        local_ip: Set(None),
        remark: Set(None),
        auto_generated: Set(false),
        max_users: Set(max_users),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_rule(db: &DatabaseConnection, name: &str, priority: i32) -> rule_group::Model {
    let now = status::now();
    rule_group::ActiveModel {
        name: Set(name.to_string()),
        content: Set(format!("{}.example.com = allow", name)),
        priority: Set(priority),
        remark: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// 插入账户，`expire_days` 为负数时账户已过期
pub async fn insert_account(
    db: &DatabaseConnection,
    port: i32,
    egress_id: i64,
    enable: bool,
    expire_days: i64,
    rule_ids: &[i64],
) -> account::Model {
    let now = status::now();
    let expire_time = now + ChronoDuration::days(expire_days);
    let template = sample_account(port, egress_id);

    let model = account::ActiveModel {
        username: Set(template.username),
        password: Set(template.password),
        port: Set(port),
        protocol: Set(template.protocol),
        total_traffic: Set(0),
        up_traffic: Set(0),
        down_traffic: Set(0),
        expire_time: Set(expire_time),
        last_seen: Set(None),
        enable: Set(enable),
        status: Set(status::derive(enable, expire_time, now)),
        send_limit: Set(0),
        receive_limit: Set(0),
        max_conn_count: Set(0),
        egress_id: Set(egress_id),
        remark: Set(None),
        email: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    for rule_id in rule_ids {
        account_rule::ActiveModel {
            account_id: Set(model.id),
            rule_id: Set(*rule_id),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();
    }

    model
}
