//! 出口 IP 库存计算与分配
//!
//! 规则：同一个出口 IP 在同一规则组内最多服务一个激活账户，且全局激活账户数不超过 `max_users`。
//! 激活账户指 enable 且未过期的账户，与存储的 status 字段无关。

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::entity::{account, account_rule, egress_target, rule_group};
use crate::entity::{Account, AccountRule, EgressTarget, RuleGroup};
use crate::error::{PanelError, PanelResult};
use crate::status;

/// 单个规则组的库存
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub rule_id: i64,
    pub rule_name: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// 单个出口的使用情况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUsage {
    pub egress_id: i64,
    pub name: String,
    pub max_users: i32,
    pub active_accounts: u64,
    pub available_slots: u64,
    pub groups: Vec<GroupUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUsage {
    pub rule_id: i64,
    pub rule_name: String,
    pub account_count: u64,
}

/// 预留-创建的串行化点
///
/// 持有 `reserve()` 返回的守卫期间完成 "选择出口 + 写入账户" 事务，
/// 并发的分配请求只能看到已提交的占用。
#[derive(Default)]
pub struct Allocator {
    lock: Mutex<()>,
}

impl Allocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reserve(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

fn active_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(account::Column::Enable.eq(true))
        .add(account::Column::ExpireTime.gt(now))
}

async fn find_rule<C: ConnectionTrait>(db: &C, rule_id: i64) -> PanelResult<rule_group::Model> {
    RuleGroup::find_by_id(rule_id)
        .one(db)
        .await?
        .ok_or_else(|| PanelError::RuleNotFound(format!("#{}", rule_id)))
}

/// 规则组内激活账户占用的出口
async fn used_targets<C: ConnectionTrait>(
    db: &C,
    rule_id: i64,
    now: DateTime<Utc>,
) -> PanelResult<HashSet<i64>> {
    let accounts = Account::find()
        .inner_join(AccountRule)
        .filter(account_rule::Column::RuleId.eq(rule_id))
        .filter(active_condition(now))
        .all(db)
        .await?;

    Ok(accounts.into_iter().map(|a| a.egress_id).collect())
}

/// 每个出口上的激活账户数（不分规则组）
async fn active_counts<C: ConnectionTrait>(
    db: &C,
    now: DateTime<Utc>,
) -> PanelResult<HashMap<i64, u64>> {
    let accounts = Account::find()
        .filter(active_condition(now))
        .all(db)
        .await?;

    let mut counts = HashMap::new();
    for a in accounts {
        *counts.entry(a.egress_id).or_insert(0u64) += 1;
    }
    Ok(counts)
}

/// 规则组库存：total 为全部出口数，used 为该组激活账户占用的不同出口数
pub async fn inventory<C: ConnectionTrait>(db: &C, rule_id: i64) -> PanelResult<Inventory> {
    let rule = find_rule(db, rule_id).await?;
    let total = EgressTarget::find().count(db).await?;
    let used = used_targets(db, rule_id, status::now()).await?.len() as u64;

    Ok(Inventory {
        rule_id,
        rule_name: rule.name,
        total,
        used,
        available: total.saturating_sub(used),
    })
}

/// 全部规则组的库存，按优先级降序
pub async fn all_inventories<C: ConnectionTrait>(db: &C) -> PanelResult<Vec<Inventory>> {
    let rules = RuleGroup::find()
        .order_by_desc(rule_group::Column::Priority)
        .order_by_asc(rule_group::Column::Id)
        .all(db)
        .await?;

    let mut inventories = Vec::with_capacity(rules.len());
    for rule in rules {
        inventories.push(inventory(db, rule.id).await?);
    }
    Ok(inventories)
}

/// 可分配的出口：在所有给定规则组内都未被占用，且自身未达容量上限
pub async fn admissible_targets<C: ConnectionTrait>(
    db: &C,
    rule_ids: &[i64],
    limit: Option<usize>,
) -> PanelResult<Vec<egress_target::Model>> {
    let now = status::now();

    let mut taken = HashSet::new();
    for rule_id in rule_ids {
        find_rule(db, *rule_id).await?;
        taken.extend(used_targets(db, *rule_id, now).await?);
    }

    let counts = active_counts(db, now).await?;
    let targets = EgressTarget::find()
        .order_by_asc(egress_target::Column::Id)
        .all(db)
        .await?;

    let admissible = targets
        .into_iter()
        .filter(|t| !taken.contains(&t.id))
        .filter(|t| counts.get(&t.id).copied().unwrap_or(0) < t.max_users.max(0) as u64)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    Ok(admissible)
}

/// 检查规则组是否还能创建 count 个账户
pub async fn can_provision<C: ConnectionTrait>(
    db: &C,
    rule_id: i64,
    count: u64,
) -> PanelResult<(bool, String)> {
    let inv = inventory(db, rule_id).await?;
    if inv.available < count {
        return Ok((
            false,
            format!("可用 IP 不足: 可用 {}，需要 {}", inv.available, count),
        ));
    }
    Ok((true, "OK".to_string()))
}

/// 为 count 个新账户各选一个不同的出口，库存不足时整体拒绝
pub async fn select_targets<C: ConnectionTrait>(
    db: &C,
    rule_ids: &[i64],
    count: usize,
) -> PanelResult<Vec<egress_target::Model>> {
    let targets = admissible_targets(db, rule_ids, Some(count)).await?;
    if targets.len() < count {
        if targets.is_empty() && count == 1 {
            if let Some(rule_id) = rule_ids.first() {
                return Err(PanelError::NoAdmissibleTarget(*rule_id));
            }
        }
        return Err(PanelError::InsufficientInventory {
            available: targets.len() as u64,
            requested: count as u64,
        });
    }
    Ok(targets)
}

/// 出口使用情况和按规则组拆分的激活账户数
pub async fn target_usage<C: ConnectionTrait>(db: &C, egress_id: i64) -> PanelResult<TargetUsage> {
    let target = EgressTarget::find_by_id(egress_id)
        .one(db)
        .await?
        .ok_or_else(|| PanelError::EgressNotFound(format!("#{}", egress_id)))?;

    let accounts = Account::find()
        .filter(account::Column::EgressId.eq(egress_id))
        .filter(active_condition(status::now()))
        .all(db)
        .await?;
    let account_ids: Vec<i64> = accounts.iter().map(|a| a.id).collect();

    let mut per_rule: BTreeMap<i64, u64> = BTreeMap::new();
    if !account_ids.is_empty() {
        let links = AccountRule::find()
            .filter(account_rule::Column::AccountId.is_in(account_ids))
            .all(db)
            .await?;
        for link in links {
            *per_rule.entry(link.rule_id).or_insert(0) += 1;
        }
    }

    let names: HashMap<i64, String> = if per_rule.is_empty() {
        HashMap::new()
    } else {
        RuleGroup::find()
            .filter(rule_group::Column::Id.is_in(per_rule.keys().copied()))
            .all(db)
            .await?
            .into_iter()
            .map(|r| (r.id, r.name))
            .collect()
    };

    let groups = per_rule
        .into_iter()
        .map(|(rule_id, account_count)| GroupUsage {
            rule_id,
            rule_name: names.get(&rule_id).cloned().unwrap_or_default(),
            account_count,
        })
        .collect();

    let active_accounts = accounts.len() as u64;
    Ok(TargetUsage {
        egress_id,
        name: target.name,
        max_users: target.max_users,
        active_accounts,
        available_slots: (target.max_users.max(0) as u64).saturating_sub(active_accounts),
        groups,
    })
}
