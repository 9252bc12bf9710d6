//! 规则组管理

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{EngineResult, EngineRule};
use crate::entity::{account_rule, rule_group, AccountRule, RuleGroup};
use crate::error::{PanelError, PanelResult};
use crate::reconciler::Reconciler;
use crate::status;

const KIND: &str = "规则";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub priority: i32,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub content: Option<String>,
    pub priority: Option<i32>,
    pub remark: Option<String>,
}

fn rule_of(model: &rule_group::Model) -> EngineRule {
    EngineRule {
        name: model.name.clone(),
        data: model.content.clone(),
    }
}

pub struct RuleService {
    db: DatabaseConnection,
    reconciler: Arc<Reconciler>,
}

impl RuleService {
    pub fn new(db: DatabaseConnection, reconciler: Arc<Reconciler>) -> Self {
        Self { db, reconciler }
    }

    /// 按优先级降序列出
    pub async fn list(&self) -> PanelResult<Vec<rule_group::Model>> {
        Ok(RuleGroup::find()
            .order_by_desc(rule_group::Column::Priority)
            .order_by_asc(rule_group::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn get(&self, id: i64) -> PanelResult<rule_group::Model> {
        RuleGroup::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| PanelError::RuleNotFound(format!("#{}", id)))
    }

    async fn ensure_unique_name(&self, name: &str, except: Option<i64>) -> PanelResult<()> {
        let existing = RuleGroup::find()
            .filter(rule_group::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        match existing {
            Some(other) if Some(other.id) != except => Err(PanelError::DuplicateName {
                kind: KIND,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub async fn create(&self, req: CreateRuleRequest) -> PanelResult<rule_group::Model> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(PanelError::InvalidRequest("规则名称不能为空".to_string()));
        }
        self.ensure_unique_name(&name, None).await?;

        let now = status::now();
        let model = rule_group::ActiveModel {
            name: Set(name),
            content: Set(req.content),
            priority: Set(req.priority),
            remark: Set(req.remark),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        if let Err(e) = self.reconciler.engine().add_rule(&rule_of(&model)).await {
            warn!("规则 {} 同步到引擎失败: {}", model.name, e);
        }

        info!("✅ 创建规则 {}", model.name);
        Ok(model)
    }

    /// 修改规则；改名时重新同步关联账户
    pub async fn update(&self, id: i64, req: UpdateRuleRequest) -> PanelResult<rule_group::Model> {
        let existing = self.get(id).await?;
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(PanelError::InvalidRequest("规则名称不能为空".to_string()));
            }
            self.ensure_unique_name(name.trim(), Some(id)).await?;
        }

        let old = rule_of(&existing);
        let mut active: rule_group::ActiveModel = existing.into();
        if let Some(name) = req.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(content) = req.content {
            active.content = Set(content);
        }
        if let Some(priority) = req.priority {
            active.priority = Set(priority);
        }
        if req.remark.is_some() {
            active.remark = Set(req.remark);
        }
        active.updated_at = Set(status::now());
        let model = active.update(&self.db).await?;

        let rule = rule_of(&model);
        if rule != old {
            self.sync_rule(&old.name, &rule).await;
        }
        // 优先级影响账户规则列表的顺序
        self.resync_accounts(&self.linked_accounts(id).await?).await;

        Ok(model)
    }

    async fn sync_rule(&self, old_name: &str, rule: &EngineRule) {
        if let Err(e) = self.upsert_rule(old_name, rule).await {
            warn!("规则 {} 同步到引擎失败: {}", rule.name, e);
        }
    }

    /// 改名时先删除旧规则，再按名称探测后编辑或添加
    async fn upsert_rule(&self, old_name: &str, rule: &EngineRule) -> EngineResult<()> {
        let engine = self.reconciler.engine();
        if old_name != rule.name {
            match engine.delete_rule(old_name).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }

        let existing = engine.list_rules().await?;
        if existing.iter().any(|r| r.name == rule.name) {
            engine.edit_rule(rule).await
        } else {
            engine.add_rule(rule).await
        }
    }

    async fn linked_accounts(&self, rule_id: i64) -> PanelResult<Vec<i64>> {
        Ok(AccountRule::find()
            .filter(account_rule::Column::RuleId.eq(rule_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|link| link.account_id)
            .collect())
    }

    async fn resync_accounts(&self, account_ids: &[i64]) {
        for id in account_ids {
            self.reconciler.apply(*id).await;
        }
    }

    /// 删除规则，关联账户的规则列表随之更新
    pub async fn delete(&self, id: i64) -> PanelResult<()> {
        let existing = self.get(id).await?;
        let affected = self.linked_accounts(id).await?;

        let txn = self.db.begin().await?;
        AccountRule::delete_many()
            .filter(account_rule::Column::RuleId.eq(id))
            .exec(&txn)
            .await?;
        RuleGroup::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        match self.reconciler.engine().delete_rule(&existing.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("引擎中不存在规则 {}", existing.name),
            Err(e) => warn!("从引擎删除规则 {} 失败: {}", existing.name, e),
        }

        self.resync_accounts(&affected).await;
        info!("🗑️ 删除规则 {}", existing.name);
        Ok(())
    }
}
