use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 路由规则组（"游戏"）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rule_group")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// 引擎侧的规则内容，例如 "* = allow"
    pub content: String,
    /// 仅用于展示排序
    pub priority: i32,
    pub remark: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::account_rule::Entity")]
    AccountRules,
}

impl Related<super::account_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountRules.def()
    }
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        super::account_rule::Relation::Account.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::account_rule::Relation::RuleGroup.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
