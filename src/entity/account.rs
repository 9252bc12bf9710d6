use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::status::AccountStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "account")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// 交互式协议为用户名，ss 协议为加密方法
    pub username: String,
    pub password: String,
    pub port: i32,
    pub protocol: String,
    /// 总流量配额（字节），0 表示不限
    #[serde(rename = "totalTraffic")]
    pub total_traffic: i64,
    #[serde(rename = "upTraffic")]
    pub up_traffic: i64,
    #[serde(rename = "downTraffic")]
    pub down_traffic: i64,
    #[serde(rename = "expireTime")]
    pub expire_time: DateTimeUtc,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<DateTimeUtc>,
    pub enable: bool,
    pub status: AccountStatus,
    /// 上行带宽限制（KB/s），0 表示不限
    #[serde(rename = "sendLimit")]
    pub send_limit: i32,
    #[serde(rename = "receiveLimit")]
    pub receive_limit: i32,
    #[serde(rename = "maxConnCount")]
    pub max_conn_count: i32,
    #[serde(rename = "egressId")]
    pub egress_id: i64,
    pub remark: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::egress_target::Entity",
        from = "Column::EgressId",
        to = "super::egress_target::Column::Id"
    )]
    EgressTarget,
    #[sea_orm(has_many = "super::account_rule::Entity")]
    AccountRules,
}

impl Related<super::egress_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EgressTarget.def()
    }
}

impl Related<super::account_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountRules.def()
    }
}

impl Related<super::rule_group::Entity> for Entity {
    fn to() -> RelationDef {
        super::account_rule::Relation::RuleGroup.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::account_rule::Relation::Account.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
