use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "egress_target")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// direct 为本机网卡直出，socks5/http/ss 为链式上游代理
    pub protocol: String,
    /// 形如 {"eh": "192.168.1.1", "proxyUrl": "socks5://user:pass@ip:port"}
    pub config: Json,
    #[serde(rename = "localIp")]
    pub local_ip: Option<String>,
    pub remark: Option<String>,
    #[serde(rename = "autoGenerated")]
    pub auto_generated: bool,
    /// 单个 IP 可同时服务的激活账户上限
    #[serde(rename = "maxUsers")]
    pub max_users: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::account::Entity")]
    Accounts,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 本地网卡地址，优先取配置中的 eh
    pub fn interface_ip(&self) -> String {
        self.config
            .get("eh")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| self.local_ip.clone())
            .unwrap_or_default()
    }

    /// 链式上游代理地址，直出时为空
    pub fn proxy_url(&self) -> String {
        self.config
            .get("proxyUrl")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}
