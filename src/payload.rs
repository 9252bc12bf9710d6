//! 账户 → 引擎结构的映射

use sea_orm::{ConnectionTrait, EntityTrait, ModelTrait, QueryOrder};

use crate::engine::{EngineCredential, EnginePayload};
use crate::entity::{account, egress_target, rule_group, EgressTarget, RuleGroup};
use crate::error::{PanelError, PanelResult};

/// 账户不属于任何规则组时使用的匹配全部规则名
pub const MATCH_ALL_RULE: &str = "all";

/// 引擎侧过期时间格式
pub const DELETE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BIND_ALL: &str = "0.0.0.0";

/// 账户在引擎中的身份
pub fn listen_addr(port: i32) -> String {
    format!("{}:{}", BIND_ALL, port)
}

/// 从引擎监听地址中解析端口，兼容带协议前缀的形式
pub fn parse_port(listen_addr: &str) -> Option<i32> {
    let port: i32 = listen_addr.rsplit(':').next()?.trim().parse().ok()?;
    crate::port_range::is_valid_port(port).then_some(port)
}

/// 构建引擎账户结构，出口无法解析时返回 `ReferenceMissing`
pub fn build(
    account: &account::Model,
    egress: Option<&egress_target::Model>,
    rules: &[rule_group::Model],
) -> PanelResult<EnginePayload> {
    let egress = egress
        .filter(|e| e.id == account.egress_id)
        .ok_or(PanelError::ReferenceMissing(account.egress_id))?;

    let rule = if rules.is_empty() {
        vec![MATCH_ALL_RULE.to_string()]
    } else {
        rules.iter().map(|r| r.name.clone()).collect()
    };

    let conf = if account.protocol == "ss" {
        EngineCredential::Cipher {
            method: account.username.clone(),
            password: account.password.clone(),
        }
    } else {
        EngineCredential::Login {
            username: account.username.clone(),
            password: account.password.clone(),
        }
    };

    // 总配额同时作为收发上限，0 表示不限
    let ceiling = account.total_traffic.max(0);

    Ok(EnginePayload {
        enable: account.enable,
        listen_addr: listen_addr(account.port),
        protocol: account.protocol.clone(),
        delete_time: account.expire_time.format(DELETE_TIME_FORMAT).to_string(),
        max_send_byte: ceiling,
        max_receive_byte: ceiling,
        send_byte: account.up_traffic,
        receive_byte: account.down_traffic,
        max_conn_count: account.max_conn_count,
        send_limit: account.send_limit,
        receive_limit: account.receive_limit,
        rule,
        out: egress.name.clone(),
        conf,
        info: account.remark.clone().unwrap_or_default(),
    })
}

/// 从存储中读取出口和规则组后构建
pub async fn build_for<C: ConnectionTrait>(
    db: &C,
    account: &account::Model,
) -> PanelResult<EnginePayload> {
    let egress = EgressTarget::find_by_id(account.egress_id).one(db).await?;
    let rules = account
        .find_related(RuleGroup)
        .order_by_desc(rule_group::Column::Priority)
        .order_by_asc(rule_group::Column::Id)
        .all(db)
        .await?;

    build(account, egress.as_ref(), &rules)
}
