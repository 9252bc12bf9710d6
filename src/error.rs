//! 控制面错误类型
//!
//! 本地校验失败在任何引擎调用之前同步返回给调用方；
//! 引擎通信失败只有在连通性测试等显式路径上才会出现在这里。

use sea_orm::DbErr;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("端口 {0} 已被占用")]
    DuplicatePort(i32),

    #[error("无效的端口号: {0}")]
    InvalidPort(i32),

    #[error("账户 #{0} 不存在")]
    AccountNotFound(i64),

    #[error("端口 {0} 上没有账户")]
    AccountPortNotFound(i32),

    #[error("出口 {0} 不存在")]
    EgressNotFound(String),

    #[error("出口 {name} 仍被 {count} 个账户引用")]
    EgressInUse { name: String, count: u64 },

    #[error("规则 {0} 不存在")]
    RuleNotFound(String),

    #[error("{kind} 名称已存在: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("可用 IP 不足: 可用 {available}，需要 {requested}")]
    InsufficientInventory { available: u64, requested: u64 },

    #[error("规则 #{0} 没有可分配的出口")]
    NoAdmissibleTarget(i64),

    #[error("端口范围内没有空闲端口")]
    NoFreePort,

    #[error("账户 #{0} 引用的出口无法解析")]
    ReferenceMissing(i64),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("数据库错误: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type PanelResult<T> = Result<T, PanelError>;
