//! 执行引擎接口和线路类型
//!
//! 执行引擎是实际转发流量的外部服务，控制面只通过这里定义的请求/响应契约访问它。
//! 列表接口是按监听地址探测账户是否存在的唯一方式。

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;

pub use client::EngineClient;

/// 引擎通信失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("无法连接执行引擎: {0}")]
    Connect(String),

    #[error("执行引擎请求超时: {0}")]
    Timeout(String),

    #[error("执行引擎返回错误 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("执行引擎响应无法解析: {0}")]
    Malformed(String),
}

impl EngineError {
    /// 目标在引擎中不存在
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::Status { status, body } => {
                *status == 404
                    || body.to_ascii_lowercase().contains("not found")
                    || body.contains("不存在")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else if err.is_connect() {
            EngineError::Connect(err.to_string())
        } else if err.is_decode() {
            EngineError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            EngineError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            EngineError::Connect(err.to_string())
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// 账户凭据，形状取决于协议
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineCredential {
    /// socks5 / http
    Login { username: String, password: String },
    /// ss，加密方法存放在账户的用户名字段
    Cipher { method: String, password: String },
}

/// 推送给引擎的账户结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnginePayload {
    pub enable: bool,
    pub listen_addr: String,
    pub protocol: String,
    pub delete_time: String,
    pub max_send_byte: i64,
    pub max_receive_byte: i64,
    pub send_byte: i64,
    pub receive_byte: i64,
    pub max_conn_count: i32,
    pub send_limit: i32,
    pub receive_limit: i32,
    pub rule: Vec<String>,
    pub out: String,
    pub conf: EngineCredential,
    pub info: String,
}

/// 引擎列表中的账户条目，只解析控制面关心的字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineAccountEntry {
    pub listen_addr: String,
    pub send_byte: i64,
    pub receive_byte: i64,
}

/// 出口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutbound {
    pub name: String,
    pub eh: String,
    #[serde(default)]
    pub proxy_url: String,
}

/// 流量规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRule {
    pub name: String,
    pub data: String,
}

/// 本机网卡
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineInterface {
    pub eh_name: String,
    pub eh: String,
    pub ip: String,
}

/// 执行引擎控制接口
///
/// 生产环境由 `EngineClient` 通过 HTTP 实现，测试中由内存假实现替代。
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// 获取引擎中的全部账户
    async fn list_accounts(&self) -> EngineResult<Vec<EngineAccountEntry>>;

    /// 创建账户，监听地址已存在时引擎会返回错误
    async fn create_account(&self, payload: &EnginePayload) -> EngineResult<()>;

    /// 按监听地址编辑账户
    async fn edit_account(&self, listen_addr: &str, payload: &EnginePayload) -> EngineResult<()>;

    /// 按监听地址删除账户
    async fn delete_account(&self, listen_addr: &str) -> EngineResult<()>;

    /// 获取全部出口，按名称探测是否存在
    async fn list_outbounds(&self) -> EngineResult<Vec<EngineOutbound>>;

    async fn create_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()>;

    async fn edit_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()>;

    async fn delete_outbound(&self, name: &str) -> EngineResult<()>;

    /// 获取全部流量规则
    async fn list_rules(&self) -> EngineResult<Vec<EngineRule>>;

    async fn add_rule(&self, rule: &EngineRule) -> EngineResult<()>;

    async fn edit_rule(&self, rule: &EngineRule) -> EngineResult<()>;

    async fn delete_rule(&self, name: &str) -> EngineResult<()>;

    /// 获取本机网卡列表
    async fn list_interfaces(&self) -> EngineResult<Vec<EngineInterface>>;

    /// 获取实时系统信息（CPU、内存、网络）
    async fn system_info(&self) -> EngineResult<serde_json::Value>;

    /// 重启服务，`GreenServer` 表示只重启代理服务
    async fn restart(&self, operation: &str) -> EngineResult<serde_json::Value>;
}

/// 连通性测试结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProbe {
    pub latency_ms: u64,
    pub interfaces: Vec<EngineInterface>,
}

/// 连通性测试，唯一把引擎错误原样返回给调用方的路径
pub async fn probe(engine: &dyn ExecutionEngine) -> EngineResult<EngineProbe> {
    let started = Instant::now();
    let interfaces = engine.list_interfaces().await?;
    Ok(EngineProbe {
        latency_ms: started.elapsed().as_millis() as u64,
        interfaces,
    })
}
