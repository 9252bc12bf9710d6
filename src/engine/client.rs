//! 执行引擎 HTTP 客户端
//!
//! 所有请求携带 `Auth` 头，响应形如 `{"data": ...}`。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{
    EngineAccountEntry, EngineError, EngineInterface, EngineOutbound, EnginePayload, EngineResult,
    EngineRule, ExecutionEngine,
};
use crate::config::EngineConfig;

/// 基于 reqwest 的引擎客户端
pub struct EngineClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// 发送请求，非 2xx 状态转换为 `EngineError::Status`
    async fn send(&self, request: RequestBuilder) -> EngineResult<Value> {
        let resp = request.header("Auth", &self.api_key).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| EngineError::Malformed(e.to_string()))
    }
}

/// 取出响应中的 data 数组，跳过无法解析的条目
fn data_list<T: DeserializeOwned>(body: Value) -> EngineResult<Vec<T>> {
    let data = match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };

    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("跳过无法解析的引擎条目: {}", e);
                    None
                }
            })
            .collect()),
        other => Err(EngineError::Malformed(format!("期望数组，实际为: {}", other))),
    }
}

fn data_value(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl ExecutionEngine for EngineClient {
    async fn list_accounts(&self) -> EngineResult<Vec<EngineAccountEntry>> {
        let body = self.send(self.get("/api/user/getUserAll")).await?;
        data_list(body)
    }

    async fn create_account(&self, payload: &EnginePayload) -> EngineResult<()> {
        debug!("引擎创建账户: {}", payload.listen_addr);
        self.send(self.post("/api/user/createUser").json(payload))
            .await?;
        Ok(())
    }

    async fn edit_account(&self, listen_addr: &str, payload: &EnginePayload) -> EngineResult<()> {
        debug!("引擎编辑账户: {}", listen_addr);
        self.send(
            self.post("/api/user/editUser")
                .query(&[("lAddr", listen_addr)])
                .json(payload),
        )
        .await?;
        Ok(())
    }

    async fn delete_account(&self, listen_addr: &str) -> EngineResult<()> {
        debug!("引擎删除账户: {}", listen_addr);
        self.send(
            self.get("/api/user/deleteUser")
                .query(&[("lAddr", listen_addr)]),
        )
        .await?;
        Ok(())
    }

    async fn list_outbounds(&self) -> EngineResult<Vec<EngineOutbound>> {
        let body = self.send(self.get("/api/out/getOutBoundsAll")).await?;
        data_list(body)
    }

    async fn create_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()> {
        self.send(self.post("/api/out/createOutBound").json(outbound))
            .await?;
        Ok(())
    }

    async fn edit_outbound(&self, outbound: &EngineOutbound) -> EngineResult<()> {
        self.send(self.post("/api/out/editOutBound").json(outbound))
            .await?;
        Ok(())
    }

    async fn delete_outbound(&self, name: &str) -> EngineResult<()> {
        self.send(self.get("/api/out/deleteOutBound").query(&[("name", name)]))
            .await?;
        Ok(())
    }

    async fn list_rules(&self) -> EngineResult<Vec<EngineRule>> {
        let body = self.send(self.get("/api/rule/getRuleAll")).await?;
        data_list(body)
    }

    async fn add_rule(&self, rule: &EngineRule) -> EngineResult<()> {
        self.send(self.post("/api/rule/addRule").json(rule)).await?;
        Ok(())
    }

    async fn edit_rule(&self, rule: &EngineRule) -> EngineResult<()> {
        self.send(self.post("/api/rule/editRule").json(rule)).await?;
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> EngineResult<()> {
        self.send(self.get("/api/rule/delRule").query(&[("name", name)]))
            .await?;
        Ok(())
    }

    async fn list_interfaces(&self) -> EngineResult<Vec<EngineInterface>> {
        let body = self.send(self.get("/api/system/getInterFaces")).await?;
        data_list(body)
    }

    async fn system_info(&self) -> EngineResult<Value> {
        let body = self.send(self.get("/api/system/current/all/all")).await?;
        Ok(data_value(body))
    }

    async fn restart(&self, operation: &str) -> EngineResult<Value> {
        let body = self
            .send(self.post(&format!("/api/system/restart/{}", operation)))
            .await?;
        Ok(data_value(body))
    }
}
