//! 控制面配置模块
//!
//! 配置在启动时加载一次，通过 `AppState` 以 `Arc<Config>` 传递给各组件。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

mod credentials;

pub use credentials::{generate_from_pattern, SS_CIPHERS};

/// 控制面配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Web 管理接口端口
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub defaults: ProvisionDefaults,
}

/// 执行引擎连接配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// 以 `Auth` 请求头发送
    #[serde(default)]
    pub api_key: String,

    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// 周期任务配置，间隔为 0 表示只允许手动触发
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SweepConfig {
    #[serde(default = "default_expiration_interval")]
    pub expiration_interval_secs: u64,

    #[serde(default = "default_traffic_interval")]
    pub traffic_interval_secs: u64,
}

/// 新账户默认值
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvisionDefaults {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_expiration_days")]
    pub expiration_days: i64,

    /// 字节，0 表示不限
    #[serde(default)]
    pub max_send_byte: i64,

    #[serde(default)]
    pub max_receive_byte: i64,

    /// KB/s，0 表示不限
    #[serde(default)]
    pub send_limit: i32,

    #[serde(default)]
    pub receive_limit: i32,

    #[serde(default)]
    pub max_conn_count: i32,

    /// L/l 小写字母，U 大写字母，# 数字，其余字符原样保留
    #[serde(default = "default_pattern")]
    pub username_pattern: String,

    #[serde(default = "default_pattern")]
    pub password_pattern: String,

    /// 自动分配端口的范围，格式同 "10000-20000,30000"
    #[serde(default = "default_port_range")]
    pub port_range: String,

    /// 续期时是否重新启用被禁用的账户
    #[serde(default = "default_renew_reenables")]
    pub renew_reenables: bool,
}

fn default_web_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "./data/panel.db".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_expiration_interval() -> u64 {
    60
}

fn default_traffic_interval() -> u64 {
    300
}

fn default_protocol() -> String {
    "socks5".to_string()
}

fn default_expiration_days() -> i64 {
    30
}

fn default_pattern() -> String {
    "LLL###".to_string()
}

fn default_port_range() -> String {
    "10000-60000".to_string()
}

fn default_renew_reenables() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            db_path: default_db_path(),
            engine: EngineConfig::default(),
            sweep: SweepConfig::default(),
            defaults: ProvisionDefaults::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiration_interval_secs: default_expiration_interval(),
            traffic_interval_secs: default_traffic_interval(),
        }
    }
}

impl Default for ProvisionDefaults {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            expiration_days: default_expiration_days(),
            max_send_byte: 0,
            max_receive_byte: 0,
            send_limit: 0,
            receive_limit: 0,
            max_conn_count: 0,
            username_pattern: default_pattern(),
            password_pattern: default_pattern(),
            port_range: default_port_range(),
            renew_reenables: default_renew_reenables(),
        }
    }
}

impl ProvisionDefaults {
    /// 新账户的流量配额，取收发上限中较大的一个
    pub fn total_traffic(&self) -> i64 {
        self.max_send_byte.max(self.max_receive_byte).max(0)
    }

    /// 按协议生成 (用户名, 密码)；ss 协议的用户名位置是加密方法
    pub fn generate_credentials(&self, protocol: &str) -> (String, String) {
        let username = if protocol == "ss" {
            credentials::random_cipher().to_string()
        } else {
            generate_from_pattern(&self.username_pattern)
        };
        (username, generate_from_pattern(&self.password_pattern))
    }
}

impl Config {
    /// 加载配置：显式路径优先，其次 panel.toml / ../panel.toml，都没有时使用默认值
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let config_paths = ["panel.toml", "../panel.toml"];
                let found = config_paths
                    .iter()
                    .map(Path::new)
                    .find(|path| path.exists());

                match found {
                    Some(path) => Self::from_file(path)?,
                    None => {
                        tracing::warn!("未找到配置文件，使用默认配置");
                        Config::default()
                    }
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        crate::port_range::parse_port_ranges(&config.defaults.port_range)
            .with_context(|| format!("端口范围配置无效: {}", config.defaults.port_range))?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;

        tracing::info!("📋 加载配置文件: {}", path.display());
        Ok(config)
    }

    /// 环境变量覆盖引擎连接配置
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CORE_API_URL").filter(|v| !v.is_empty()) {
            self.engine.api_url = url;
        }
        if let Some(key) = lookup("CORE_API_KEY").filter(|v| !v.is_empty()) {
            self.engine.api_key = key;
        }
        if let Some(timeout) = lookup("CORE_API_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(secs) => self.engine.timeout_secs = secs,
                Err(_) => tracing::warn!("忽略无效的 CORE_API_TIMEOUT: {}", timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.web_port, 8000);
        assert_eq!(config.engine.timeout_secs, 10);
        assert_eq!(config.defaults.protocol, "socks5");
        assert_eq!(config.defaults.expiration_days, 30);
        assert!(config.defaults.renew_reenables);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            web_port = 9000

            [engine]
            api_url = "http://10.0.0.2:8080"
            api_key = "k"

            [sweep]
            traffic_interval_secs = 0

            [defaults]
            protocol = "ss"
            renew_reenables = false
            "#,
        )
        .unwrap();

        assert_eq!(config.web_port, 9000);
        assert_eq!(config.db_path, "./data/panel.db");
        assert_eq!(config.engine.api_url, "http://10.0.0.2:8080");
        assert_eq!(config.engine.timeout_secs, 10);
        assert_eq!(config.sweep.expiration_interval_secs, 60);
        assert_eq!(config.sweep.traffic_interval_secs, 0);
        assert_eq!(config.defaults.protocol, "ss");
        assert_eq!(config.defaults.username_pattern, "LLL###");
        assert!(!config.defaults.renew_reenables);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CORE_API_URL", "http://engine:9090"),
            ("CORE_API_KEY", ""),
            ("CORE_API_TIMEOUT", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.engine.api_key = "from-file".to_string();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.api_url, "http://engine:9090");
        assert_eq!(config.engine.api_key, "from-file");
        assert_eq!(config.engine.timeout_secs, 3);
    }

    #[test]
    fn test_invalid_timeout_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == "CORE_API_TIMEOUT").then(|| "soon".to_string()));
        assert_eq!(config.engine.timeout_secs, 10);
    }

    #[test]
    fn test_generate_credentials_by_protocol() {
        let defaults = ProvisionDefaults::default();

        let (username, password) = defaults.generate_credentials("socks5");
        assert_eq!(username.len(), 6);
        assert_eq!(password.len(), 6);

        let (method, _) = defaults.generate_credentials("ss");
        assert!(SS_CIPHERS.contains(&method.as_str()));
    }

    #[test]
    fn test_total_traffic_from_defaults() {
        let mut defaults = ProvisionDefaults::default();
        assert_eq!(defaults.total_traffic(), 0);

        defaults.max_receive_byte = 1024;
        assert_eq!(defaults.total_traffic(), 1024);
    }
}
