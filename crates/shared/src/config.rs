//! 配置管理模块
//!
//! 两层配置：
//! - `AppConfig`：进程级配置，支持多文件加载与环境变量覆盖
//! - `ClientOptions`：单个 Dispatcher / 消费循环的选项表（字符串键值），
//!   未被本层识别的键原样透传给 rdkafka 的 `ClientConfig`

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{EcommerceError, Result};

/// 选项键名
pub mod keys {
    pub const TYPE_DESCRIPTOR: &str = "type_descriptor";
    pub const GROUP_NAME: &str = "group_name";
    pub const POLL_TIMEOUT: &str = "poll_timeout";
    pub const RETRY_COUNT: &str = "retry_count";
    pub const RETRY_BACKOFF: &str = "retry_backoff";
    pub const RETRY_BACKOFF_MULTIPLIER: &str = "retry_backoff_multiplier";
    pub const RETRY_MAX_BACKOFF: &str = "retry_max_backoff";
    pub const MAX_POLL_RECORDS: &str = "max_poll_records";

    /// 本层自行解释的键，其余键透传给 Kafka 客户端
    pub const RESERVED: &[&str] = &[
        TYPE_DESCRIPTOR,
        GROUP_NAME,
        POLL_TIMEOUT,
        RETRY_COUNT,
        RETRY_BACKOFF,
        RETRY_BACKOFF_MULTIPLIER,
        RETRY_MAX_BACKOFF,
        MAX_POLL_RECORDS,
    ];
}

// ---------------------------------------------------------------------------
// ClientOptions
// ---------------------------------------------------------------------------

/// 客户端选项表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    entries: BTreeMap<String, String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式设置选项
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 读取必填项，缺失或为空时返回配置错误
    pub fn required(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(EcommerceError::Configuration(format!("缺少必填选项 `{key}`"))),
        }
    }

    /// 解析可选项，缺失时返回默认值
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| {
                EcommerceError::Configuration(format!("选项 `{key}` 的值 `{raw}` 无效: {e}"))
            }),
        }
    }

    /// 以毫秒为单位解析时长选项
    pub fn duration_ms_or(&self, key: &str, default: Duration) -> Result<Duration> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse_or(key, default_ms).map(Duration::from_millis)
    }

    /// 合并另一组选项，同名键以 `other` 为准
    pub fn merge(&mut self, other: &ClientOptions) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// 需要透传给 Kafka 客户端的选项
    pub fn passthrough(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(key, _)| !keys::RESERVED.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for ClientOptions
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (key, value) in iter {
            options.set(key, value);
        }
        options
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Kafka 连接配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub auto_offset_reset: String,
    /// 单条消息的投递超时，超时后发送句柄以失败结束
    pub message_timeout_ms: u64,
    /// 关闭 Dispatcher 时等待在途消息的上限
    pub flush_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            auto_offset_reset: "earliest".to_string(),
            message_timeout_ms: 5000,
            flush_timeout_ms: 5000,
        }
    }
}

impl KafkaConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// 消费循环默认参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub poll_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_max_backoff_ms: u64,
    pub max_poll_records: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            retry_count: 3,
            retry_backoff_ms: 1000,
            retry_backoff_multiplier: 2.0,
            retry_max_backoff_ms: 30_000,
            max_poll_records: 1,
        }
    }
}

impl ConsumerConfig {
    /// 转换为选项表，作为各消费循环选项的底层默认值
    pub fn to_options(&self) -> ClientOptions {
        ClientOptions::new()
            .with(keys::POLL_TIMEOUT, self.poll_timeout_ms)
            .with(keys::RETRY_COUNT, self.retry_count)
            .with(keys::RETRY_BACKOFF, self.retry_backoff_ms)
            .with(keys::RETRY_BACKOFF_MULTIPLIER, self.retry_backoff_multiplier)
            .with(keys::RETRY_MAX_BACKOFF, self.retry_max_backoff_ms)
            .with(keys::MAX_POLL_RECORDS, self.max_poll_records)
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 结构化日志，否则使用人类可读格式
    pub json_logs: bool,
    /// Prometheus 抓取端口，未配置时不导出指标
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub consumer: ConsumerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml
    /// 2. config/{environment}.toml
    /// 3. config/{service_name}.toml
    /// 4. 环境变量（ECOMMERCE_ 前缀，层级用双下划线，如
    ///    ECOMMERCE_CONSUMER__RETRY_COUNT -> consumer.retry_count）
    pub fn load(service_name: &str) -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("ECOMMERCE_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{service_name}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("ECOMMERCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
