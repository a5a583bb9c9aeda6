use crate::common::period::Period;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 配置校验错误
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Unknown timezone: {0}")]
    Timezone(String),
}

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub history: HistoryConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
    // 启动时注册的股票代码
    pub codes: Vec<String>,
    // 启动时注册的指数
    pub indices: Vec<IndexConfig>,
}

/// # Summary
/// 实时轮询调度器配置。
///
/// # Invariants
/// - `max_thread >= 1`，`max_bucket_size >= 1`，由 `validate` 保证。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub name: String,
    // 同时执行的桶任务上限
    pub max_thread: usize,
    // 单桶代码数上限
    pub max_bucket_size: usize,
    // tick 间隔 (毫秒)，从上一个 tick 开始时计算
    pub delay_ms: u64,
    // 单个桶任务的超时 (毫秒)
    pub fetch_timeout_ms: u64,
    // 实时数据源标识，在 SourceRegistry 中解析
    pub source: String,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_thread == 0 {
            return Err(ConfigError::Invalid {
                field: "max_thread",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_bucket_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_bucket_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: "RealTimeStockMonitor".to_string(),
            max_thread: 4,
            max_bucket_size: 20,
            delay_ms: 10_000,
            fetch_timeout_ms: 8_000,
            source: "yahoo".to_string(),
        }
    }
}

/// 历史数据加载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    // SQLite 文件路径，缺省时使用存储层的默认根目录
    pub db_path: Option<String>,
    // 行源日期所在时区
    pub source_timezone: String,
    // 调用方时区
    pub local_timezone: String,
    // 按周期加载时起点的回退天数
    pub tolerance_days: i64,
    pub default_period: Period,
}

impl HistoryConfig {
    pub fn source_tz(&self) -> Result<Tz, ConfigError> {
        parse_tz(&self.source_timezone)
    }

    pub fn local_tz(&self) -> Result<Tz, ConfigError> {
        parse_tz(&self.local_timezone)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            source_timezone: "America/New_York".to_string(),
            local_timezone: "UTC".to_string(),
            tolerance_days: 7,
            default_period: Period::Years5,
        }
    }
}

fn parse_tz(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::Timezone(name.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    // 日志文件目录，缺省时只输出到标准输出
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub code: String,
    pub name: String,
}
