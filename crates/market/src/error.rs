use thiserror::Error;
use tickwatch_core::config::ConfigError;
use tickwatch_core::market::error::MarketError;

/// # Summary
/// 实时监控器的生命周期错误。
#[derive(Error, Debug)]
pub enum MonitorError {
    // 监控配置非法
    #[error("Invalid monitor config: {0}")]
    Config(#[from] ConfigError),
    // 调度器已经在运行
    #[error("Monitor is already running")]
    AlreadyRunning,
    // 上一次 stop 尚未完成
    #[error("Monitor is shutting down")]
    ShuttingDown,
    // 当前线程不在 tokio 运行时中
    #[error("No tokio runtime available")]
    NoRuntime,
    // 数据源标识未注册
    #[error("Unknown realtime source: {0}")]
    UnknownSource(String),
    // 数据源构造失败
    #[error("Realtime source unavailable: {0}")]
    Source(#[from] MarketError),
}
