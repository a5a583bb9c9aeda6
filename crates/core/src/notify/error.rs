use thiserror::Error;

/// # Summary
/// 通知投递错误枚举。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum NotifyError {
    /// 网络连接或传输错误
    #[error("Network error: {0}")]
    Network(String),

    /// 配置错误 (如 Webhook 地址非法)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 接收端返回的错误 (如非 2xx 状态码)
    #[error("Platform error: {0}")]
    Platform(String),
}
