use thiserror::Error;

/// # Summary
/// 存储层错误枚举，处理数据库连接、查询失败以及单行数据损坏等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum StoreError {
    /// 无法建立数据库连接
    #[error("Connection error: {0}")]
    Connection(String),
    /// 数据库操作失败
    #[error("Database error: {0}")]
    Database(String),
    /// 单行数值字段无法解析，仅影响该行
    #[error("Malformed row: {0}")]
    MalformedRow(String),
}
