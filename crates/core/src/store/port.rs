use super::error::StoreError;
use crate::common::Code;
use crate::market::entity::DailyRow;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// # Summary
/// 日线行流别名。单项错误 (`StoreError::MalformedRow`) 不会终止流。
pub type DailyRowStream = Pin<Box<dyn Stream<Item = Result<DailyRow, StoreError>> + Send>>;

/// # Summary
/// 历史日线行源接口，负责按代码读取原始日线。
///
/// # Invariants
/// - 行按日期非递减顺序产出；调用方依赖该顺序但不校验。
#[async_trait]
pub trait DailyRowStore: Send + Sync {
    /// # Summary
    /// 查询代码对应的证券名称。
    ///
    /// # Arguments
    /// * `code`: 证券代码。
    ///
    /// # Returns
    /// 有记录返回 `Some(name)`，无记录返回 `None`。
    async fn display_name(&self, code: &Code) -> Result<Option<String>, StoreError>;

    /// # Summary
    /// 以流的形式读取代码的全部日线。
    ///
    /// # Logic
    /// 1. 建立连接，失败返回 `StoreError::Connection`。
    /// 2. 发起查询并逐行产出；损坏的行产出 `StoreError::MalformedRow`。
    ///
    /// # Arguments
    /// * `code`: 证券代码。
    ///
    /// # Returns
    /// 日线流或 `StoreError`。
    async fn daily_rows(&self, code: &Code) -> Result<DailyRowStream, StoreError>;
}
