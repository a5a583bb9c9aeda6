use crate::common::Code;
use crate::market::entity::PriceRecord;
use crate::market::error::MarketError;
use async_trait::async_trait;

/// # Summary
/// 一批代码的获取结果，每个代码单独成功或失败。
pub type BatchResult = Vec<(Code, Result<PriceRecord, MarketError>)>;

/// # Summary
/// 实时行情数据源接口（原始数据源）。
///
/// # Invariants
/// - 单只证券的失败必须体现在 `BatchResult` 的对应条目中，而不是让整批返回 `Err`。
/// - 只有无法发出任何请求时（例如客户端不可用）才返回整批错误。
#[async_trait]
pub trait RealTimeSource: Send + Sync {
    /// 数据源标识，例如 `yahoo`。
    fn id(&self) -> &str;

    /// # Summary
    /// 获取一批代码的当前快照。
    ///
    /// # Logic
    /// 1. 为批内每个代码发起查询。
    /// 2. 将每个代码的结果独立记录。
    ///
    /// # Arguments
    /// * `codes`: 同一个桶内的代码。
    ///
    /// # Returns
    /// 成功返回逐代码结果，整批失败返回 `MarketError`。
    async fn fetch_batch(&self, codes: &[Code]) -> Result<BatchResult, MarketError>;
}

/// # Summary
/// 已加载的历史序列的只读访问接口。
///
/// # Invariants
/// - 构造完成后内容不再变化。
/// - `timestamp(i)` 对 `i < size()` 总能在 `stock` 中找到记录。
pub trait StockHistoryServer: Send + Sync {
    /// 按时间戳取记录。
    fn stock(&self, timestamp: i64) -> Option<&PriceRecord>;

    /// 按摄入顺序取第 `index` 个时间戳。
    fn timestamp(&self, index: usize) -> Option<i64>;

    /// 序列长度。
    fn size(&self) -> usize;

    /// 发行股数，数据源不提供时为 0。
    fn shares_issued(&self) -> i64 {
        0
    }

    /// 市值，数据源不提供时为 0。
    fn market_capital(&self) -> i64 {
        0
    }
}
