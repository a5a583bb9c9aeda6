use crate::common::Code;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单个证券在某一时刻的价格快照（历史日线或实时报价共用）。
///
/// # Invariants
/// - `change` 与 `change_percentage` 相对于同一代码的前一条记录计算；序列首条记录两者均为 0。
/// - `depth` 中的盘口字段本系统不填充，保持为 0。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    // 证券代码
    pub code: Code,
    // 展示名称
    pub name: String,
    // Unix 毫秒时间戳
    pub timestamp: i64,
    // 前收盘价
    pub previous_close: f64,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价 / 最新价
    pub close: f64,
    // 成交量
    pub volume: i64,
    // 涨跌额
    pub change: f64,
    // 涨跌幅 (百分比)
    pub change_percentage: f64,
    // 盘口衍生指标
    pub depth: MarketDepth,
}

/// 盘口占位字段，数据源不提供时全部为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub last_volume: i64,
    pub buy_price: f64,
    pub buy_quantity: i64,
    pub sell_price: f64,
    pub sell_quantity: i64,
}

/// # Summary
/// 历史行源返回的一条原始日线。
///
/// # Invariants
/// - `date` 为 `YYYYMMDD` 形式的整数，例如 `20240131`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    pub date: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// # Summary
/// 指数实体，`code` 是其在行情源中的代码。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub code: Code,
}

/// # Summary
/// 调度器每个 tick 汇总后发布的更新。
///
/// # Invariants
/// - `records` 按注册表分桶顺序排列，同一代码至多出现一次。
/// - `failed` 中的代码若曾成功获取过，`records` 中保留的是其上一次的已知快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorUpdate {
    // 发布者名称
    pub source: String,
    // tick 序号，从 1 开始单调递增
    pub tick: u64,
    // 本 tick 的快照列表
    pub records: Vec<PriceRecord>,
    // 本 tick 获取失败的代码
    pub failed: Vec<Code>,
    // 发布时间
    pub published_at: DateTime<Utc>,
}

/// 指数监控发布的记录，附带其所属指数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuote {
    pub index: Index,
    pub record: PriceRecord,
}

/// 指数监控器的 tick 更新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexUpdate {
    pub source: String,
    pub tick: u64,
    pub quotes: Vec<IndexQuote>,
    // 本 tick 获取失败且仍在映射中的指数
    pub failed: Vec<Index>,
    pub published_at: DateTime<Utc>,
}
