use chrono::{NaiveDate, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tickwatch_core::common::Code;
use tickwatch_core::common::period::{Duration, Period, resolve};
use tickwatch_core::common::time::TimeProvider;
use tickwatch_core::market::entity::{DailyRow, MarketDepth, PriceRecord};
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::StockHistoryServer;
use tickwatch_core::store::error::StoreError;
use tickwatch_core::store::port::DailyRowStore;
use tracing::{debug, error, warn};

/// 按周期加载时起点的默认回退天数：今天是第 N 天，但行源最新数据可能只到 N - 7 天。
pub const DEFAULT_TOLERANCE_DAYS: i64 = 7;

/// 未指定周期时的默认历史跨度。
pub const DEFAULT_HISTORY_PERIOD: Period = Period::Years5;

/// # Summary
/// 单只证券的日线历史序列。
///
/// # Invariants
/// - `timestamps` 保持摄入顺序，其中每个时间戳都能在 `records` 中找到。
/// - `size()` 等于 `timestamps` 的长度。
/// - 构造完成后只读。
#[derive(Debug, Clone)]
pub struct DailyHistory {
    code: Code,
    duration: Duration,
    records: HashMap<i64, PriceRecord>,
    timestamps: Vec<i64>,
}

impl DailyHistory {
    pub fn code(&self) -> &Code {
        &self.code
    }

    /// 实际用于加载的区间（按周期加载时包含回退容差）。
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// 按摄入顺序遍历记录。
    pub fn iter(&self) -> impl Iterator<Item = &PriceRecord> {
        self.timestamps.iter().filter_map(|ts| self.records.get(ts))
    }

    /// # Summary
    /// 丢弃早于 `start_timestamp` 的前导记录。
    ///
    /// # Logic
    /// 1. 从序列头部开始，遇到第一条不早于下界的记录即停止。
    /// 2. 被丢弃的时间戳若不再出现在剩余序列中，同时从映射中移除。
    fn trim_leading(&mut self, start_timestamp: i64) {
        let cut = self
            .timestamps
            .iter()
            .take_while(|&&ts| ts < start_timestamp)
            .count();
        let dropped: Vec<i64> = self.timestamps.drain(..cut).collect();
        for ts in dropped {
            if !self.timestamps.contains(&ts) {
                self.records.remove(&ts);
            }
        }
    }
}

impl StockHistoryServer for DailyHistory {
    fn stock(&self, timestamp: i64) -> Option<&PriceRecord> {
        self.records.get(&timestamp)
    }

    fn timestamp(&self, index: usize) -> Option<i64> {
        self.timestamps.get(index).copied()
    }

    fn size(&self) -> usize {
        self.timestamps.len()
    }
}

/// # Summary
/// 日线历史加载器：从行源读取原始日线，换算时区、过滤区间并补全涨跌字段。
///
/// # Invariants
/// - 行源声明的时区 (`source_tz`) 与调用方时区 (`local_tz`) 在构造时确定。
/// - 加载器本身无状态，可被多个任务共享。
pub struct HistoryLoader {
    store: Arc<dyn DailyRowStore>,
    clock: Arc<dyn TimeProvider>,
    source_tz: Tz,
    local_tz: Tz,
    tolerance_days: i64,
}

impl HistoryLoader {
    pub fn new(
        store: Arc<dyn DailyRowStore>,
        clock: Arc<dyn TimeProvider>,
        source_tz: Tz,
        local_tz: Tz,
    ) -> Self {
        Self {
            store,
            clock,
            source_tz,
            local_tz,
            tolerance_days: DEFAULT_TOLERANCE_DAYS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_days: i64) -> Self {
        self.tolerance_days = tolerance_days;
        self
    }

    /// # Summary
    /// 加载 `[duration.start, duration.end)` 内的日线。
    ///
    /// # Logic
    /// 1. 查询展示名称，失败或缺失时退化为代码本身。
    /// 2. 以流的方式读取原始行；连接失败只记录日志。
    /// 3. 每行：拆解 `YYYYMMDD`，在行源时区取零点，再平移到调用方时区。
    /// 4. 早于起点的行跳过；首个不早于终点的行结束读取（依赖行源按日期升序）。
    /// 5. 以上一条入选记录的收盘价计算前收与涨跌，首条记录涨跌为 0。
    /// 6. 损坏行跳过；查询中途失败则停止读取。
    /// 7. 没有任何入选记录时返回 `MarketError::HistoryNotFound`。
    ///
    /// # Arguments
    /// * `code`: 证券代码。
    /// * `duration`: 绝对日期区间。
    ///
    /// # Returns
    /// 成功返回历史序列。
    pub async fn load(&self, code: &Code, duration: Duration) -> Result<DailyHistory, MarketError> {
        let mut history = DailyHistory {
            code: code.clone(),
            duration,
            records: HashMap::new(),
            timestamps: Vec::new(),
        };

        let name = match self.store.display_name(code).await {
            Ok(Some(name)) => format!("{} ({})", name, code),
            Ok(None) => code.to_string(),
            Err(e) => {
                error!("Name lookup for {} failed: {}", code, e);
                code.to_string()
            }
        };

        let start = duration.start_timestamp(self.local_tz);
        let end = duration.end_timestamp(self.local_tz);

        match self.store.daily_rows(code).await {
            Ok(mut rows) => {
                let mut previous_close: Option<f64> = None;
                while let Some(item) = rows.next().await {
                    let row = match item {
                        Ok(row) => row,
                        Err(StoreError::MalformedRow(reason)) => {
                            warn!("Skipping malformed row for {}: {}", code, reason);
                            continue;
                        }
                        Err(e) => {
                            error!("History query for {} aborted: {}", code, e);
                            break;
                        }
                    };

                    let Some(timestamp) = local_timestamp(row.date, self.source_tz, self.local_tz)
                    else {
                        warn!("Skipping row for {} with invalid date {}", code, row.date);
                        continue;
                    };
                    if timestamp < start {
                        continue;
                    }
                    if timestamp >= end {
                        break;
                    }

                    let record = to_record(code, &name, timestamp, &row, previous_close);
                    history.records.insert(timestamp, record);
                    history.timestamps.push(timestamp);
                    previous_close = Some(row.close);
                }
            }
            Err(e) => error!("Could not open history for {}: {}", code, e),
        }

        if history.timestamps.is_empty() {
            return Err(MarketError::HistoryNotFound(code.to_string()));
        }
        debug!("Loaded {} daily records for {}", history.size(), code);
        Ok(history)
    }

    /// # Summary
    /// 按相对周期加载。
    ///
    /// # Logic
    /// 1. 以带回退容差的区间加载，保证取到足够的原始行。
    /// 2. 以首尾记录中较新的时间戳为终点，按周期规则（不含容差）重新计算下界。
    /// 3. 丢弃早于该下界的前导记录。
    ///
    /// # Arguments
    /// * `code`: 证券代码。
    /// * `period`: 相对周期。
    ///
    /// # Returns
    /// 成功返回裁剪后的历史序列。
    pub async fn load_period(&self, code: &Code, period: Period) -> Result<DailyHistory, MarketError> {
        let duration = resolve(period, self.tolerance_days, self.clock.as_ref(), self.local_tz)?;
        let mut history = self.load(code, duration).await?;

        let first = history.timestamp(0);
        let last = history.timestamps.last().copied();
        if let (Some(first), Some(last)) = (first, last) {
            let start = period.start_timestamp(first.max(last), self.local_tz);
            history.trim_leading(start);
        }
        Ok(history)
    }

    /// 以默认周期 (5 年) 加载。
    pub async fn load_default(&self, code: &Code) -> Result<DailyHistory, MarketError> {
        self.load_period(code, DEFAULT_HISTORY_PERIOD).await
    }
}

/// # Summary
/// 将 `YYYYMMDD` 日期换算为调用方时区下的毫秒时间戳。
///
/// # Logic
/// 1. 拆出年、月、日，非法日期返回 None。
/// 2. 构造行源时区的当日零点。
/// 3. 加上两地在该时刻的总偏移之差（标准偏移 + 夏令时偏移），
///    使结果在调用方时区同样落在当日零点。
fn local_timestamp(date: i64, source_tz: Tz, local_tz: Tz) -> Option<i64> {
    let year = i32::try_from(date / 10_000).ok()?;
    let month = u32::try_from(date / 100 % 100).ok()?;
    let day = u32::try_from(date % 100).ok()?;
    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_time(NaiveTime::default());

    let at_source = source_tz.from_local_datetime(&midnight).earliest()?;
    let source_offset = at_source.offset().fix().local_minus_utc();
    let local_offset = local_tz
        .offset_from_utc_datetime(&at_source.naive_utc())
        .fix()
        .local_minus_utc();

    Some(at_source.timestamp_millis() + i64::from(source_offset - local_offset) * 1000)
}

fn to_record(
    code: &Code,
    name: &str,
    timestamp: i64,
    row: &DailyRow,
    previous_close: Option<f64>,
) -> PriceRecord {
    let (previous, change, change_percentage) = match previous_close {
        None => (0.0, 0.0, 0.0),
        Some(prev) => {
            let change = row.close - prev;
            let pct = if prev == 0.0 { 0.0 } else { change / prev * 100.0 };
            (prev, change, pct)
        }
    };

    PriceRecord {
        code: code.clone(),
        name: name.to_string(),
        timestamp,
        previous_close: previous,
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        volume: row.volume,
        change,
        change_percentage,
        depth: MarketDepth::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_local_timestamp_same_zone_is_midnight() {
        let ts = local_timestamp(20240102, chrono_tz::UTC, chrono_tz::UTC).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap().timestamp_millis());
    }

    #[test]
    fn test_local_timestamp_shifts_to_local_midnight() {
        let ny = chrono_tz::America::New_York;
        // 冬令时与夏令时都应落在调用方时区的零点
        let winter = local_timestamp(20240102, ny, chrono_tz::UTC).unwrap();
        assert_eq!(winter, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap().timestamp_millis());
        let summer = local_timestamp(20240702, ny, chrono_tz::UTC).unwrap();
        assert_eq!(summer, Utc.with_ymd_and_hms(2024, 7, 2, 0, 0, 0).unwrap().timestamp_millis());

        let kl = chrono_tz::Asia::Kuala_Lumpur;
        let ts = local_timestamp(20240102, ny, kl).unwrap();
        let expected = kl.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap().timestamp_millis();
        assert_eq!(ts, expected);
    }

    #[test]
    fn test_local_timestamp_rejects_invalid_dates() {
        assert!(local_timestamp(20241301, chrono_tz::UTC, chrono_tz::UTC).is_none());
        assert!(local_timestamp(20240230, chrono_tz::UTC, chrono_tz::UTC).is_none());
        assert!(local_timestamp(-1, chrono_tz::UTC, chrono_tz::UTC).is_none());
    }

    #[test]
    fn test_first_record_has_zero_change() {
        let code = Code::new("X").unwrap();
        let row = DailyRow {
            date: 20240102,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 100.0,
            volume: 10,
        };
        let first = to_record(&code, "X", 0, &row, None);
        assert_eq!((first.previous_close, first.change, first.change_percentage), (0.0, 0.0, 0.0));

        let zero_prev = to_record(&code, "X", 0, &row, Some(0.0));
        assert_eq!(zero_prev.change, 100.0);
        assert_eq!(zero_prev.change_percentage, 0.0);
    }
}
