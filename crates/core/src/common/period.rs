use crate::common::time::TimeProvider;
use crate::market::error::MarketError;
use chrono::{DateTime, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 命名的相对时间跨度，例如 "最近 5 年"。
///
/// # Invariants
/// - 只描述跨度本身，必须结合一个绝对的截止点才能得到绝对区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    Days7,
    Month1,
    Months3,
    Months6,
    Year1,
    Years2,
    Years5,
    Years10,
}

enum Span {
    Days(u64),
    Months(u32),
}

impl Period {
    fn span(self) -> Span {
        match self {
            Period::Days7 => Span::Days(7),
            Period::Month1 => Span::Months(1),
            Period::Months3 => Span::Months(3),
            Period::Months6 => Span::Months(6),
            Period::Year1 => Span::Months(12),
            Period::Years2 => Span::Months(24),
            Period::Years5 => Span::Months(60),
            Period::Years10 => Span::Months(120),
        }
    }

    /// # Summary
    /// 以日期为单位计算区间起点。
    ///
    /// # Arguments
    /// * `end`: 区间终点日期。
    ///
    /// # Returns
    /// 起点日期；超出 chrono 可表示范围时退化为 `NaiveDate::MIN`。
    pub fn start_date(self, end: NaiveDate) -> NaiveDate {
        let start = match self.span() {
            Span::Days(n) => end.checked_sub_days(Days::new(n)),
            Span::Months(n) => end.checked_sub_months(Months::new(n)),
        };
        start.unwrap_or(NaiveDate::MIN)
    }

    /// # Summary
    /// 给定绝对上界 (毫秒时间戳)，计算该周期的绝对下界。
    ///
    /// # Logic
    /// 1. 将上界换算为 `tz` 时区的本地时刻。
    /// 2. 在本地日历上回退跨度（月份按日历月回退）。
    /// 3. 换算回毫秒时间戳；若本地时刻落在夏令时空隙中，按 UTC 解释该本地时刻。
    ///
    /// # Arguments
    /// * `end_timestamp`: 上界，Unix 毫秒。
    /// * `tz`: 进行日历运算的时区。
    ///
    /// # Returns
    /// 下界，Unix 毫秒。
    pub fn start_timestamp(self, end_timestamp: i64, tz: Tz) -> i64 {
        let Some(end) = DateTime::from_timestamp_millis(end_timestamp) else {
            return i64::MIN;
        };
        let local_end = end.with_timezone(&tz).naive_local();
        let local_start = match self.span() {
            Span::Days(n) => local_end.checked_sub_days(Days::new(n)),
            Span::Months(n) => local_end.checked_sub_months(Months::new(n)),
        };
        match local_start {
            Some(naive) => local_to_millis(naive, tz),
            None => i64::MIN,
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "7d" | "days7" => Ok(Period::Days7),
            "1mo" | "month1" => Ok(Period::Month1),
            "3mo" | "months3" => Ok(Period::Months3),
            "6mo" | "months6" => Ok(Period::Months6),
            "1y" | "year1" => Ok(Period::Year1),
            "2y" | "years2" => Ok(Period::Years2),
            "5y" | "years5" => Ok(Period::Years5),
            "10y" | "years10" => Ok(Period::Years10),
            _ => Err(format!("Unknown Period: {}", s)),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Days7 => write!(f, "7d"),
            Period::Month1 => write!(f, "1mo"),
            Period::Months3 => write!(f, "3mo"),
            Period::Months6 => write!(f, "6mo"),
            Period::Year1 => write!(f, "1y"),
            Period::Years2 => write!(f, "2y"),
            Period::Years5 => write!(f, "5y"),
            Period::Years10 => write!(f, "10y"),
        }
    }
}

/// # Summary
/// 已解析的绝对日期区间 `[start, end]`。
///
/// # Invariants
/// - 值类型，所有变换均返回新实例。
/// - 区间在时间戳层面按半开区间 `[start, end)` 使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    start: NaiveDate,
    end: NaiveDate,
}

impl Duration {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// 以 `today` 为终点，按周期规则推出起点。
    pub fn today_by_period(period: Period, today: NaiveDate) -> Self {
        Self {
            start: period.start_date(today),
            end: today,
        }
    }

    /// # Summary
    /// 将起点再向前回退若干天，用于补偿数据源的滞后。
    ///
    /// # Arguments
    /// * `days`: 回退天数。
    ///
    /// # Returns
    /// 终点不变、起点提前的新区间。
    pub fn back_step_start_date(self, days: u64) -> Self {
        Self {
            start: self.start.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN),
            end: self.end,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end
    }

    /// 起点日期在 `tz` 中零点的毫秒时间戳。
    pub fn start_timestamp(&self, tz: Tz) -> i64 {
        local_to_millis(self.start.and_time(NaiveTime::default()), tz)
    }

    /// 终点日期在 `tz` 中零点的毫秒时间戳。
    pub fn end_timestamp(&self, tz: Tz) -> i64 {
        local_to_millis(self.end.and_time(NaiveTime::default()), tz)
    }
}

/// # Summary
/// 将周期解析为以 "今天" 为终点的绝对区间。
///
/// # Logic
/// 1. 通过时钟取 `tz` 下的当天日期作为终点。
/// 2. 由周期规则推出起点。
/// 3. 起点再回退 `tolerance_days` 天。
///
/// # Arguments
/// * `period`: 相对周期。
/// * `tolerance_days`: 回退容差，必须非负。
/// * `clock`: 时钟。
/// * `tz`: 调用方时区。
///
/// # Returns
/// 成功返回区间；容差为负返回 `MarketError::InvalidTolerance`。
pub fn resolve(
    period: Period,
    tolerance_days: i64,
    clock: &dyn TimeProvider,
    tz: Tz,
) -> Result<Duration, MarketError> {
    let days = u64::try_from(tolerance_days)
        .map_err(|_| MarketError::InvalidTolerance(tolerance_days))?;
    Ok(Duration::today_by_period(period, clock.today(tz)).back_step_start_date(days))
}

fn local_to_millis(naive: NaiveDateTime, tz: Tz) -> i64 {
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp_millis(),
        None => naive.and_utc().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FakeClockProvider;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_start_date() {
        let end = date(2024, 3, 31);
        assert_eq!(Period::Days7.start_date(end), date(2024, 3, 24));
        assert_eq!(Period::Month1.start_date(end), date(2024, 2, 29));
        assert_eq!(Period::Years5.start_date(end), date(2019, 3, 31));
    }

    #[test]
    fn test_period_start_timestamp_uses_calendar_months() {
        let tz = chrono_tz::UTC;
        let end = Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap();
        let start = Period::Months3.start_timestamp(end.timestamp_millis(), tz);
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_resolve_applies_tolerance() {
        let clock = FakeClockProvider::new(Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap());
        let duration = resolve(Period::Year1, 7, &clock, chrono_tz::UTC).unwrap();
        assert_eq!(duration.end_date(), date(2024, 6, 10));
        assert_eq!(duration.start_date(), date(2023, 6, 3));

        let exact = resolve(Period::Year1, 0, &clock, chrono_tz::UTC).unwrap();
        assert_eq!(exact.start_date(), date(2023, 6, 10));
    }

    #[test]
    fn test_resolve_rejects_negative_tolerance() {
        let clock = FakeClockProvider::new(Utc::now());
        let err = resolve(Period::Days7, -1, &clock, chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, MarketError::InvalidTolerance(-1)));
    }

    #[test]
    fn test_duration_timestamps_are_local_midnight() {
        let duration = Duration::new(date(2024, 1, 2), date(2024, 1, 3));
        let tz = chrono_tz::Asia::Kuala_Lumpur;
        // 吉隆坡零点 = 前一日 16:00 UTC
        assert_eq!(
            duration.start_timestamp(tz),
            Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap().timestamp_millis()
        );
        assert_eq!(
            duration.end_timestamp(tz) - duration.start_timestamp(tz),
            24 * 3600 * 1000
        );
    }

    #[test]
    fn test_period_parse_and_display() {
        assert_eq!("5y".parse::<Period>(), Ok(Period::Years5));
        assert_eq!("MONTHS3".parse::<Period>(), Ok(Period::Months3));
        assert!("forever".parse::<Period>().is_err());
        assert_eq!(Period::Days7.to_string(), "7d");
    }
}
