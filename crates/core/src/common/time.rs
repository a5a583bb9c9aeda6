use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::RwLock;

/// # Summary
/// 时钟接口，隔离物理系统时钟。
/// 周期解析 ("今天" 的判定) 一律经由此接口取时间，测试可注入固定时钟。
pub trait TimeProvider: Send + Sync {
    /// 当前时刻
    fn now(&self) -> DateTime<Utc>;

    /// # Summary
    /// 指定时区下的当前日历日。
    ///
    /// # Arguments
    /// * `tz`: 调用方所在时区。
    ///
    /// # Returns
    /// 该时区的当天日期。
    fn today(&self, tz: Tz) -> NaiveDate {
        self.now().with_timezone(&tz).date_naive()
    }
}

/// 真实时钟，直接返回操作系统当前时间。
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 可手动拨动的虚拟时钟。
///
/// # Invariants
/// - 内部利用 `RwLock` 支持多线程读写；锁中毒时沿用中毒前的值。
pub struct FakeClockProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl FakeClockProvider {
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time = new_time;
    }
}

impl TimeProvider for FakeClockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_today_depends_on_timezone() {
        // 2024-03-01 02:00 UTC 在纽约仍是 2 月 29 日
        let clock = FakeClockProvider::new(Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap());
        assert_eq!(
            clock.today(chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(
            clock.today(chrono_tz::America::New_York),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );

        clock.set_time(Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap());
        assert_eq!(
            clock.today(chrono_tz::America::New_York),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
        );
    }
}
