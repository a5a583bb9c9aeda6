use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tickwatch_core::common::Code;
use tickwatch_core::common::period::{Duration, Period};
use tickwatch_core::common::time::{FakeClockProvider, RealTimeProvider};
use tickwatch_core::market::entity::DailyRow;
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::StockHistoryServer;
use tickwatch_core::test_utils::MemDailyStore;
use tickwatch_market::history::HistoryLoader;

fn code(s: &str) -> Code {
    Code::new(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn row(date: i64, close: f64) -> DailyRow {
    DailyRow {
        date,
        open: close - 1.0,
        high: close + 1.0,
        low: close - 2.0,
        close,
        volume: 1_000,
    }
}

fn utc_midnight(y: i32, m: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp_millis()
}

fn loader(store: Arc<MemDailyStore>, source: Tz, local: Tz) -> HistoryLoader {
    HistoryLoader::new(store, Arc::new(RealTimeProvider), source, local)
}

fn utc_loader(store: Arc<MemDailyStore>) -> HistoryLoader {
    loader(store, chrono_tz::UTC, chrono_tz::UTC)
}

#[tokio::test]
async fn test_load_computes_change_fields() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    for (d, close) in [(20240102, 100.0), (20240103, 105.0), (20240104, 94.5), (20240105, 94.5)] {
        store.push_row(&aapl, row(d, close));
    }

    let history = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 1), date(2024, 2, 1)))
        .await
        .unwrap();

    assert_eq!(history.size(), 4);
    let records: Vec<_> = history.iter().collect();

    // 首条记录涨跌恒为 0
    assert_eq!(records[0].previous_close, 0.0);
    assert_eq!(records[0].change, 0.0);
    assert_eq!(records[0].change_percentage, 0.0);

    assert_eq!(records[1].previous_close, 100.0);
    assert_eq!(records[1].change, 5.0);
    assert_eq!(records[1].change_percentage, 5.0);

    assert_eq!(records[2].previous_close, 105.0);
    assert!((records[2].change_percentage - (-10.0)).abs() < 1e-9);
    assert_eq!(records[3].change, 0.0);

    assert_eq!(history.timestamp(0), Some(utc_midnight(2024, 1, 2)));
    assert_eq!(history.stock(utc_midnight(2024, 1, 3)).map(|r| r.close), Some(105.0));
    assert_eq!(history.timestamp(4), None);
    assert_eq!(history.shares_issued(), 0);
    assert_eq!(history.market_capital(), 0);
}

#[tokio::test]
async fn test_window_is_half_open() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    for d in [20240109, 20240110, 20240119, 20240120] {
        store.push_row(&aapl, row(d, 10.0));
    }

    let history = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 10), date(2024, 1, 20)))
        .await
        .unwrap();

    assert_eq!(history.size(), 2);
    assert_eq!(history.timestamp(0), Some(utc_midnight(2024, 1, 10)));
    assert_eq!(history.timestamp(1), Some(utc_midnight(2024, 1, 19)));
}

#[tokio::test]
async fn test_no_rows_is_history_not_found() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    store.push_row(&aapl, row(20230102, 10.0));

    let result = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 1), date(2024, 2, 1)))
        .await;
    assert!(matches!(result, Err(MarketError::HistoryNotFound(c)) if c == "AAPL"));
}

#[tokio::test]
async fn test_offline_store_degrades_to_not_found() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    store.push_row(&aapl, row(20240102, 10.0));
    store.set_offline(true);

    let result = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 1), date(2024, 2, 1)))
        .await;
    assert!(matches!(result, Err(MarketError::HistoryNotFound(_))));
}

#[tokio::test]
async fn test_malformed_row_is_skipped() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    store.push_row(&aapl, row(20240102, 100.0));
    store.push_malformed(&aapl, "close is not a number");
    store.push_row(&aapl, row(20241399, 1.0));
    store.push_row(&aapl, row(20240103, 110.0));

    let history = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 1), date(2024, 2, 1)))
        .await
        .unwrap();

    assert_eq!(history.size(), 2);
    let second = history.iter().nth(1).unwrap();
    assert_eq!(second.previous_close, 100.0);
    assert_eq!(second.change, 10.0);
}

#[tokio::test]
async fn test_rows_after_window_end_stop_loading() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    store.push_row(&aapl, row(20240110, 1.0));
    store.push_row(&aapl, row(20240125, 2.0));
    // 乱序行位于越界行之后，不再被读取
    store.push_row(&aapl, row(20240115, 3.0));

    let history = utc_loader(store)
        .load(&aapl, Duration::new(date(2024, 1, 1), date(2024, 1, 20)))
        .await
        .unwrap();
    assert_eq!(history.size(), 1);
}

#[tokio::test]
async fn test_display_name() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    let msft = code("MSFT");
    store.set_name(&aapl, "Apple Inc");
    store.push_row(&aapl, row(20240102, 1.0));
    store.push_row(&msft, row(20240102, 1.0));
    let loader = utc_loader(store);
    let duration = Duration::new(date(2024, 1, 1), date(2024, 2, 1));

    let apple = loader.load(&aapl, duration).await.unwrap();
    assert_eq!(apple.iter().next().unwrap().name, "Apple Inc (AAPL)");
    assert_eq!(apple.code(), &aapl);

    let micro = loader.load(&msft, duration).await.unwrap();
    assert_eq!(micro.iter().next().unwrap().name, "MSFT");
}

#[tokio::test]
async fn test_source_dates_land_on_local_midnight() {
    let store = Arc::new(MemDailyStore::new());
    let code = code("1155.KL");
    store.push_row(&code, row(20240110, 9.8));
    store.push_row(&code, row(20240711, 9.9));

    let kl = chrono_tz::Asia::Kuala_Lumpur;
    let history = loader(store, chrono_tz::America::New_York, kl)
        .load(&code, Duration::new(date(2024, 1, 10), date(2024, 12, 31)))
        .await
        .unwrap();

    assert_eq!(history.size(), 2);
    assert_eq!(
        history.timestamp(0),
        Some(kl.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap().timestamp_millis())
    );
    assert_eq!(
        history.timestamp(1),
        Some(kl.with_ymd_and_hms(2024, 7, 11, 0, 0, 0).unwrap().timestamp_millis())
    );
}

#[tokio::test]
async fn test_load_period_trims_tolerance() {
    let store = Arc::new(MemDailyStore::new());
    let aapl = code("AAPL");
    let mut day = date(2024, 5, 27);
    while day <= date(2024, 6, 9) {
        let encoded = day.format("%Y%m%d").to_string().parse::<i64>().unwrap();
        store.push_row(&aapl, row(encoded, 50.0));
        day = day.succ_opt().unwrap();
    }

    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
    ));
    let loader = HistoryLoader::new(store, clock, chrono_tz::UTC, chrono_tz::UTC);
    let history = loader.load_period(&aapl, Period::Days7).await.unwrap();

    // 加载区间含 7 天容差
    assert_eq!(history.duration().start_date(), date(2024, 5, 27));
    assert_eq!(history.duration().end_date(), date(2024, 6, 10));

    assert_eq!(history.size(), 8);
    assert_eq!(history.timestamp(0), Some(utc_midnight(2024, 6, 2)));
    assert_eq!(history.timestamp(7), Some(utc_midnight(2024, 6, 9)));
    assert!(history.stock(utc_midnight(2024, 6, 1)).is_none());
    assert!(history.stock(utc_midnight(2024, 6, 2)).is_some());
}

#[tokio::test]
async fn test_load_period_rejects_negative_tolerance() {
    let store = Arc::new(MemDailyStore::new());
    let result = utc_loader(store)
        .with_tolerance(-1)
        .load_period(&code("AAPL"), Period::Month1)
        .await;
    assert!(matches!(result, Err(MarketError::InvalidTolerance(-1))));
}
