//! 供下游 crate 测试使用的内存实现，通过 `test-utils` feature 开启。

use crate::common::Code;
use crate::market::entity::{DailyRow, MarketDepth, PriceRecord};
use crate::market::error::MarketError;
use crate::market::port::{BatchResult, RealTimeSource};
use crate::store::error::StoreError;
use crate::store::port::{DailyRowStore, DailyRowStream};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 内存行源中的一项，可以是正常行或损坏行。
#[derive(Debug, Clone)]
pub enum RowEntry {
    Row(DailyRow),
    Malformed(String),
}

/// # Summary
/// 基于 DashMap 的日线行源，按插入顺序产出。
#[derive(Default)]
pub struct MemDailyStore {
    names: DashMap<Code, String>,
    rows: DashMap<Code, Vec<RowEntry>>,
    offline: AtomicBool,
}

impl MemDailyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&self, code: &Code, name: &str) {
        self.names.insert(code.clone(), name.to_string());
    }

    pub fn push_row(&self, code: &Code, row: DailyRow) {
        self.rows.entry(code.clone()).or_default().push(RowEntry::Row(row));
    }

    pub fn push_malformed(&self, code: &Code, reason: &str) {
        self.rows
            .entry(code.clone())
            .or_default()
            .push(RowEntry::Malformed(reason.to_string()));
    }

    /// 模拟数据库不可达
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DailyRowStore for MemDailyStore {
    async fn display_name(&self, code: &Code) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        Ok(self.names.get(code).map(|n| n.value().clone()))
    }

    async fn daily_rows(&self, code: &Code) -> Result<DailyRowStream, StoreError> {
        self.check_online()?;
        let items: Vec<Result<DailyRow, StoreError>> = self
            .rows
            .get(code)
            .map(|v| v.value().clone())
            .unwrap_or_default()
            .into_iter()
            .map(|entry| match entry {
                RowEntry::Row(row) => Ok(row),
                RowEntry::Malformed(reason) => Err(StoreError::MalformedRow(reason)),
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// # Summary
/// 可编排的实时数据源：固定价格、指定失败代码、可调延迟，并记录并发情况。
///
/// # Invariants
/// - `in_flight` 在请求被取消 (超时丢弃) 时同样会回落。
pub struct ScriptedSource {
    prices: DashMap<Code, f64>,
    failing: DashSet<Code>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    batches: Mutex<Vec<Vec<Code>>>,
    offline: AtomicBool,
}

impl ScriptedSource {
    pub fn new(latency: Duration) -> Self {
        Self {
            prices: DashMap::new(),
            failing: DashSet::new(),
            latency: Mutex::new(latency),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_price(&self, code: &Code, price: f64) {
        self.prices.insert(code.clone(), price);
    }

    pub fn set_failing(&self, code: &Code, failing: bool) {
        if failing {
            self.failing.insert(code.clone());
        } else {
            self.failing.remove(code);
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// 整批失败
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 按调用顺序记录的每批代码
    pub fn batches(&self) -> Vec<Vec<Code>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn quote(&self, code: &Code) -> Result<PriceRecord, MarketError> {
        if self.failing.contains(code) {
            return Err(MarketError::FetchFailed {
                code: code.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        let price = self.prices.get(code).map(|p| *p.value()).unwrap_or(1.0);
        Ok(PriceRecord {
            code: code.clone(),
            name: code.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            previous_close: price,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            change: 0.0,
            change_percentage: 0.0,
            depth: MarketDepth::default(),
        })
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealTimeSource for ScriptedSource {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn fetch_batch(&self, codes: &[Code]) -> Result<BatchResult, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(codes.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        tokio::time::sleep(latency).await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(MarketError::Network("scripted outage".to_string()));
        }
        Ok(codes.iter().map(|c| (c.clone(), self.quote(c))).collect())
    }
}
