use crate::error::MonitorError;
use crate::monitor::{MonitorState, RealTimeStockMonitor};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tickwatch_core::common::Code;
use tickwatch_core::config::MonitorConfig;
use tickwatch_core::market::entity::{Index, IndexQuote, IndexUpdate};
use tickwatch_core::market::port::RealTimeSource;
use tickwatch_core::notify::port::UpdateSink;
use tokio::task::JoinHandle;

/// 指数更新的异步流。
pub type IndexUpdateStream = Pin<Box<dyn Stream<Item = IndexUpdate> + Send>>;

/// # Summary
/// 实时指数监控器，在股票监控器之上维护 代码 -> 指数 的映射。
///
/// # Invariants
/// - 映射与底层注册表的修改在同一把锁内完成，两者始终一致。
/// - 映射中的代码集合等于底层注册表中的代码集合。
pub struct RealTimeIndexMonitor {
    monitor: RealTimeStockMonitor,
    indices: Arc<Mutex<HashMap<Code, Index>>>,
}

impl RealTimeIndexMonitor {
    pub fn new(
        config: &MonitorConfig,
        source: Arc<dyn RealTimeSource>,
    ) -> Result<Self, MonitorError> {
        Ok(Self {
            monitor: RealTimeStockMonitor::new(config, source)?,
            indices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// # Summary
    /// 注册一个指数。
    ///
    /// # Logic
    /// 在映射锁内先委托注册表，成功后再写入映射。
    ///
    /// # Returns
    /// 注册表的结果：代码已存在时为 false。
    pub fn add_index(&self, index: Index) -> bool {
        let mut indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        let added = self.monitor.add_stock_code(index.code.clone());
        if added {
            indices.insert(index.code.clone(), index);
        }
        added
    }

    pub fn remove_index(&self, index: &Index) -> bool {
        let mut indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        let removed = self.monitor.remove_stock_code(&index.code);
        if removed {
            indices.remove(&index.code);
        }
        removed
    }

    pub fn clear_indices(&self) -> bool {
        let mut indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        let cleared = self.monitor.clear_stock_codes();
        indices.clear();
        cleared
    }

    pub fn is_empty(&self) -> bool {
        self.monitor.is_empty()
    }

    /// 按代码查找已注册的指数。
    pub fn index(&self, code: &Code) -> Option<Index> {
        self.indices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
    }

    /// 全部已注册的指数，按代码排序。
    pub fn indices(&self) -> Vec<Index> {
        let mut all: Vec<Index> = self
            .indices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    pub fn name(&self) -> &str {
        self.monitor.name()
    }

    pub fn start(&self) -> Result<(), MonitorError> {
        self.monitor.start()
    }

    pub async fn stop(&self) {
        self.monitor.stop().await
    }

    pub fn state(&self) -> MonitorState {
        self.monitor.state()
    }

    pub fn refresh(&self) {
        self.monitor.refresh()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.monitor.set_delay(delay)
    }

    /// 挂载订阅端，收到的是未关联指数的原始更新。
    pub fn attach(&self, sink: Arc<dyn UpdateSink>) -> Result<JoinHandle<()>, MonitorError> {
        self.monitor.attach(sink)
    }

    /// # Summary
    /// 订阅关联了指数的更新。
    ///
    /// # Logic
    /// 每条记录与失败代码按其代码在当前映射中查找指数；tick 期间被注销的代码不再输出。
    pub fn subscribe(&self) -> IndexUpdateStream {
        let mut updates = self.monitor.subscribe();
        let indices = self.indices.clone();
        let stream = async_stream::stream! {
            while let Some(update) = updates.next().await {
                let (quotes, failed) = {
                    let indices = indices.lock().unwrap_or_else(|e| e.into_inner());
                    let quotes: Vec<IndexQuote> = update
                        .records
                        .iter()
                        .filter_map(|record| {
                            indices.get(&record.code).map(|index| IndexQuote {
                                index: index.clone(),
                                record: record.clone(),
                            })
                        })
                        .collect();
                    let failed: Vec<Index> = update
                        .failed
                        .iter()
                        .filter_map(|code| indices.get(code).cloned())
                        .collect();
                    (quotes, failed)
                };
                yield IndexUpdate {
                    source: update.source.clone(),
                    tick: update.tick,
                    quotes,
                    failed,
                    published_at: update.published_at,
                };
            }
        };
        Box::pin(stream)
    }
}
