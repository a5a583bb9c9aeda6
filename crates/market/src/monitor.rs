use crate::error::MonitorError;
use crate::hub::{UpdateHub, UpdateStream};
use crate::registry::CodeRegistry;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tickwatch_core::common::Code;
use tickwatch_core::config::MonitorConfig;
use tickwatch_core::market::entity::{MonitorUpdate, PriceRecord};
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::{BatchResult, RealTimeSource};
use tickwatch_core::notify::port::UpdateSink;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 监控器生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
}

enum Lifecycle {
    Idle,
    Running(RunHandle),
    // 调度协程仍在结算，持有其退出信号
    Stopping(watch::Receiver<bool>),
}

struct RunHandle {
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Lifecycle {
    /// 调度协程已退出时将 Stopping 收敛为 Idle。
    fn settle(&mut self) {
        if matches!(self, Lifecycle::Stopping(done_rx) if scheduler_exited(done_rx)) {
            *self = Lifecycle::Idle;
        }
    }
}

/// # Summary
/// 实时股票监控器：按桶轮询数据源，并将每个 tick 的汇总结果发布给订阅者。
///
/// # Invariants
/// - 状态机为 Idle -> Running -> Stopping -> Idle。
/// - 同一时刻至多一个调度协程在运行。
/// - 代码注册表可在运行中任意增删，调度器只读取快照。
/// - tick 序号在监控器整个生命周期内单调递增，重启不归零。
pub struct RealTimeStockMonitor {
    name: String,
    max_thread: usize,
    fetch_timeout: Duration,
    registry: Arc<CodeRegistry>,
    source: Arc<dyn RealTimeSource>,
    hub: UpdateHub,
    delay_tx: watch::Sender<Duration>,
    refresh: Arc<Notify>,
    ticks: Arc<AtomicU64>,
    lifecycle: Mutex<Lifecycle>,
}

impl RealTimeStockMonitor {
    /// # Summary
    /// 根据配置创建监控器，初始为 Idle。
    ///
    /// # Arguments
    /// * `config`: 监控配置，`max_thread` 与 `max_bucket_size` 必须至少为 1。
    /// * `source`: 实时数据源。
    ///
    /// # Returns
    /// 配置非法时返回 `MonitorError::Config`。
    pub fn new(
        config: &MonitorConfig,
        source: Arc<dyn RealTimeSource>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let (delay_tx, _) = watch::channel(config.delay());
        Ok(Self {
            name: config.name.clone(),
            max_thread: config.max_thread,
            fetch_timeout: config.fetch_timeout(),
            registry: Arc::new(CodeRegistry::new(config.max_bucket_size)),
            source,
            hub: UpdateHub::default(),
            delay_tx,
            refresh: Arc::new(Notify::new()),
            ticks: Arc::new(AtomicU64::new(0)),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    pub fn add_stock_code(&self, code: Code) -> bool {
        self.registry.add(code)
    }

    pub fn remove_stock_code(&self, code: &Code) -> bool {
        self.registry.remove(code)
    }

    pub fn clear_stock_codes(&self) -> bool {
        self.registry.clear()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 当前注册的分桶快照。
    pub fn buckets(&self) -> Vec<Vec<Code>> {
        self.registry.snapshot()
    }

    pub fn state(&self) -> MonitorState {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        lifecycle.settle();
        match &*lifecycle {
            Lifecycle::Idle => MonitorState::Idle,
            Lifecycle::Running(_) => MonitorState::Running,
            Lifecycle::Stopping(_) => MonitorState::Stopping,
        }
    }

    pub fn delay(&self) -> Duration {
        *self.delay_tx.borrow()
    }

    /// 修改 tick 间隔，正在等待的调度器按新间隔重新计算下一次 tick。
    pub fn set_delay(&self, delay: Duration) {
        self.delay_tx.send_replace(delay);
    }

    /// 唤醒正在等待的调度器立即开始下一个 tick；tick 进行中调用则在其结束后立即开始下一个。
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn subscribe(&self) -> UpdateStream {
        self.hub.subscribe()
    }

    /// 为订阅端挂载转发协程，必须在 tokio 运行时内调用。
    pub fn attach(&self, sink: Arc<dyn UpdateSink>) -> Result<JoinHandle<()>, MonitorError> {
        Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        Ok(self.hub.attach(sink))
    }

    /// # Summary
    /// 启动调度协程。
    ///
    /// # Logic
    /// 1. 仅在 Idle 状态下允许启动；上一个调度协程尚未退出时仍视为 Stopping。
    /// 2. 获取当前 tokio 运行时句柄，不在运行时内则报错。
    /// 3. 构造调度器并 spawn，状态切换为 Running。
    ///
    /// # Returns
    /// Running 时返回 `AlreadyRunning`，Stopping 时返回 `ShuttingDown`。
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        lifecycle.settle();
        match &*lifecycle {
            Lifecycle::Running(_) => return Err(MonitorError::AlreadyRunning),
            Lifecycle::Stopping(_) => return Err(MonitorError::ShuttingDown),
            Lifecycle::Idle => {}
        }
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Scheduler {
            name: self.name.clone(),
            fetch_timeout: self.fetch_timeout,
            permits: Arc::new(Semaphore::new(self.max_thread)),
            registry: self.registry.clone(),
            source: self.source.clone(),
            hub: self.hub.clone(),
            delay_rx: self.delay_tx.subscribe(),
            refresh: self.refresh.clone(),
            stop_rx,
            ticks: self.ticks.clone(),
            last_known: HashMap::new(),
        };
        let (done_tx, done_rx) = watch::channel(false);
        runtime.spawn(async move {
            scheduler.run().await;
            done_tx.send_replace(true);
        });
        *lifecycle = Lifecycle::Running(RunHandle { stop_tx, done_rx });
        info!("{} started with source {}", self.name, self.source.id());
        Ok(())
    }

    /// # Summary
    /// 停止调度协程并等待其退出。
    ///
    /// # Logic
    /// 1. Idle 状态直接返回。
    /// 2. Running 时切换为 Stopping 并发送停止信号；已是 Stopping 时只等待。
    /// 3. 等待已派发的桶任务结算、调度协程退出后回到 Idle。
    ///
    /// 该 future 被中途丢弃时状态保持 Stopping，直到调度协程真正退出。
    pub async fn stop(&self) {
        let mut done_rx = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            lifecycle.settle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
                Lifecycle::Idle => return,
                Lifecycle::Running(handle) => {
                    info!("{} stopping", self.name);
                    handle.stop_tx.send_replace(true);
                    *lifecycle = Lifecycle::Stopping(handle.done_rx.clone());
                    handle.done_rx
                }
                Lifecycle::Stopping(done_rx) => {
                    *lifecycle = Lifecycle::Stopping(done_rx.clone());
                    done_rx
                }
            }
        };

        flag_raised(&mut done_rx).await;
        if !*done_rx.borrow() {
            error!("{} scheduler task terminated abnormally", self.name);
        }
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .settle();
        info!("{} stopped", self.name);
    }
}

impl Drop for RealTimeStockMonitor {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Lifecycle::Running(handle) = lifecycle {
            handle.stop_tx.send_replace(true);
        }
    }
}

fn scheduler_exited(done_rx: &watch::Receiver<bool>) -> bool {
    *done_rx.borrow() || done_rx.has_changed().is_err()
}

/// 单个桶任务的结果，超时以 `MarketError::Timeout` 表示。
type BucketOutcome = Result<BatchResult, MarketError>;

/// # Summary
/// 调度循环的执行器，独占一次运行期间的全部可变状态。
struct Scheduler {
    name: String,
    fetch_timeout: Duration,
    permits: Arc<Semaphore>,
    registry: Arc<CodeRegistry>,
    source: Arc<dyn RealTimeSource>,
    hub: UpdateHub,
    delay_rx: watch::Receiver<Duration>,
    refresh: Arc<Notify>,
    stop_rx: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
    // 每个代码最近一次成功获取的快照
    last_known: HashMap<Code, PriceRecord>,
}

impl Scheduler {
    /// # Summary
    /// 调度主循环。
    ///
    /// # Logic
    /// 1. 记录 tick 开始时刻并执行一个 tick。
    /// 2. tick 被停止信号打断时直接退出，不发布。
    /// 3. 否则等待至 `开始时刻 + delay`，期间可被 refresh 提前唤醒或被停止信号终止。
    async fn run(mut self) {
        debug!("{} scheduler loop entered", self.name);
        loop {
            if self.stop_requested() {
                break;
            }
            let started = Instant::now();
            if !self.tick().await {
                break;
            }
            if !self.wait_next(started).await {
                break;
            }
        }
        debug!("{} scheduler loop exited", self.name);
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    /// # Summary
    /// 执行一个完整的 tick。
    ///
    /// # Logic
    /// 1. 获取注册表快照，为空时清空缓存并跳过发布。
    /// 2. 按桶顺序派发任务，每次派发前检查停止信号，并受 `max_thread` 个许可约束。
    /// 3. 每个任务以 `fetch_timeout` 为上限执行。
    /// 4. 等待所有已派发任务结算。
    /// 5. 派发被打断时放弃本 tick；否则合并并发布。
    ///
    /// # Returns
    /// 本 tick 正常结束返回 true，被停止信号打断返回 false。
    async fn tick(&mut self) -> bool {
        let buckets = self.registry.snapshot();
        if buckets.is_empty() {
            self.last_known.clear();
            debug!("{} has no codes registered, tick skipped", self.name);
            return true;
        }

        let mut tasks = JoinSet::new();
        let mut interrupted = false;
        for (slot, bucket) in buckets.iter().enumerate() {
            if self.stop_requested() {
                interrupted = true;
                break;
            }
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        interrupted = true;
                        break;
                    }
                },
                _ = flag_raised(&mut self.stop_rx) => {
                    interrupted = true;
                    break;
                }
            };

            let source = self.source.clone();
            let codes = bucket.clone();
            let timeout = self.fetch_timeout;
            tasks.spawn(async move {
                let outcome = tokio::time::timeout(timeout, source.fetch_batch(&codes))
                    .await
                    .unwrap_or_else(|_| {
                        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                        Err(MarketError::Timeout(millis))
                    });
                drop(permit);
                (slot, outcome)
            });
        }

        let mut outcomes: Vec<Option<BucketOutcome>> = buckets.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => {
                    if let Some(entry) = outcomes.get_mut(slot) {
                        *entry = Some(outcome);
                    }
                }
                Err(e) => error!("{} bucket task failed: {}", self.name, e),
            }
        }

        if interrupted {
            info!("{} tick interrupted by stop", self.name);
            return false;
        }

        let update = self.merge(&buckets, outcomes);
        debug!(
            "{} tick {}: {} records, {} failed",
            self.name,
            update.tick,
            update.records.len(),
            update.failed.len()
        );
        self.hub.publish(update);
        true
    }

    /// # Summary
    /// 按桶顺序合并本 tick 的结果。
    ///
    /// # Logic
    /// 1. 成功的代码更新缓存并输出新快照。
    /// 2. 单个代码失败或整批失败：列入 `failed`，若有上一次快照则沿用。
    /// 3. 超时的桶：列入 `failed`，本 tick 不输出其记录，缓存保留。
    /// 4. 清理已注销代码的缓存。
    fn merge(&mut self, buckets: &[Vec<Code>], outcomes: Vec<Option<BucketOutcome>>) -> MonitorUpdate {
        let mut records = Vec::new();
        let mut failed = Vec::new();

        for (bucket, outcome) in buckets.iter().zip(outcomes) {
            match outcome {
                Some(Ok(results)) => {
                    let mut by_code: HashMap<Code, Result<PriceRecord, MarketError>> =
                        results.into_iter().collect();
                    for code in bucket {
                        match by_code.remove(code) {
                            Some(Ok(record)) => {
                                self.last_known.insert(code.clone(), record.clone());
                                records.push(record);
                            }
                            Some(Err(e)) => {
                                warn!("Fetch failed for {}: {}", code, e);
                                self.retain_previous(code, &mut records, &mut failed);
                            }
                            None => {
                                warn!("Source {} returned no result for {}", self.source.id(), code);
                                self.retain_previous(code, &mut records, &mut failed);
                            }
                        }
                    }
                }
                Some(Err(e @ MarketError::Timeout(_))) => {
                    warn!("Batch of {} codes dropped: {}", bucket.len(), e);
                    failed.extend(bucket.iter().cloned());
                }
                Some(Err(e)) => {
                    warn!("Batch of {} codes failed: {}", bucket.len(), e);
                    for code in bucket {
                        self.retain_previous(code, &mut records, &mut failed);
                    }
                }
                None => {
                    for code in bucket {
                        self.retain_previous(code, &mut records, &mut failed);
                    }
                }
            }
        }

        let registered: HashSet<&Code> = buckets.iter().flatten().collect();
        self.last_known.retain(|code, _| registered.contains(code));

        MonitorUpdate {
            source: self.name.clone(),
            tick: self.ticks.fetch_add(1, Ordering::SeqCst) + 1,
            records,
            failed,
            published_at: Utc::now(),
        }
    }

    fn retain_previous(&self, code: &Code, records: &mut Vec<PriceRecord>, failed: &mut Vec<Code>) {
        failed.push(code.clone());
        if let Some(previous) = self.last_known.get(code) {
            records.push(previous.clone());
        }
    }

    /// # Summary
    /// 等待下一个 tick 的开始时刻。
    ///
    /// # Returns
    /// 应继续运行返回 true，收到停止信号返回 false。
    async fn wait_next(&mut self, started: Instant) -> bool {
        loop {
            if self.stop_requested() {
                return false;
            }
            let deadline = started + *self.delay_rx.borrow_and_update();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                _ = self.refresh.notified() => {
                    debug!("{} refresh requested", self.name);
                    return true;
                }
                _ = flag_raised(&mut self.stop_rx) => return false,
                changed = self.delay_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

/// 标志置位或发送端释放时返回。
async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
