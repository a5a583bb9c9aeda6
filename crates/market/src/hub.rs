use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tickwatch_core::market::entity::MonitorUpdate;
use tickwatch_core::notify::port::UpdateSink;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 广播通道容量，落后超过该数量的订阅者会丢弃最旧的更新。
pub const DEFAULT_HUB_CAPACITY: usize = 64;

/// 监控更新的异步流。
pub type UpdateStream = Pin<Box<dyn Stream<Item = Arc<MonitorUpdate>> + Send>>;

/// # Summary
/// 更新分发中心，将调度器的汇总结果扇出给所有订阅者。
///
/// # Invariants
/// - 发布永不阻塞：没有订阅者或订阅者落后都不影响调度器。
/// - 每个订阅者按发布顺序收到更新，落后时跳过被覆盖的部分。
#[derive(Clone)]
pub struct UpdateHub {
    tx: broadcast::Sender<Arc<MonitorUpdate>>,
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl UpdateHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// # Summary
    /// 发布一次更新。
    ///
    /// # Returns
    /// 收到该更新的订阅者数量。
    pub fn publish(&self, update: MonitorUpdate) -> usize {
        // 没有订阅者时 send 返回 Err，视为 0 个接收者
        self.tx.send(Arc::new(update)).unwrap_or(0)
    }

    /// # Summary
    /// 订阅后续发布的更新。
    ///
    /// # Logic
    /// 1. 调用时立即创建接收端，之后发布的更新都不会遗漏。
    /// 2. 落后 (Lagged) 时记录告警并从最旧的可用更新继续。
    /// 3. 所有发送端释放后流结束。
    pub fn subscribe(&self) -> UpdateStream {
        let mut rx = self.tx.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(update) => yield update,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber lagged, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Box::pin(stream)
    }

    /// # Summary
    /// 为一个订阅端启动独立的转发协程。
    ///
    /// # Logic
    /// 1. 先订阅，确保协程启动前发布的更新也能送达。
    /// 2. 逐条调用 `deliver`，失败只记录日志。
    ///
    /// # Arguments
    /// * `sink`: 订阅端。
    ///
    /// # Returns
    /// 转发协程句柄，abort 即可解除挂载。
    pub fn attach(&self, sink: Arc<dyn UpdateSink>) -> JoinHandle<()> {
        let mut updates = self.subscribe();
        tokio::spawn(async move {
            info!("Sink {} attached", sink.name());
            while let Some(update) = updates.next().await {
                match sink.deliver(&update).await {
                    Ok(()) => debug!("Tick {} delivered to {}", update.tick, sink.name()),
                    Err(e) => warn!("Sink {} failed on tick {}: {}", sink.name(), update.tick, e),
                }
            }
            info!("Sink {} detached", sink.name());
        })
    }
}
