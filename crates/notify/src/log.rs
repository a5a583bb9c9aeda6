use async_trait::async_trait;
use tickwatch_core::market::entity::MonitorUpdate;
use tickwatch_core::notify::error::NotifyError;
use tickwatch_core::notify::port::UpdateSink;
use tracing::{debug, info, warn};

/// # Summary
/// 把每个 tick 的汇总写入 tracing 日志的订阅端。
///
/// # Invariants
/// - 投递永不失败。
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpdateSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    /// # Summary
    /// 输出 tick 摘要，逐条记录只在 debug 级别输出。
    async fn deliver(&self, update: &MonitorUpdate) -> Result<(), NotifyError> {
        info!(
            "[{}] tick {}: {} quotes, {} failed",
            update.source,
            update.tick,
            update.records.len(),
            update.failed.len()
        );
        for record in &update.records {
            debug!(
                "[{}] {} {:.4} ({:+.4}, {:+.2}%)",
                update.source, record.name, record.close, record.change, record.change_percentage
            );
        }
        if !update.failed.is_empty() {
            let failed: Vec<&str> = update.failed.iter().map(|c| c.as_str()).collect();
            warn!("[{}] tick {} failed codes: {}", update.source, update.tick, failed.join(", "));
        }
        Ok(())
    }
}
