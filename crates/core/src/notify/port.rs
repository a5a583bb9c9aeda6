use crate::market::entity::MonitorUpdate;
use crate::notify::error::NotifyError;
use async_trait::async_trait;

/// # Summary
/// 监控更新的订阅端接口。
///
/// # Invariants
/// - 实现必须是 `Send` 和 `Sync`，由独立的转发协程调用。
/// - 投递慢或失败只影响该订阅端自身，不会反压调度器。
#[async_trait]
pub trait UpdateSink: Send + Sync {
    /// 订阅端名称，用于日志。
    fn name(&self) -> &str;

    /// # Summary
    /// 投递一次 tick 更新。
    ///
    /// # Arguments
    /// * `update` - 调度器发布的汇总更新。
    ///
    /// # Returns
    /// * 成功返回 `Ok(())`。
    /// * 失败返回 `Err(NotifyError)`，由转发协程记录后继续。
    async fn deliver(&self, update: &MonitorUpdate) -> Result<(), NotifyError>;
}
