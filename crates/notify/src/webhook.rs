use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tickwatch_core::market::entity::MonitorUpdate;
use tickwatch_core::notify::error::NotifyError;
use tickwatch_core::notify::port::UpdateSink;
use tracing::debug;

/// # Summary
/// 以 JSON POST 方式把监控更新推送到 HTTP 端点的订阅端。
///
/// # Invariants
/// * `url` 在构造时已校验为合法的 http(s) 地址。
/// * 单次请求 10 秒超时，慢端点只阻塞自己的转发协程。
pub struct WebhookSink {
    /// 目标地址
    url: Url,
    /// 复用的 HTTP 客户端
    client: Client,
}

impl WebhookSink {
    /// # Summary
    /// 创建 `WebhookSink`。
    ///
    /// # Logic
    /// 1. 解析地址，只接受 http 与 https。
    /// 2. 构建带超时的 reqwest 客户端。
    ///
    /// # Arguments
    /// * `url` - Webhook 地址。
    ///
    /// # Returns
    /// * 地址非法或客户端构建失败时返回 `NotifyError::Config`。
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let url = Url::parse(url).map_err(|e| NotifyError::Config(format!("{}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::Config(format!(
                "Unsupported webhook scheme: {}",
                url.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl UpdateSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    /// # Summary
    /// 推送一次更新。
    ///
    /// # Logic
    /// 1. 将 `MonitorUpdate` 序列化为 JSON 请求体并 POST。
    /// 2. 非 2xx 响应连同响应体一起作为平台错误返回。
    ///
    /// # Returns
    /// * 传输失败返回 `NotifyError::Network`，非 2xx 返回 `NotifyError::Platform`。
    async fn deliver(&self, update: &MonitorUpdate) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(update)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Platform(format!("Webhook returned {}: {}", status, body)));
        }

        debug!("Tick {} pushed to {}", update.tick, self.url);
        Ok(())
    }
}
