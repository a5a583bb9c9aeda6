use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tickwatch_core::common::Code;
use tickwatch_core::market::entity::{MarketDepth, PriceRecord};
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::{BatchResult, RealTimeSource};
use tracing::{debug, warn};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// # Summary
/// Yahoo Finance 实时报价源。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端，单次请求 10 秒超时。
/// - 一个桶内的代码并发请求，每个代码的结果互不影响。
#[derive(Clone)]
pub struct YahooProvider {
    /// 内部使用的 HTTP 客户端
    client: Client,
    base_url: String,
}

impl YahooProvider {
    /// # Summary
    /// 创建一个新的 YahooProvider 实例。
    ///
    /// # Logic
    /// 1. 配置 10 秒超时。
    /// 2. 设置浏览器 User-Agent 以减少被拦截。
    /// 3. 初始化 reqwest 客户端。
    ///
    /// # Returns
    /// 成功返回 YahooProvider，客户端构建失败返回 `MarketError::Network`。
    pub fn new() -> Result<Self, MarketError> {
        Self::with_base_url(CHART_URL)
    }

    /// 指定图表接口地址，便于接入镜像或测试桩。
    pub fn with_base_url(base_url: &str) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36")
            .build()
            .map_err(|e| MarketError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// # Summary
    /// 获取单个代码的当日报价。
    ///
    /// # Logic
    /// 1. 请求 `range=1d&interval=1d` 的图表数据。
    /// 2. 请求未能发出或未收到响应时为网络错误。
    /// 3. 收到非 2xx 响应时只记为该代码获取失败 (如已退市的代码返回 404)。
    /// 4. 交由 `parse_chart` 转换为快照。
    async fn fetch_quote(&self, code: &Code) -> Result<PriceRecord, MarketError> {
        let url = format!("{}/{}", self.base_url, code);
        let resp = self
            .client
            .get(&url)
            .query(&[("range", "1d"), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::FetchFailed {
                code: code.to_string(),
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let json: YahooResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        parse_chart(code, json)
    }
}

/// Yahoo v8 chart 接口响应顶层结构。
#[derive(Deserialize, Debug)]
struct YahooResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Debug)]
struct YahooError {
    description: String,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    meta: YahooMeta,
    indicators: Option<YahooIndicators>,
}

/// 图表接口的 meta 块，包含实时报价字段。
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<i64>,
    regular_market_time: Option<i64>,
    long_name: Option<String>,
    short_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    open: Option<Vec<Option<f64>>>,
}

/// # Summary
/// 将图表响应转换为价格快照。
///
/// # Logic
/// 1. 接口级错误映射为 `MarketError::Unknown`，无结果映射为 `NotFound`。
/// 2. 缺少最新价视为解析错误。
/// 3. 前收盘价优先取 `chartPreviousClose`，其次 `previousClose`，都缺失时以最新价代替。
/// 4. 开盘价取当日第一根 K 线的开盘价，缺失时以最新价代替。
fn parse_chart(code: &Code, json: YahooResponse) -> Result<PriceRecord, MarketError> {
    if let Some(err) = json.chart.error {
        return Err(MarketError::Unknown(err.description));
    }
    let result = json
        .chart
        .result
        .and_then(|mut r| r.pop())
        .ok_or(MarketError::NotFound)?;
    let meta = result.meta;

    let close = meta
        .regular_market_price
        .ok_or_else(|| MarketError::Parse(format!("{}: missing regularMarketPrice", code)))?;
    let previous_close = meta
        .chart_previous_close
        .or(meta.previous_close)
        .unwrap_or(close);
    let open = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .and_then(|q| q.open)
        .and_then(|o| o.into_iter().flatten().next())
        .unwrap_or(close);

    let change = close - previous_close;
    let change_percentage = if previous_close == 0.0 {
        0.0
    } else {
        change / previous_close * 100.0
    };
    let timestamp = meta
        .regular_market_time
        .and_then(|secs| secs.checked_mul(1000))
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let name = meta
        .long_name
        .or(meta.short_name)
        .unwrap_or_else(|| code.to_string());

    Ok(PriceRecord {
        code: code.clone(),
        name,
        timestamp,
        previous_close,
        open,
        high: meta.regular_market_day_high.unwrap_or(close),
        low: meta.regular_market_day_low.unwrap_or(close),
        close,
        volume: meta.regular_market_volume.unwrap_or(0),
        change,
        change_percentage,
        depth: MarketDepth::default(),
    })
}

#[async_trait]
impl RealTimeSource for YahooProvider {
    fn id(&self) -> &str {
        "yahoo"
    }

    /// # Summary
    /// 并发获取一个桶内全部代码的报价。
    ///
    /// # Logic
    /// 1. 为每个代码发起独立请求并等待全部完成。
    /// 2. 若每个请求都没有收到响应，判定为整批失败（上游不可达）；
    ///    只要有响应返回，即使是错误状态，也逐代码报告。
    /// 3. 否则逐代码返回结果。
    async fn fetch_batch(&self, codes: &[Code]) -> Result<BatchResult, MarketError> {
        let quotes = join_all(codes.iter().map(|code| self.fetch_quote(code))).await;

        let all_network_down = !quotes.is_empty()
            && quotes
                .iter()
                .all(|q| matches!(q, Err(MarketError::Network(_))));
        if all_network_down {
            warn!("Yahoo unreachable for whole batch of {}", codes.len());
            return Err(MarketError::Network(format!(
                "all {} requests failed",
                codes.len()
            )));
        }

        debug!("Yahoo batch of {} fetched", codes.len());
        Ok(codes.iter().cloned().zip(quotes).collect())
    }
}
