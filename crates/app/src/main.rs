use std::path::PathBuf;
use std::sync::Arc;

use config::{Config, Environment, File};
use tickwatch_core::common::Code;
use tickwatch_core::common::time::RealTimeProvider;
use tickwatch_core::config::{AppConfig, HistoryConfig, LogConfig, MonitorConfig};
use tickwatch_core::market::entity::Index;
use tickwatch_core::market::port::{RealTimeSource, StockHistoryServer};
use tickwatch_feed::yahoo::YahooProvider;
use tickwatch_market::factory::SourceRegistry;
use tickwatch_market::history::HistoryLoader;
use tickwatch_market::index::RealTimeIndexMonitor;
use tickwatch_market::monitor::RealTimeStockMonitor;
use tickwatch_notify::log::LogSink;
use tickwatch_notify::webhook::WebhookSink;
use tickwatch_store::daily::SqliteDailyStore;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 应用启动入口，纯粹的组装层。
/// 负责加载配置、实例化数据源与监控器，并挂载订阅端。
///
/// # Logic
/// 1. 安装 rustls 加密后端。
/// 2. 加载配置并初始化日志。
/// 3. 通过数据源注册表解析实时数据源。
/// 4. 构造股票与指数监控器，注册代码并挂载订阅端。
/// 5. 预加载首个代码的日线历史（行源可用时）。
/// 6. 启动监控器，挂起等待退出信号后停止。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. reqwest 以 rustls-no-provider 构建，必须先安装加密后端
    let crypto = rustls::crypto::ring::default_provider().install_default();

    // 2. 配置与日志
    let config = load_config()?;
    let _log_guard = init_tracing(&config.log);
    if crypto.is_err() {
        debug!("rustls crypto provider was already installed");
    }
    info!("tickwatch starting...");

    // 3. 数据源
    let sources = source_registry();
    debug!("Registered sources: {:?}", sources.ids());
    let source = sources.resolve(&config.monitor.source)?;

    // 4. 监控器
    let stocks = RealTimeStockMonitor::new(&config.monitor, source.clone())?;
    let index_config = MonitorConfig {
        name: "RealTimeIndexMonitor".to_string(),
        ..config.monitor.clone()
    };
    let indices = RealTimeIndexMonitor::new(&index_config, source)?;

    for raw in &config.codes {
        match Code::new(raw.as_str()) {
            Ok(code) => {
                if !stocks.add_stock_code(code) {
                    warn!("Duplicate code {} ignored", raw);
                }
            }
            Err(e) => warn!("Invalid code {:?} ignored: {}", raw, e),
        }
    }
    for entry in &config.indices {
        match Code::new(entry.code.as_str()) {
            Ok(code) => {
                let index = Index {
                    name: entry.name.clone(),
                    code,
                };
                if !indices.add_index(index) {
                    warn!("Duplicate index {} ignored", entry.code);
                }
            }
            Err(e) => warn!("Invalid index code {:?} ignored: {}", entry.code, e),
        }
    }

    let mut forwarders = vec![
        stocks.attach(Arc::new(LogSink::new()))?,
        indices.attach(Arc::new(LogSink::new()))?,
    ];
    if let Some(url) = &config.notify.webhook_url {
        forwarders.push(stocks.attach(Arc::new(WebhookSink::new(url)?))?);
        info!("Webhook sink attached: {}", url);
    }

    // 5. 历史预加载
    if let Some(first) = config.codes.first() {
        preload_history(&config.history, first).await;
    }

    // 6. 运行
    stocks.start()?;
    if !indices.is_empty() {
        indices.start()?;
    }
    info!(
        "Monitoring {} codes and {} indices. Waiting for signals...",
        config.codes.len(),
        config.indices.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping...");

    stocks.stop().await;
    indices.stop().await;
    stocks.clear_stock_codes();
    indices.clear_indices();
    for forwarder in forwarders {
        forwarder.abort();
    }
    info!("tickwatch exited");
    Ok(())
}

/// # Summary
/// 分层加载配置。
///
/// # Logic
/// 1. 可选的 `config/default.toml`。
/// 2. `TICKWATCH__` 前缀的环境变量，层级以 `__` 分隔，`codes` 以逗号分隔。
fn load_config() -> Result<AppConfig, config::ConfigError> {
    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("TICKWATCH")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("codes")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// # Summary
/// 初始化全局日志。
///
/// # Logic
/// 1. 过滤级别取自 `RUST_LOG`，缺省为 info。
/// 2. 始终输出到标准输出。
/// 3. 配置了日志目录时，额外按天滚动写入文件。
///
/// # Returns
/// 文件日志的后台写入句柄，必须存活到进程退出。
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tickwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn source_registry() -> SourceRegistry {
    SourceRegistry::new().with("yahoo", || {
        let source: Arc<dyn RealTimeSource> = Arc::new(YahooProvider::new()?);
        Ok(source)
    })
}

/// 按默认周期加载一个代码的日线并输出摘要，失败只记录日志。
async fn preload_history(history: &HistoryConfig, raw: &str) {
    let (source_tz, local_tz) = match (history.source_tz(), history.local_tz()) {
        (Ok(source), Ok(local)) => (source, local),
        (Err(e), _) | (_, Err(e)) => {
            warn!("History preload skipped: {}", e);
            return;
        }
    };
    let Ok(code) = Code::new(raw) else {
        return;
    };

    let store = match &history.db_path {
        Some(path) => SqliteDailyStore::new(PathBuf::from(path)),
        None => SqliteDailyStore::open_default(),
    };
    let loader = HistoryLoader::new(
        Arc::new(store),
        Arc::new(RealTimeProvider),
        source_tz,
        local_tz,
    )
    .with_tolerance(history.tolerance_days);

    match loader.load_period(&code, history.default_period).await {
        Ok(series) => {
            let last = series
                .timestamp(series.size().saturating_sub(1))
                .and_then(|ts| series.stock(ts));
            match last {
                Some(record) => info!(
                    "History {} ({}): {} daily records, last close {:.4}",
                    record.name,
                    history.default_period,
                    series.size(),
                    record.close
                ),
                None => info!("History {}: {} daily records", code, series.size()),
            }
        }
        Err(e) => warn!("History preload for {} failed: {}", code, e),
    }
}
