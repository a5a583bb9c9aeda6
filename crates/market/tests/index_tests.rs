use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tickwatch_core::common::Code;
use tickwatch_core::config::MonitorConfig;
use tickwatch_core::market::entity::Index;
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::RealTimeSource;
use tickwatch_core::test_utils::ScriptedSource;
use tickwatch_market::error::MonitorError;
use tickwatch_market::factory::SourceRegistry;
use tickwatch_market::index::RealTimeIndexMonitor;
use tickwatch_market::monitor::MonitorState;

fn index(code: &str, name: &str) -> Index {
    Index {
        name: name.to_string(),
        code: Code::new(code).unwrap(),
    }
}

fn config() -> MonitorConfig {
    MonitorConfig {
        name: "RealTimeIndexMonitor".to_string(),
        max_thread: 2,
        max_bucket_size: 2,
        delay_ms: 1_000,
        fetch_timeout_ms: 5_000,
        source: "scripted".to_string(),
    }
}

#[test]
fn test_index_mapping_follows_registry() {
    let source = Arc::new(ScriptedSource::new(Duration::from_millis(10)));
    let monitor = RealTimeIndexMonitor::new(&config(), source).unwrap();
    let dow = index("^DJI", "Dow Jones");
    let klse = index("^KLSE", "FTSE Bursa Malaysia KLCI");

    assert!(monitor.is_empty());
    assert!(monitor.add_index(dow.clone()));
    assert!(!monitor.add_index(index("^DJI", "Another name")));
    assert!(monitor.add_index(klse.clone()));

    // 重复添加失败时映射不被覆盖
    assert_eq!(monitor.index(&dow.code), Some(dow.clone()));
    assert_eq!(monitor.indices(), vec![dow.clone(), klse.clone()]);

    assert!(monitor.remove_index(&dow));
    assert!(!monitor.remove_index(&dow));
    assert_eq!(monitor.index(&dow.code), None);
    assert!(!monitor.is_empty());

    assert!(monitor.clear_indices());
    assert!(monitor.is_empty());
    assert!(monitor.indices().is_empty());
    assert!(monitor.clear_indices());
}

#[tokio::test(start_paused = true)]
async fn test_index_updates_are_joined() {
    let source = Arc::new(ScriptedSource::new(Duration::from_millis(10)));
    let dow = index("^DJI", "Dow Jones");
    let gspc = index("^GSPC", "S&P 500");
    source.set_price(&dow.code, 39_000.0);
    source.set_price(&gspc.code, 5_100.0);

    let monitor = RealTimeIndexMonitor::new(&config(), source).unwrap();
    monitor.add_index(dow.clone());
    monitor.add_index(gspc.clone());
    let mut updates = monitor.subscribe();
    monitor.start().unwrap();
    assert_eq!(monitor.state(), MonitorState::Running);

    let update = updates.next().await.unwrap();
    assert_eq!(update.tick, 1);
    assert_eq!(update.source, "RealTimeIndexMonitor");
    assert!(update.failed.is_empty());
    let joined: Vec<(String, f64)> = update
        .quotes
        .iter()
        .map(|q| (q.index.name.clone(), q.record.close))
        .collect();
    assert_eq!(
        joined,
        vec![("Dow Jones".to_string(), 39_000.0), ("S&P 500".to_string(), 5_100.0)]
    );

    monitor.remove_index(&dow);
    monitor.refresh();
    let update = updates.next().await.unwrap();
    assert_eq!(update.quotes.len(), 1);
    assert_eq!(update.quotes[0].index, gspc);

    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_indices_are_reported() {
    let source = Arc::new(ScriptedSource::new(Duration::from_millis(10)));
    let dow = index("^DJI", "Dow Jones");
    let gspc = index("^GSPC", "S&P 500");
    source.set_price(&dow.code, 39_000.0);
    source.set_price(&gspc.code, 5_100.0);
    source.set_failing(&gspc.code, true);

    let monitor = RealTimeIndexMonitor::new(&config(), source).unwrap();
    monitor.add_index(dow.clone());
    monitor.add_index(gspc.clone());
    let mut updates = monitor.subscribe();
    monitor.start().unwrap();

    let update = updates.next().await.unwrap();
    assert_eq!(update.source, "RealTimeIndexMonitor");
    assert_eq!(update.quotes.len(), 1);
    assert_eq!(update.quotes[0].index, dow);
    assert_eq!(update.failed, vec![gspc]);

    monitor.stop().await;
}

#[test]
fn test_source_registry_resolves_registered_ids() {
    let registry = SourceRegistry::new()
        .with("scripted", || {
            let source: Arc<dyn RealTimeSource> =
                Arc::new(ScriptedSource::new(Duration::from_millis(1)));
            Ok(source)
        })
        .with("broken", || Err(MarketError::Network("no client".to_string())));

    assert_eq!(registry.ids(), vec!["broken", "scripted"]);
    assert_eq!(registry.resolve("scripted").unwrap().id(), "scripted");
    assert!(matches!(
        registry.resolve("bloomberg"),
        Err(MonitorError::UnknownSource(id)) if id == "bloomberg"
    ));
    assert!(matches!(
        registry.resolve("broken"),
        Err(MonitorError::Source(MarketError::Network(_)))
    ));
}
