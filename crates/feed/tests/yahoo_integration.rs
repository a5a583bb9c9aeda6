use tickwatch_core::common::Code;
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::RealTimeSource;
use tickwatch_feed::yahoo::YahooProvider;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn install_crypto() {
    // 重复安装会返回 Err，忽略即可
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();
}

/// # Summary
/// 雅虎财经批量报价的集成测试（需要外网）。
///
/// # Logic
/// 1. 初始化 YahooProvider。
/// 2. 以一个真实代码和一个不存在的代码组成一批。
/// 3. 断言真实代码成功、不存在的代码单独失败而不是整批失败。
#[tokio::test]
#[ignore] // 依赖外网，手动执行
async fn test_yahoo_real_batch() {
    install_crypto();
    let provider = YahooProvider::new().expect("Failed to build provider");
    let codes = vec![
        Code::new("AAPL").unwrap(),
        Code::new("NO_SUCH_CODE_123").unwrap(),
    ];

    let results = provider
        .fetch_batch(&codes)
        .await
        .expect("Batch should not fail as a whole");

    assert_eq!(results.len(), 2);
    let (apple, quote) = &results[0];
    assert_eq!(apple.as_str(), "AAPL");
    let quote = quote.as_ref().expect("AAPL quote should succeed");
    assert!(quote.close > 0.0);
    println!("AAPL -> {} ({:+.2}%)", quote.close, quote.change_percentage);

    assert!(results[1].1.is_err(), "Unknown code should fail on its own");
}

/// # Summary
/// 上游不可达时整批失败。
#[tokio::test]
async fn test_unreachable_upstream_fails_whole_batch() {
    install_crypto();
    // 保留端口，不会有服务监听
    let provider = YahooProvider::with_base_url("http://127.0.0.1:9/chart").expect("build");
    let codes = vec![Code::new("AAPL").unwrap(), Code::new("MSFT").unwrap()];

    let result = provider.fetch_batch(&codes).await;
    assert!(result.is_err());
}

const DELISTED_BODY: &str = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
const QUOTE_BODY: &str = r#"{"chart":{"result":[{"meta":{"regularMarketPrice":105.0,"chartPreviousClose":100.0}}],"error":null}}"#;

/// # Summary
/// 模拟图表接口的 HTTP 桩服务。
///
/// # Logic
/// 1. 每个连接读完请求头后按请求路径应答。
/// 2. 路径包含 `DELISTED` 的代码返回 404 与接口错误体，其余返回一条报价。
async fn serve_chart() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/chart", listener.local_addr().expect("addr"));

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0_u8; 1024];
                while !String::from_utf8_lossy(&buf).contains("\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let (status, body) = if request.contains("DELISTED") {
                    ("404 Not Found", DELISTED_BODY)
                } else {
                    ("200 OK", QUOTE_BODY)
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.ok();
                socket.shutdown().await.ok();
            });
        }
    });
    url
}

/// # Summary
/// 上游对每个代码都返回 404 时按代码失败，而不是整批失败。
#[tokio::test]
async fn test_http_error_status_fails_per_code() {
    install_crypto();
    let provider = YahooProvider::with_base_url(&serve_chart().await).expect("build");
    let codes = vec![
        Code::new("DELISTED").unwrap(),
        Code::new("DELISTED2").unwrap(),
    ];

    let results = provider
        .fetch_batch(&codes)
        .await
        .expect("answered requests must not fail the batch");
    assert_eq!(results.len(), 2);
    for (code, result) in &results {
        match result {
            Err(MarketError::FetchFailed { code: failed, reason }) => {
                assert_eq!(failed, code.as_str());
                assert!(reason.contains("404"), "{}", reason);
            }
            other => panic!("expected FetchFailed for {}, got {:?}", code, other),
        }
    }
}

#[tokio::test]
async fn test_mixed_batch_reports_each_code() {
    install_crypto();
    let provider = YahooProvider::with_base_url(&serve_chart().await).expect("build");
    let codes = vec![Code::new("AAPL").unwrap(), Code::new("DELISTED").unwrap()];

    let results = provider.fetch_batch(&codes).await.expect("batch");
    assert_eq!(results[0].0.as_str(), "AAPL");
    let quote = results[0].1.as_ref().expect("AAPL quote");
    assert_eq!(quote.close, 105.0);
    assert_eq!(quote.change, 5.0);
    assert!(matches!(results[1].1, Err(MarketError::FetchFailed { .. })));
}
