use async_trait::async_trait;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tickwatch_core::common::Code;
use tickwatch_core::market::entity::DailyRow;
use tickwatch_core::store::error::StoreError;
use tickwatch_core::store::port::{DailyRowStore, DailyRowStream};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// DailyRowStore 的 SQLite 实现，读取外部维护的日线库。
///
/// # Summary
/// 库中包含两张表：
/// * `symbols(symbol TEXT, name TEXT)`：代码与名称。
/// * `daily(symbol TEXT, date INTEGER, open REAL, high REAL, low REAL, close REAL, volume INTEGER)`：日线。
///
/// # Invariants
/// * 只读打开，库文件不存在时返回 `StoreError::Connection` 而不是新建空库。
/// * 连接池在首次访问时建立并缓存。
pub struct SqliteDailyStore {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteDailyStore {
    /// 创建指向 `db_path` 的存储实例，此时不建立连接。
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            pool: OnceCell::new(),
        }
    }

    /// 使用存储层默认路径 (`<root>/db/data.db`) 创建实例。
    pub fn open_default() -> Self {
        Self::new(crate::config::default_db_path())
    }

    /// 获取或初始化连接池。
    ///
    /// # Logic
    /// 1. 以只读方式配置连接选项。
    /// 2. 首次调用时建立连接池，失败映射为 `StoreError::Connection`。
    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                let options = SqliteConnectOptions::new()
                    .filename(&self.db_path)
                    .read_only(true)
                    .create_if_missing(false);
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                info!("Opened daily store at {}", self.db_path.display());
                Ok::<_, StoreError>(pool)
            })
            .await?;
        Ok(pool.clone())
    }
}

/// 解析单行；任何字段类型不符都视为该行损坏。
fn decode_row(row: &SqliteRow) -> Result<DailyRow, StoreError> {
    let malformed = |e: sqlx::Error| StoreError::MalformedRow(e.to_string());
    Ok(DailyRow {
        date: row.try_get::<i64, _>("date").map_err(malformed)?,
        open: row.try_get::<f64, _>("open").map_err(malformed)?,
        high: row.try_get::<f64, _>("high").map_err(malformed)?,
        low: row.try_get::<f64, _>("low").map_err(malformed)?,
        close: row.try_get::<f64, _>("close").map_err(malformed)?,
        volume: row.try_get::<i64, _>("volume").map_err(malformed)?,
    })
}

#[async_trait]
impl DailyRowStore for SqliteDailyStore {
    /// # Summary
    /// 查询 `symbols` 表中的名称。
    ///
    /// # Arguments
    /// * `code` - 证券代码。
    ///
    /// # Returns
    /// * `Result<Option<String>, StoreError>`
    async fn display_name(&self, code: &Code) -> Result<Option<String>, StoreError> {
        let pool = self.pool().await?;
        sqlx::query_scalar::<_, String>("SELECT name FROM symbols WHERE symbol = ? LIMIT 1")
            .bind(code.as_str())
            .fetch_optional(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// # Summary
    /// 以流的形式读取日线。
    ///
    /// # Logic
    /// 1. 获取连接池（连接失败直接返回错误）。
    /// 2. 在流内部执行按日期升序的查询，逐行解析产出。
    /// 3. 查询本身失败时产出一次 `StoreError::Database` 并结束流。
    ///
    /// # Arguments
    /// * `code` - 证券代码。
    ///
    /// # Returns
    /// * `Result<DailyRowStream, StoreError>`
    async fn daily_rows(&self, code: &Code) -> Result<DailyRowStream, StoreError> {
        let pool = self.pool().await?;
        let symbol = code.to_string();
        debug!("Streaming daily rows for {}", symbol);

        let stream = async_stream::stream! {
            let mut rows = sqlx::query(
                "SELECT date, open, high, low, close, volume FROM daily WHERE symbol = ? ORDER BY date ASC",
            )
            .bind(symbol.as_str())
            .fetch(&pool);

            while let Some(row) = rows.next().await {
                match row {
                    Ok(row) => yield decode_row(&row),
                    Err(e) => {
                        yield Err(StoreError::Database(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
