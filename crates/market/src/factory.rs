use crate::error::MonitorError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tickwatch_core::market::error::MarketError;
use tickwatch_core::market::port::RealTimeSource;
use tracing::info;

/// 实时数据源的构造函数。
pub type SourceFactory =
    Box<dyn Fn() -> Result<Arc<dyn RealTimeSource>, MarketError> + Send + Sync>;

/// # Summary
/// 数据源标识到构造函数的显式映射表。
///
/// # Invariants
/// - 由启动代码显式填充，没有任何全局或反射式注册。
/// - 同一标识后注册的构造函数覆盖先注册的。
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn RealTimeSource>, MarketError> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    /// 链式注册。
    pub fn with<F>(mut self, id: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn RealTimeSource>, MarketError> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    /// # Summary
    /// 按标识构造数据源。
    ///
    /// # Returns
    /// 未注册返回 `UnknownSource`，构造失败返回 `Source`。
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn RealTimeSource>, MonitorError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| MonitorError::UnknownSource(id.to_string()))?;
        let source = factory()?;
        info!("Realtime source {} resolved", id);
        Ok(source)
    }

    /// 已注册的标识，按字典序。
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
