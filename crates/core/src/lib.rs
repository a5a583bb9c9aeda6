//! tickwatch 领域核心：实体、端口 (Port) 与错误定义。
//!
//! 具体实现（SQLite 行源、Yahoo 行情、通知推送）分别位于各自的 crate 中，
//! 本 crate 只描述它们之间的契约。

pub mod common;
pub mod config;
pub mod market;
pub mod notify;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod test_utils;
