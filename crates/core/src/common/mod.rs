use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod period;
pub mod time;

/// # Summary
/// 证券代码，系统中标识一只股票或指数的不透明值。
///
/// # Invariants
/// - 构造后不可变，相等性与哈希完全基于内部字符串。
/// - 内部字符串非空且不含首尾空白。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

impl Code {
    /// # Summary
    /// 由任意字符串构造代码。
    ///
    /// # Logic
    /// 1. 去除首尾空白。
    /// 2. 空串视为非法。
    ///
    /// # Arguments
    /// * `raw`: 原始代码文本，例如 `AAPL` 或 `0005.HK`。
    ///
    /// # Returns
    /// 合法则返回 `Code`，否则返回错误描述。
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("Code must not be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Code {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Code::new(s)
    }
}

impl TryFrom<String> for Code {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Code::new(value)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_code_trims_and_rejects_empty() {
        assert_eq!(Code::new("  AAPL ").map(|c| c.to_string()), Ok("AAPL".to_string()));
        assert!(Code::new("   ").is_err());
        assert!("".parse::<Code>().is_err());
    }

    #[test]
    fn test_code_value_equality() {
        let mut set = HashSet::new();
        assert!(set.insert(Code::new("MSFT").unwrap()));
        assert!(!set.insert("MSFT".parse::<Code>().unwrap()));
    }

    #[test]
    fn test_code_serde_as_plain_string() {
        let code = Code::new("^DJI").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"^DJI\"");
        let back: Code = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
        assert!(serde_json::from_str::<Code>("\" \"").is_err());
    }
}
