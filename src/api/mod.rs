//! REST API 客户端
//!
//! - `transport`：JSON 编解码、Bearer 认证、主/备地址重试
//! - `auth` / `project` / `study` / `textbook`：按资源划分的薄封装，
//!   负责后端 schema 与界面 schema 之间的转换

pub mod auth;
pub mod project;
pub mod study;
pub mod textbook;
pub mod tokens;
pub mod transport;

pub use auth::AuthApi;
pub use project::ProjectApi;
pub use study::StudyApi;
pub use textbook::{TextbookApi, TextbookBackend};
pub use tokens::TokenStore;
pub use transport::ApiTransport;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 服务端 ID 可能是字符串也可能是数字
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id 必须是字符串或数字，实际为 {other}"
        ))),
    }
}

pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "id 必须是字符串或数字，实际为 {other}"
        ))),
    }
}

/// 接受 `YYYY-MM-DD` 或 RFC3339 时间戳，无法解析时返回 `None`
pub(crate) fn parse_date_lenient(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

pub(crate) fn de_date_lenient<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date_lenient(Some(&raw))
        .ok_or_else(|| serde::de::Error::custom(format!("无法解析日期: {raw}")))
}

pub(crate) fn de_opt_date_lenient<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(parse_date_lenient(raw.as_deref()))
}

pub(crate) fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

/// 列表接口可能直接返回数组，也可能包在 `{ "<key>": [...] }` 里
pub(crate) fn unwrap_list(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) => map.remove(key).unwrap_or(Value::Array(Vec::new())),
        other => other,
    }
}

/// 单条资源接口可能包在 `{ "<key>": {...} }` 里
pub(crate) fn unwrap_item(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct WithId {
        #[serde(deserialize_with = "de_id")]
        id: String,
    }

    #[test]
    fn test_de_id_accepts_numbers_and_strings() {
        let a: WithId = serde_json::from_value(json!({"id": 42})).unwrap();
        assert_eq!(a.id, "42");
        let b: WithId = serde_json::from_value(json!({"id": "abc"})).unwrap();
        assert_eq!(b.id, "abc");
        assert!(serde_json::from_value::<WithId>(json!({"id": [1]})).is_err());
    }

    #[test]
    fn test_parse_date_lenient() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date_lenient(Some("2024-03-09")), Some(d));
        assert_eq!(parse_date_lenient(Some("2024-03-09T10:00:00Z")), Some(d));
        assert_eq!(parse_date_lenient(Some("2024-03-09T10:00:00.000")), Some(d));
        assert_eq!(parse_date_lenient(Some("")), None);
        assert_eq!(parse_date_lenient(Some("soon")), None);
        assert_eq!(parse_date_lenient(None), None);
    }

    #[test]
    fn test_unwrap_helpers() {
        assert_eq!(unwrap_list(json!({"books": [1]}), "books"), json!([1]));
        assert_eq!(unwrap_list(json!([2]), "books"), json!([2]));
        assert_eq!(unwrap_list(json!({}), "books"), json!([]));
        assert_eq!(unwrap_item(json!({"book": {"id": 1}}), "book"), json!({"id": 1}));
        assert_eq!(unwrap_item(json!({"id": 1}), "book"), json!({"id": 1}));
    }
}
