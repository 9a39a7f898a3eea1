//! 教材接口 `/books`
//!
//! 后端使用 snake_case 字段与 `not_started` / `in_progress` 风格的状态值，
//! 界面侧统一为 [`TextbookRecord`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::transport::ApiTransport;
use super::{de_id, format_date, parse_date_lenient, unwrap_item, unwrap_list};
use crate::models::{AppError, LocalAugmentation, ReadingStatus, TextbookRecord};

type Result<T> = std::result::Result<T, AppError>;

const HEALTH_PATH: &str = "health";

/// 后端返回的教材结构
#[derive(Debug, Clone, Deserialize)]
pub struct ApiBook {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default, alias = "totalPages")]
    pub total_pages: Option<u32>,
    #[serde(default, alias = "currentPage")]
    pub current_page: Option<u32>,
    #[serde(default, alias = "targetDate")]
    pub target_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// 发往后端的教材结构（不含任何本地字段）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiBookPayload {
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub total_pages: u32,
    pub current_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    pub status: &'static str,
}

pub fn status_from_api(raw: Option<&str>, current_page: u32, total_pages: u32) -> ReadingStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("not_started" | "not-started" | "unread" | "todo") => ReadingStatus::NotStarted,
        Some("reading" | "in_progress" | "in-progress") => ReadingStatus::Reading,
        Some("completed" | "finished" | "done") => ReadingStatus::Completed,
        _ => ReadingStatus::from_progress(current_page, total_pages),
    }
}

pub fn status_to_api(status: ReadingStatus) -> &'static str {
    match status {
        ReadingStatus::NotStarted => "not_started",
        ReadingStatus::Reading => "reading",
        ReadingStatus::Completed => "completed",
    }
}

/// 后端 → 界面
pub fn transform_from_api(book: ApiBook) -> TextbookRecord {
    let total_pages = book.total_pages.unwrap_or(0);
    let current_page = book.current_page.unwrap_or(0);
    TextbookRecord {
        id: book.id.clone(),
        api_id: Some(book.id),
        title: book.title,
        author: book.author.unwrap_or_default(),
        publisher: book.publisher.unwrap_or_default(),
        total_pages,
        current_page,
        target_date: parse_date_lenient(book.target_date.as_deref()),
        status: status_from_api(book.status.as_deref(), current_page, total_pages),
        is_local_only: false,
        saving: false,
        local: LocalAugmentation::default(),
    }
}

/// 界面 → 后端
pub fn transform_to_api(record: &TextbookRecord) -> ApiBookPayload {
    ApiBookPayload {
        title: record.title.clone(),
        author: record.author.clone(),
        publisher: record.publisher.clone(),
        total_pages: record.total_pages,
        current_page: record.current_page,
        target_date: format_date(record.target_date),
        status: status_to_api(record.status),
    }
}

/// 教材服务端接口；对账服务只依赖该 trait
#[async_trait]
pub trait TextbookBackend: Send + Sync {
    /// 服务端是否可达
    async fn is_available(&self) -> bool;

    async fn list(&self) -> Result<Vec<TextbookRecord>>;

    async fn create(&self, record: &TextbookRecord) -> Result<TextbookRecord>;

    async fn update(&self, api_id: &str, record: &TextbookRecord) -> Result<TextbookRecord>;

    async fn delete(&self, api_id: &str) -> Result<()>;
}

pub struct TextbookApi {
    transport: ApiTransport,
}

impl TextbookApi {
    pub fn new(transport: ApiTransport) -> Self {
        Self { transport }
    }

    pub async fn get(&self, api_id: &str) -> Result<TextbookRecord> {
        let value: Value = self
            .transport
            .get(&format!("books/{}", urlencoding::encode(api_id)))
            .await?;
        parse_book(value)
    }
}

fn parse_book(value: Value) -> Result<TextbookRecord> {
    let book: ApiBook = serde_json::from_value(unwrap_item(value, "book"))
        .map_err(|e| AppError::invalid_response(format!("教材数据格式错误: {e}")))?;
    Ok(transform_from_api(book))
}

#[async_trait]
impl TextbookBackend for TextbookApi {
    async fn is_available(&self) -> bool {
        self.transport.is_reachable(HEALTH_PATH).await
    }

    async fn list(&self) -> Result<Vec<TextbookRecord>> {
        let value: Value = self.transport.get("books").await?;
        let books: Vec<ApiBook> = serde_json::from_value(unwrap_list(value, "books"))
            .map_err(|e| AppError::invalid_response(format!("教材列表格式错误: {e}")))?;
        debug!("服务端返回 {} 本教材", books.len());
        Ok(books.into_iter().map(transform_from_api).collect())
    }

    async fn create(&self, record: &TextbookRecord) -> Result<TextbookRecord> {
        let value: Value = self
            .transport
            .post("books", &transform_to_api(record))
            .await?;
        parse_book(value)
    }

    async fn update(&self, api_id: &str, record: &TextbookRecord) -> Result<TextbookRecord> {
        let value: Value = self
            .transport
            .put(
                &format!("books/{}", urlencoding::encode(api_id)),
                &transform_to_api(record),
            )
            .await?;
        // 部分后端 PUT 只返回 `{ success: true }`
        match parse_book(value) {
            Ok(updated) => Ok(updated),
            Err(_) => {
                let mut echoed = record.clone();
                echoed.api_id = Some(api_id.to_string());
                Ok(echoed)
            }
        }
    }

    async fn delete(&self, api_id: &str) -> Result<()> {
        self.transport
            .delete(&format!("books/{}", urlencoding::encode(api_id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_transform_from_api_snake_case() {
        let book: ApiBook = serde_json::from_value(json!({
            "_id": "65f0c2",
            "title": "Operating Systems",
            "author": "Tanenbaum",
            "total_pages": 800,
            "current_page": 120,
            "target_date": "2024-06-30T00:00:00.000Z",
            "status": "in_progress"
        }))
        .unwrap();
        let rec = transform_from_api(book);
        assert_eq!(rec.id, "65f0c2");
        assert_eq!(rec.api_id.as_deref(), Some("65f0c2"));
        assert_eq!(rec.status, ReadingStatus::Reading);
        assert_eq!(rec.target_date, NaiveDate::from_ymd_opt(2024, 6, 30));
        assert_eq!(rec.publisher, "");
        assert!(!rec.is_local_only);
    }

    #[test]
    fn test_transform_from_api_camel_case_numeric_id() {
        let book: ApiBook = serde_json::from_value(json!({
            "id": 7,
            "title": "Networks",
            "totalPages": 100,
            "currentPage": 100
        }))
        .unwrap();
        let rec = transform_from_api(book);
        assert_eq!(rec.id, "7");
        // 缺少状态时按进度推导
        assert_eq!(rec.status, ReadingStatus::Completed);
    }

    #[test]
    fn test_transform_to_api_excludes_local_fields() {
        let mut rec = transform_from_api(
            serde_json::from_value(json!({"id": "1", "title": "Algebra"})).unwrap(),
        );
        rec.local.notes = "private".into();
        rec.target_date = NaiveDate::from_ymd_opt(2025, 1, 2);
        let payload = serde_json::to_value(transform_to_api(&rec)).unwrap();
        assert_eq!(payload["target_date"], "2025-01-02");
        assert_eq!(payload["status"], "not_started");
        assert!(payload.get("notes").is_none());
        assert!(payload.get("local").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_from_api(Some("finished"), 0, 0), ReadingStatus::Completed);
        assert_eq!(status_from_api(Some("weird"), 3, 10), ReadingStatus::Reading);
        assert_eq!(status_to_api(ReadingStatus::NotStarted), "not_started");
    }
}
