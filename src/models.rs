use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// 结构化错误处理
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppErrorType {
    Validation,
    NotFound,
    Configuration,
    /// 连接失败、DNS、超时等传输层错误
    Network,
    /// 服务端返回非 2xx
    HttpStatus,
    /// 响应体不是 JSON（含 HTML 错误页）
    InvalidResponse,
    /// 本地持久化读写失败
    Storage,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error_type: AppErrorType,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(error_type: AppErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_type: AppErrorType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::NotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Configuration, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Network, message)
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::with_details(
            AppErrorType::HttpStatus,
            message,
            serde_json::json!({ "status": status }),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::InvalidResponse, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Storage, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Unknown, message)
    }

    /// HTTP 状态码（仅 `HttpStatus` 类型携带）
    pub fn status_code(&self) -> Option<u16> {
        self.details
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u16)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.error_type == AppErrorType::HttpStatus && self.status_code() == Some(401)
    }
}

// 为AppError实现From trait以支持自动转换
impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::validation(message)
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::validation(message.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::unknown(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::validation(format!("JSON序列化错误: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::storage(format!("文件系统错误: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::network(format!("网络请求失败: {}", err))
    }
}

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        AppError::configuration(format!("配置加载失败: {}", err))
    }
}

// ============================================================================
// 用户与认证
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "avatar_url")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// 持久化于 `slacko_tokens` 的令牌对
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

// ============================================================================
// 项目管理
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    OnHold,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(alias = "user_id")]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(alias = "_id", deserialize_with = "crate::api::de_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
}

// ============================================================================
// 学习追踪
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(alias = "_id", deserialize_with = "crate::api::de_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    /// 每周目标学习时长（分钟）
    #[serde(default, alias = "weekly_target_minutes")]
    pub weekly_target_minutes: u32,
    /// 服务端创建失败，仅存在于本地
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_local_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyLog {
    #[serde(alias = "_id", deserialize_with = "crate::api::de_id")]
    pub id: String,
    #[serde(alias = "subject_id", deserialize_with = "crate::api::de_id")]
    pub subject_id: String,
    #[serde(deserialize_with = "crate::api::de_date_lenient")]
    pub date: NaiveDate,
    #[serde(alias = "duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub notes: String,
    /// 服务端创建失败，仅存在于本地
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_local_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudyGoal {
    #[serde(alias = "_id", deserialize_with = "crate::api::de_id")]
    pub id: String,
    pub title: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "subject_id",
        deserialize_with = "crate::api::de_opt_id"
    )]
    pub subject_id: Option<String>,
    #[serde(default, alias = "target_minutes")]
    pub target_minutes: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::api::de_opt_date_lenient"
    )]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    /// 服务端创建失败，仅存在于本地
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_local_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Study,
    Exam,
    Deadline,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyEvent {
    #[serde(alias = "_id", deserialize_with = "crate::api::de_id")]
    pub id: String,
    pub title: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "subject_id",
        deserialize_with = "crate::api::de_opt_id"
    )]
    pub subject_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub kind: EventKind,
    /// 服务端创建失败，仅存在于本地
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_local_only: bool,
}

/// 学习统计（`/analytics` 或本地日志推导）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudyAnalytics {
    #[serde(alias = "total_minutes")]
    pub total_minutes: u64,
    #[serde(default, alias = "minutes_by_subject")]
    pub minutes_by_subject: BTreeMap<String, u64>,
    #[serde(default, alias = "current_streak_days")]
    pub current_streak_days: u32,
    #[serde(default)]
    pub sessions: usize,
}

// ============================================================================
// 教材阅读
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingStatus {
    #[default]
    NotStarted,
    Reading,
    Completed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::NotStarted => "not-started",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Completed => "completed",
        }
    }

    /// 根据页码推导阅读状态
    pub fn from_progress(current_page: u32, total_pages: u32) -> Self {
        if total_pages > 0 && current_page >= total_pages {
            ReadingStatus::Completed
        } else if current_page > 0 {
            ReadingStatus::Reading
        } else {
            ReadingStatus::NotStarted
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 附件引用（文件本体不入库，只记录位置）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachedFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    /// 本地路径或 blob URL
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEntry {
    pub date: NaiveDate,
    pub from_page: u32,
    pub to_page: u32,
    #[serde(default)]
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub date: NaiveDate,
    pub start_page: u32,
    pub end_page: u32,
    #[serde(default)]
    pub done: bool,
}

/// 只保存在本地的教材附加字段，以 `book_local_<id>` 为键存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalAugmentation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<AttachedFile>,
    pub notes: String,
    pub reading_history: Vec<ReadingEntry>,
    pub study_plan: Vec<PlanItem>,
}

impl LocalAugmentation {
    pub fn is_empty(&self) -> bool {
        self.file.is_none()
            && self.notes.is_empty()
            && self.reading_history.is_empty()
            && self.study_plan.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextbookRecord {
    /// 已同步时等于 `api_id`，离线创建时为本地临时数字 ID
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: ReadingStatus,
    #[serde(default)]
    pub is_local_only: bool,
    /// 乐观占位标记，仅存在于内存
    #[serde(skip)]
    pub saving: bool,
    #[serde(default)]
    pub local: LocalAugmentation,
}

impl TextbookRecord {
    /// 对账使用的标识：优先服务端 ID
    pub fn resolved_id(&self) -> &str {
        self.api_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_server_backed(&self) -> bool {
        self.api_id.is_some() && !self.is_local_only
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.api_id.as_deref() == Some(id)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        let current = self.current_page.min(self.total_pages) as f64;
        (current / self.total_pages as f64 * 1000.0).round() / 10.0
    }
}

/// 新建教材的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TextbookDraft {
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub target_date: Option<NaiveDate>,
    pub status: Option<ReadingStatus>,
    pub local: LocalAugmentation,
}

impl TextbookDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("教材标题不能为空".into());
        }
        if self.total_pages > 0 && self.current_page > self.total_pages {
            return Err(format!(
                "当前页 {} 超出总页数 {}",
                self.current_page, self.total_pages
            ));
        }
        Ok(())
    }

    /// 构造带临时 ID 的本地记录
    pub fn into_record(self, id: String) -> TextbookRecord {
        let status = self
            .status
            .unwrap_or_else(|| ReadingStatus::from_progress(self.current_page, self.total_pages));
        TextbookRecord {
            id,
            api_id: None,
            title: self.title.trim().to_string(),
            author: self.author,
            publisher: self.publisher,
            total_pages: self.total_pages,
            current_page: self.current_page,
            target_date: self.target_date,
            status,
            is_local_only: false,
            saving: false,
            local: self.local,
        }
    }
}

/// 教材更新补丁；`None` 表示不修改
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextbookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub total_pages: Option<u32>,
    pub current_page: Option<u32>,
    pub target_date: Option<Option<NaiveDate>>,
    pub status: Option<ReadingStatus>,
    pub file: Option<Option<AttachedFile>>,
    pub notes: Option<String>,
    pub reading_history: Option<Vec<ReadingEntry>>,
    pub study_plan: Option<Vec<PlanItem>>,
}

impl TextbookPatch {
    pub fn apply_to(&self, record: &mut TextbookRecord) {
        if let Some(title) = &self.title {
            record.title = title.trim().to_string();
        }
        if let Some(author) = &self.author {
            record.author = author.clone();
        }
        if let Some(publisher) = &self.publisher {
            record.publisher = publisher.clone();
        }
        if let Some(total) = self.total_pages {
            record.total_pages = total;
        }
        if let Some(current) = self.current_page {
            record.current_page = current;
        }
        if let Some(target) = self.target_date {
            record.target_date = target;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        self.apply_local(&mut record.local);
    }

    /// 仅合并本地字段（文件、笔记、阅读历史、计划）
    pub fn apply_local(&self, local: &mut LocalAugmentation) {
        if let Some(file) = &self.file {
            local.file = file.clone();
        }
        if let Some(notes) = &self.notes {
            local.notes = notes.clone();
        }
        if let Some(history) = &self.reading_history {
            local.reading_history = history.clone();
        }
        if let Some(plan) = &self.study_plan {
            local.study_plan = plan.clone();
        }
    }
}
