//! 状态服务层
//!
//! 持有内存状态，调用 API 封装并把部分状态持久化到本地存储。
//! 所有服务端调用失败都降级为本地行为，失败原因记录在各服务的 `error` 中。

pub mod project_service;
pub mod reading_plan;
pub mod study_service;
pub mod textbook_service;
pub mod user_service;

pub use project_service::ProjectService;
pub use study_service::StudyService;
pub use textbook_service::TextbookService;
pub use user_service::UserService;

use serde::Serialize;

/// 一次变更在服务端侧的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "camelCase")]
pub enum RemoteStatus {
    /// 服务端已确认
    Synced,
    /// 未尝试（本地记录或无需同步）
    NotAttempted,
    /// 尝试失败，本地结果保留
    Failed(String),
}

impl RemoteStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, RemoteStatus::Synced)
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            RemoteStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// 乐观变更的结果：本地值 + 服务端同步状态，由调用方决定是否回滚
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub remote: RemoteStatus,
}

impl<T> Outcome<T> {
    pub fn new(value: T, remote: RemoteStatus) -> Self {
        Self { value, remote }
    }

    pub fn local(value: T) -> Self {
        Self::new(value, RemoteStatus::NotAttempted)
    }
}

/// 服务级错误提示（对应界面上可关闭的错误横幅）
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(tokio::sync::RwLock<Option<String>>);

impl ErrorSlot {
    pub(crate) async fn get(&self) -> Option<String> {
        self.0.read().await.clone()
    }

    pub(crate) async fn set(&self, message: impl Into<String>) {
        *self.0.write().await = Some(message.into());
    }

    pub(crate) async fn clear(&self) {
        *self.0.write().await = None;
    }
}
