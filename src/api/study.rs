//! 学习追踪接口 `/subjects` `/logs` `/goals` `/events` `/analytics`
//!
//! 只走主地址。学习数据的界面结构与后端基本一致（驼峰 + snake_case 别名），
//! 不再单独定义后端 schema。

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::transport::ApiTransport;
use super::{unwrap_item, unwrap_list};
use crate::models::{AppError, StudyAnalytics, StudyEvent, StudyGoal, StudyLog, Subject};

type Result<T> = std::result::Result<T, AppError>;

/// 资源路径与响应包裹键
#[derive(Debug, Clone, Copy)]
pub struct Resource {
    pub path: &'static str,
    pub list_key: &'static str,
    pub item_key: &'static str,
}

pub const SUBJECTS: Resource = Resource {
    path: "subjects",
    list_key: "subjects",
    item_key: "subject",
};
pub const LOGS: Resource = Resource {
    path: "logs",
    list_key: "logs",
    item_key: "log",
};
pub const GOALS: Resource = Resource {
    path: "goals",
    list_key: "goals",
    item_key: "goal",
};
pub const EVENTS: Resource = Resource {
    path: "events",
    list_key: "events",
    item_key: "event",
};

pub struct StudyApi {
    transport: ApiTransport,
}

impl StudyApi {
    pub fn new(transport: ApiTransport) -> Self {
        Self {
            transport: transport.without_fallback(),
        }
    }

    pub async fn list<T: DeserializeOwned>(&self, res: Resource) -> Result<Vec<T>> {
        let value: Value = self.transport.get(res.path).await?;
        serde_json::from_value(unwrap_list(value, res.list_key)).map_err(|e| {
            AppError::invalid_response(format!("{} 列表格式错误: {e}", res.path))
        })
    }

    pub async fn create<T, B>(&self, res: Resource, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value: Value = self.transport.post(res.path, body).await?;
        decode_item(value, res)
    }

    pub async fn update<T, B>(&self, res: Resource, id: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value: Value = self
            .transport
            .put(&format!("{}/{}", res.path, urlencoding::encode(id)), body)
            .await?;
        decode_item(value, res)
    }

    pub async fn delete(&self, res: Resource, id: &str) -> Result<()> {
        self.transport
            .delete(&format!("{}/{}", res.path, urlencoding::encode(id)))
            .await?;
        Ok(())
    }

    pub async fn subjects(&self) -> Result<Vec<Subject>> {
        self.list(SUBJECTS).await
    }

    pub async fn logs(&self) -> Result<Vec<StudyLog>> {
        self.list(LOGS).await
    }

    pub async fn goals(&self) -> Result<Vec<StudyGoal>> {
        self.list(GOALS).await
    }

    pub async fn events(&self) -> Result<Vec<StudyEvent>> {
        self.list(EVENTS).await
    }

    pub async fn analytics(&self) -> Result<StudyAnalytics> {
        let value: Value = self.transport.get("analytics/summary").await?;
        serde_json::from_value(unwrap_item(value, "summary"))
            .map_err(|e| AppError::invalid_response(format!("统计数据格式错误: {e}")))
    }
}

fn decode_item<T: DeserializeOwned>(value: Value, res: Resource) -> Result<T> {
    serde_json::from_value(unwrap_item(value, res.item_key))
        .map_err(|e| AppError::invalid_response(format!("{} 数据格式错误: {e}", res.path)))
}
