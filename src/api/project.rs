//! 项目管理接口 `/projects` `/tasks` `/teams` `/milestones`
//!
//! 与教材接口一样使用主/备地址；后端字段为 snake_case，
//! 项目名称字段叫 `name`，界面侧叫 `title`。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transport::ApiTransport;
use super::{de_id, de_opt_id, format_date, parse_date_lenient, unwrap_item, unwrap_list};
use crate::models::{
    AppError, Milestone, Priority, Project, ProjectStatus, Task, TaskStatus, Team,
};

type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// 后端 schema
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiProject {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, alias = "dueDate", alias = "deadline")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "teamId", alias = "team", deserialize_with = "de_opt_id")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiProjectPayload<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub status: &'static str,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<&'a str>,
    pub tags: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiTask {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(alias = "projectId", alias = "project", deserialize_with = "de_id")]
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "assignedTo", alias = "assigned_to", deserialize_with = "de_opt_id")]
    pub assignee: Option<String>,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiTaskPayload<'a> {
    pub project_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub status: &'static str,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMilestone {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(alias = "projectId", alias = "project", deserialize_with = "de_id")]
    pub project_id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<String>,
    #[serde(default, alias = "is_completed", alias = "isCompleted")]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMilestonePayload<'a> {
    pub project_id: &'a str,
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub completed: bool,
}

// ============================================================================
// 转换
// ============================================================================

pub fn project_status_from_api(raw: Option<&str>) -> ProjectStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("active" | "in_progress" | "in-progress") => ProjectStatus::Active,
        Some("on_hold" | "on-hold" | "paused") => ProjectStatus::OnHold,
        Some("completed" | "done" | "archived") => ProjectStatus::Completed,
        _ => ProjectStatus::Planning,
    }
}

pub fn project_status_to_api(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Planning => "planning",
        ProjectStatus::Active => "active",
        ProjectStatus::OnHold => "on_hold",
        ProjectStatus::Completed => "completed",
    }
}

pub fn task_status_from_api(raw: Option<&str>) -> TaskStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("in_progress" | "in-progress" | "doing") => TaskStatus::InProgress,
        Some("review" | "in_review") => TaskStatus::Review,
        Some("done" | "completed") => TaskStatus::Done,
        _ => TaskStatus::Todo,
    }
}

pub fn task_status_to_api(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Review => "review",
        TaskStatus::Done => "done",
    }
}

pub fn priority_from_api(raw: Option<&str>) -> Priority {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("low") => Priority::Low,
        Some("high") => Priority::High,
        Some("urgent" | "critical") => Priority::Urgent,
        _ => Priority::Medium,
    }
}

pub fn priority_to_api(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Urgent => "urgent",
    }
}

pub fn project_from_api(p: ApiProject) -> Project {
    Project {
        id: p.id,
        title: p.name,
        description: p.description.unwrap_or_default(),
        status: project_status_from_api(p.status.as_deref()),
        priority: priority_from_api(p.priority.as_deref()),
        start_date: parse_date_lenient(p.start_date.as_deref()),
        due_date: parse_date_lenient(p.due_date.as_deref()),
        progress: p.progress.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8,
        team_id: p.team_id,
        tags: p.tags.unwrap_or_default(),
    }
}

pub fn project_to_api(p: &Project) -> ApiProjectPayload<'_> {
    ApiProjectPayload {
        name: &p.title,
        description: &p.description,
        status: project_status_to_api(p.status),
        priority: priority_to_api(p.priority),
        start_date: format_date(p.start_date),
        due_date: format_date(p.due_date),
        progress: p.progress.min(100),
        team_id: p.team_id.as_deref(),
        tags: &p.tags,
    }
}

pub fn task_from_api(t: ApiTask) -> Task {
    Task {
        id: t.id,
        project_id: t.project_id,
        title: t.title,
        description: t.description.unwrap_or_default(),
        status: task_status_from_api(t.status.as_deref()),
        priority: priority_from_api(t.priority.as_deref()),
        assignee: t.assignee,
        due_date: parse_date_lenient(t.due_date.as_deref()),
    }
}

pub fn task_to_api(t: &Task) -> ApiTaskPayload<'_> {
    ApiTaskPayload {
        project_id: &t.project_id,
        title: &t.title,
        description: &t.description,
        status: task_status_to_api(t.status),
        priority: priority_to_api(t.priority),
        assigned_to: t.assignee.as_deref(),
        due_date: format_date(t.due_date),
    }
}

pub fn milestone_from_api(m: ApiMilestone) -> Milestone {
    Milestone {
        id: m.id,
        project_id: m.project_id,
        title: m.title,
        due_date: parse_date_lenient(m.due_date.as_deref()),
        completed: m.completed,
    }
}

pub fn milestone_to_api(m: &Milestone) -> ApiMilestonePayload<'_> {
    ApiMilestonePayload {
        project_id: &m.project_id,
        title: &m.title,
        due_date: format_date(m.due_date),
        completed: m.completed,
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::invalid_response(format!("{what}数据格式错误: {e}")))
}

// ============================================================================
// 客户端
// ============================================================================

pub struct ProjectApi {
    transport: ApiTransport,
}

impl ProjectApi {
    pub fn new(transport: ApiTransport) -> Self {
        Self { transport }
    }

    // ---------- projects ----------

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let value: Value = self.transport.get("projects").await?;
        let items: Vec<ApiProject> = decode(unwrap_list(value, "projects"), "项目列表")?;
        Ok(items.into_iter().map(project_from_api).collect())
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let value: Value = self.transport.get(&project_path(id)).await?;
        Ok(project_from_api(decode(unwrap_item(value, "project"), "项目")?))
    }

    pub async fn create_project(&self, project: &Project) -> Result<Project> {
        let value: Value = self
            .transport
            .post("projects", &project_to_api(project))
            .await?;
        Ok(project_from_api(decode(unwrap_item(value, "project"), "项目")?))
    }

    pub async fn update_project(&self, project: &Project) -> Result<Project> {
        let value: Value = self
            .transport
            .put(&project_path(&project.id), &project_to_api(project))
            .await?;
        Ok(project_from_api(decode(unwrap_item(value, "project"), "项目")?))
    }

    pub async fn delete_project(&self, id: &str) -> Result<()> {
        self.transport.delete(&project_path(id)).await?;
        Ok(())
    }

    // ---------- tasks ----------

    /// `project_id` 为空时返回全部任务
    pub async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>> {
        let path = match project_id {
            Some(pid) => format!("tasks?projectId={}", urlencoding::encode(pid)),
            None => "tasks".to_string(),
        };
        let value: Value = self.transport.get(&path).await?;
        let items: Vec<ApiTask> = decode(unwrap_list(value, "tasks"), "任务列表")?;
        Ok(items.into_iter().map(task_from_api).collect())
    }

    pub async fn create_task(&self, task: &Task) -> Result<Task> {
        let value: Value = self.transport.post("tasks", &task_to_api(task)).await?;
        Ok(task_from_api(decode(unwrap_item(value, "task"), "任务")?))
    }

    pub async fn update_task(&self, task: &Task) -> Result<Task> {
        let value: Value = self
            .transport
            .put(&task_path(&task.id), &task_to_api(task))
            .await?;
        Ok(task_from_api(decode(unwrap_item(value, "task"), "任务")?))
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.transport.delete(&task_path(id)).await?;
        Ok(())
    }

    // ---------- teams ----------

    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        let value: Value = self.transport.get("teams").await?;
        decode(unwrap_list(value, "teams"), "团队列表")
    }

    pub async fn create_team(&self, team: &Team) -> Result<Team> {
        let value: Value = self.transport.post("teams", team).await?;
        decode(unwrap_item(value, "team"), "团队")
    }

    pub async fn delete_team(&self, id: &str) -> Result<()> {
        self.transport
            .delete(&format!("teams/{}", urlencoding::encode(id)))
            .await?;
        Ok(())
    }

    // ---------- milestones ----------

    pub async fn list_milestones(&self, project_id: &str) -> Result<Vec<Milestone>> {
        let value: Value = self
            .transport
            .get(&format!(
                "milestones?projectId={}",
                urlencoding::encode(project_id)
            ))
            .await?;
        let items: Vec<ApiMilestone> = decode(unwrap_list(value, "milestones"), "里程碑列表")?;
        Ok(items.into_iter().map(milestone_from_api).collect())
    }

    pub async fn create_milestone(&self, milestone: &Milestone) -> Result<Milestone> {
        let value: Value = self
            .transport
            .post("milestones", &milestone_to_api(milestone))
            .await?;
        Ok(milestone_from_api(decode(
            unwrap_item(value, "milestone"),
            "里程碑",
        )?))
    }

    pub async fn update_milestone(&self, milestone: &Milestone) -> Result<Milestone> {
        let value: Value = self
            .transport
            .put(
                &format!("milestones/{}", urlencoding::encode(&milestone.id)),
                &milestone_to_api(milestone),
            )
            .await?;
        Ok(milestone_from_api(decode(
            unwrap_item(value, "milestone"),
            "里程碑",
        )?))
    }

    pub async fn delete_milestone(&self, id: &str) -> Result<()> {
        self.transport
            .delete(&format!("milestones/{}", urlencoding::encode(id)))
            .await?;
        Ok(())
    }
}

fn project_path(id: &str) -> String {
    format!("projects/{}", urlencoding::encode(id))
}

fn task_path(id: &str) -> String {
    format!("tasks/{}", urlencoding::encode(id))
}
