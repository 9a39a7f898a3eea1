//! 项目管理服务
//!
//! 项目、任务、团队、里程碑的内存状态，全部变更经 `ProjectApi`（带备用地址）。
//! 与教材不同，这里没有本地兜底：服务端失败时状态不变，错误写入 `error`。

use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::ErrorSlot;
use crate::api::ProjectApi;
use crate::models::{AppError, Milestone, Project, Task, TaskStatus, Team};

type Result<T> = std::result::Result<T, AppError>;

/// 看板列顺序
pub const BOARD_COLUMNS: [TaskStatus; 4] = [
    TaskStatus::Todo,
    TaskStatus::InProgress,
    TaskStatus::Review,
    TaskStatus::Done,
];

/// 按状态分组任务，空列也保留
pub fn group_tasks_by_status<'a, I>(tasks: I) -> BTreeMap<TaskStatus, Vec<Task>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut board: BTreeMap<TaskStatus, Vec<Task>> =
        BOARD_COLUMNS.iter().map(|s| (*s, Vec::new())).collect();
    for task in tasks {
        board.entry(task.status).or_default().push(task.clone());
    }
    board
}

/// 已完成任务占比（0-100，四舍五入）；没有任务时为 0
pub fn progress_from_tasks<'a, I>(tasks: I) -> u8
where
    I: IntoIterator<Item = &'a Task>,
{
    let (total, done) = tasks.into_iter().fold((0u32, 0u32), |(t, d), task| {
        (t + 1, d + u32::from(task.status == TaskStatus::Done))
    });
    if total == 0 {
        return 0;
    }
    ((f64::from(done) * 100.0 / f64::from(total)).round() as u8).min(100)
}

pub struct ProjectService {
    api: ProjectApi,
    projects: RwLock<Vec<Project>>,
    tasks: RwLock<Vec<Task>>,
    teams: RwLock<Vec<Team>>,
    milestones: RwLock<Vec<Milestone>>,
    error: ErrorSlot,
}

impl ProjectService {
    pub fn new(api: ProjectApi) -> Self {
        Self {
            api,
            projects: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
            teams: RwLock::new(Vec::new()),
            milestones: RwLock::new(Vec::new()),
            error: ErrorSlot::default(),
        }
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.projects.read().await.clone()
    }

    pub async fn project(&self, id: &str) -> Option<Project> {
        self.projects
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub async fn tasks(&self, project_id: Option<&str>) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| project_id.map_or(true, |pid| t.project_id == pid))
            .cloned()
            .collect()
    }

    pub async fn teams(&self) -> Vec<Team> {
        self.teams.read().await.clone()
    }

    pub async fn milestones(&self, project_id: &str) -> Vec<Milestone> {
        self.milestones
            .read()
            .await
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect()
    }

    pub async fn error(&self) -> Option<String> {
        self.error.get().await
    }

    pub async fn clear_error(&self) {
        self.error.clear().await;
    }

    /// 拉取项目、任务、团队；任一失败都保留已有状态并记录错误
    pub async fn load(&self) -> Result<()> {
        let projects = self.track(self.api.list_projects().await, "加载项目").await?;
        let tasks = self.track(self.api.list_tasks(None).await, "加载任务").await?;
        let teams = match self.api.list_teams().await {
            Ok(teams) => teams,
            Err(e) => {
                // 团队列表不影响看板
                warn!("加载团队失败: {}", e);
                self.teams.read().await.clone()
            }
        };

        info!(
            "项目数据已加载: {} 个项目, {} 个任务, {} 个团队",
            projects.len(),
            tasks.len(),
            teams.len()
        );
        *self.projects.write().await = projects;
        *self.tasks.write().await = tasks;
        *self.teams.write().await = teams;
        self.error.clear().await;
        Ok(())
    }

    // ========================================================================
    // 项目
    // ========================================================================

    pub async fn create_project(&self, draft: Project) -> Result<Project> {
        if draft.title.trim().is_empty() {
            return Err(AppError::validation("项目名称不能为空"));
        }
        let created = self
            .track(self.api.create_project(&draft).await, "创建项目")
            .await?;
        self.projects.write().await.push(created.clone());
        Ok(created)
    }

    pub async fn update_project(&self, project: Project) -> Result<Project> {
        self.ensure_project(&project.id).await?;
        let updated = self
            .track(self.api.update_project(&project).await, "更新项目")
            .await?;
        if let Some(slot) = self
            .projects
            .write()
            .await
            .iter_mut()
            .find(|p| p.id == project.id)
        {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// 删除项目及其本地缓存的任务和里程碑
    pub async fn delete_project(&self, id: &str) -> Result<()> {
        self.ensure_project(id).await?;
        self.track(self.api.delete_project(id).await, "删除项目")
            .await?;
        self.projects.write().await.retain(|p| p.id != id);
        self.tasks.write().await.retain(|t| t.project_id != id);
        self.milestones.write().await.retain(|m| m.project_id != id);
        Ok(())
    }

    /// 按任务完成度重算进度，只改内存状态
    pub async fn refresh_progress(&self, project_id: &str) -> Option<u8> {
        let progress = {
            let tasks = self.tasks.read().await;
            progress_from_tasks(tasks.iter().filter(|t| t.project_id == project_id))
        };
        let mut projects = self.projects.write().await;
        let project = projects.iter_mut().find(|p| p.id == project_id)?;
        project.progress = progress;
        Some(progress)
    }

    // ========================================================================
    // 任务
    // ========================================================================

    pub async fn task_board(&self, project_id: &str) -> BTreeMap<TaskStatus, Vec<Task>> {
        let tasks = self.tasks.read().await;
        group_tasks_by_status(tasks.iter().filter(|t| t.project_id == project_id))
    }

    pub async fn create_task(&self, draft: Task) -> Result<Task> {
        if draft.title.trim().is_empty() {
            return Err(AppError::validation("任务标题不能为空"));
        }
        self.ensure_project(&draft.project_id).await?;
        let created = self
            .track(self.api.create_task(&draft).await, "创建任务")
            .await?;
        self.tasks.write().await.push(created.clone());
        self.refresh_progress(&created.project_id).await;
        Ok(created)
    }

    pub async fn update_task(&self, task: Task) -> Result<Task> {
        if !self.tasks.read().await.iter().any(|t| t.id == task.id) {
            return Err(AppError::not_found(format!("任务不存在: {}", task.id)));
        }
        let updated = self
            .track(self.api.update_task(&task).await, "更新任务")
            .await?;
        if let Some(slot) = self
            .tasks
            .write()
            .await
            .iter_mut()
            .find(|t| t.id == task.id)
        {
            *slot = updated.clone();
        }
        self.refresh_progress(&updated.project_id).await;
        Ok(updated)
    }

    /// 看板拖拽：只改状态
    pub async fn move_task(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let mut task = self
            .tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("任务不存在: {id}")))?;
        if task.status == status {
            return Ok(task);
        }
        debug!("任务 {} 状态 {:?} -> {:?}", id, task.status, status);
        task.status = status;
        self.update_task(task).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let project_id = self
            .tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.project_id.clone())
            .ok_or_else(|| AppError::not_found(format!("任务不存在: {id}")))?;
        self.track(self.api.delete_task(id).await, "删除任务").await?;
        self.tasks.write().await.retain(|t| t.id != id);
        self.refresh_progress(&project_id).await;
        Ok(())
    }

    // ========================================================================
    // 团队
    // ========================================================================

    pub async fn create_team(&self, draft: Team) -> Result<Team> {
        if draft.name.trim().is_empty() {
            return Err(AppError::validation("团队名称不能为空"));
        }
        let created = self
            .track(self.api.create_team(&draft).await, "创建团队")
            .await?;
        self.teams.write().await.push(created.clone());
        Ok(created)
    }

    pub async fn delete_team(&self, id: &str) -> Result<()> {
        self.track(self.api.delete_team(id).await, "删除团队").await?;
        self.teams.write().await.retain(|t| t.id != id);
        let mut projects = self.projects.write().await;
        for project in projects.iter_mut() {
            if project.team_id.as_deref() == Some(id) {
                project.team_id = None;
            }
        }
        Ok(())
    }

    // ========================================================================
    // 里程碑
    // ========================================================================

    pub async fn load_milestones(&self, project_id: &str) -> Result<Vec<Milestone>> {
        let fetched = self
            .track(self.api.list_milestones(project_id).await, "加载里程碑")
            .await?;
        let mut milestones = self.milestones.write().await;
        milestones.retain(|m| m.project_id != project_id);
        milestones.extend(fetched.iter().cloned());
        Ok(fetched)
    }

    pub async fn create_milestone(&self, draft: Milestone) -> Result<Milestone> {
        if draft.title.trim().is_empty() {
            return Err(AppError::validation("里程碑标题不能为空"));
        }
        self.ensure_project(&draft.project_id).await?;
        let created = self
            .track(self.api.create_milestone(&draft).await, "创建里程碑")
            .await?;
        self.milestones.write().await.push(created.clone());
        Ok(created)
    }

    pub async fn toggle_milestone(&self, id: &str) -> Result<Milestone> {
        let mut milestone = self
            .milestones
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("里程碑不存在: {id}")))?;
        milestone.completed = !milestone.completed;
        let updated = self
            .track(self.api.update_milestone(&milestone).await, "更新里程碑")
            .await?;
        if let Some(slot) = self
            .milestones
            .write()
            .await
            .iter_mut()
            .find(|m| m.id == id)
        {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete_milestone(&self, id: &str) -> Result<()> {
        self.track(self.api.delete_milestone(id).await, "删除里程碑")
            .await?;
        self.milestones.write().await.retain(|m| m.id != id);
        Ok(())
    }

    // ========================================================================
    // 内部工具
    // ========================================================================

    async fn ensure_project(&self, id: &str) -> Result<()> {
        if self.projects.read().await.iter().any(|p| p.id == id) {
            Ok(())
        } else {
            Err(AppError::not_found(format!("项目不存在: {id}")))
        }
    }

    /// 失败时写入错误横幅并原样返回
    async fn track<T>(&self, result: Result<T>, action: &str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("{}失败: {}", action, e);
                self.error.set(format!("{}失败: {}", action, e.message)).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            project_id: "p1".into(),
            title: format!("task {id}"),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_board_keeps_empty_columns() {
        let tasks = vec![task("a", TaskStatus::Done), task("b", TaskStatus::Todo)];
        let board = group_tasks_by_status(&tasks);
        assert_eq!(board.len(), 4);
        assert_eq!(board[&TaskStatus::Done].len(), 1);
        assert!(board[&TaskStatus::Review].is_empty());
        assert_eq!(
            board.keys().copied().collect::<Vec<_>>(),
            BOARD_COLUMNS.to_vec()
        );
    }

    #[test]
    fn test_progress_from_tasks() {
        assert_eq!(progress_from_tasks(&Vec::<Task>::new()), 0);
        let tasks = vec![
            task("a", TaskStatus::Done),
            task("b", TaskStatus::InProgress),
            task("c", TaskStatus::Todo),
        ];
        assert_eq!(progress_from_tasks(&tasks), 33);
        let all_done = vec![task("a", TaskStatus::Done), task("b", TaskStatus::Done)];
        assert_eq!(progress_from_tasks(&all_done), 100);
    }
}
