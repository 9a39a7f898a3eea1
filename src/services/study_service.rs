//! 学习追踪服务
//!
//! 科目、学习日志、目标、日程四类数据以本地存储为准（`studySubjects` 等键），
//! 服务端同步尽力而为。统计优先取 `/analytics/summary`，不可用时由本地日志推导。

use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ErrorSlot, Outcome, RemoteStatus};
use crate::api::study::{self, Resource};
use crate::api::StudyApi;
use crate::local_storage::{self, keys, LocalStorage};
use crate::models::{AppError, StudyAnalytics, StudyEvent, StudyGoal, StudyLog, Subject};

type Result<T> = std::result::Result<T, AppError>;

/// 可按 id 同步的学习数据
pub trait StudyItem: Clone + Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    /// 服务端创建失败、只存在于本地
    fn is_local_only(&self) -> bool;
    fn set_local_only(&mut self, local_only: bool);
}

macro_rules! impl_study_item {
    ($($ty:ty),*) => {
        $(impl StudyItem for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn is_local_only(&self) -> bool {
                self.is_local_only
            }

            fn set_local_only(&mut self, local_only: bool) {
                self.is_local_only = local_only;
            }
        })*
    };
}

impl_study_item!(Subject, StudyLog, StudyGoal, StudyEvent);

/// 单个存储键 + 对应后端资源
struct Collection<T> {
    key: &'static str,
    resource: Resource,
    items: RwLock<Vec<T>>,
}

impl<T: StudyItem> Collection<T> {
    fn new(key: &'static str, resource: Resource) -> Self {
        Self {
            key,
            resource,
            items: RwLock::new(Vec::new()),
        }
    }

    async fn snapshot(&self) -> Vec<T> {
        self.items.read().await.clone()
    }

    fn persist(&self, storage: &dyn LocalStorage, items: &[T]) {
        if let Err(e) = local_storage::set_json(storage, self.key, items) {
            warn!("写入本地存储 {} 失败: {}", self.key, e);
        }
    }
}

pub struct StudyService {
    api: StudyApi,
    storage: Arc<dyn LocalStorage>,
    subjects: Collection<Subject>,
    logs: Collection<StudyLog>,
    goals: Collection<StudyGoal>,
    events: Collection<StudyEvent>,
    error: ErrorSlot,
}

impl StudyService {
    pub fn new(api: StudyApi, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            api,
            storage,
            subjects: Collection::new(keys::STUDY_SUBJECTS, study::SUBJECTS),
            logs: Collection::new(keys::STUDY_LOGS, study::LOGS),
            goals: Collection::new(keys::STUDY_GOALS, study::GOALS),
            events: Collection::new(keys::STUDY_EVENTS, study::EVENTS),
            error: ErrorSlot::default(),
        }
    }

    pub async fn subjects(&self) -> Vec<Subject> {
        self.subjects.snapshot().await
    }

    pub async fn logs(&self) -> Vec<StudyLog> {
        self.logs.snapshot().await
    }

    pub async fn goals(&self) -> Vec<StudyGoal> {
        self.goals.snapshot().await
    }

    pub async fn events(&self) -> Vec<StudyEvent> {
        self.events.snapshot().await
    }

    pub async fn error(&self) -> Option<String> {
        self.error.get().await
    }

    pub async fn clear_error(&self) {
        self.error.clear().await;
    }

    /// 先读本地，再用服务端列表覆盖；服务端失败时保留本地数据
    pub async fn load(&self) -> RemoteStatus {
        self.load_local(&self.subjects).await;
        self.load_local(&self.logs).await;
        self.load_local(&self.goals).await;
        self.load_local(&self.events).await;

        let results = [
            self.load_remote(&self.subjects).await,
            self.load_remote(&self.logs).await,
            self.load_remote(&self.goals).await,
            self.load_remote(&self.events).await,
        ];
        let failures: Vec<String> = results.into_iter().filter_map(|r| r.err()).collect();
        if failures.is_empty() {
            self.error.clear().await;
            RemoteStatus::Synced
        } else {
            let reason = failures.join("; ");
            warn!("学习数据同步失败，使用本地数据: {}", reason);
            self.error
                .set(format!("无法连接服务器，正在使用本地数据: {reason}"))
                .await;
            RemoteStatus::Failed(reason)
        }
    }

    // ========================================================================
    // 科目
    // ========================================================================

    pub async fn add_subject(&self, subject: Subject) -> Result<Outcome<Subject>> {
        if subject.name.trim().is_empty() {
            return Err(AppError::validation("科目名称不能为空"));
        }
        Ok(self.insert(&self.subjects, subject).await)
    }

    pub async fn update_subject(&self, subject: Subject) -> Result<Outcome<Subject>> {
        self.replace(&self.subjects, subject).await
    }

    /// 删除科目时一并删除其学习日志
    pub async fn remove_subject(&self, id: &str) -> Result<Outcome<()>> {
        let outcome = self.remove(&self.subjects, id).await?;
        let orphaned: Vec<String> = self
            .logs
            .snapshot()
            .await
            .into_iter()
            .filter(|l| l.subject_id == id)
            .map(|l| l.id)
            .collect();
        for log_id in orphaned {
            self.remove(&self.logs, &log_id).await?;
        }
        Ok(outcome)
    }

    // ========================================================================
    // 学习日志
    // ========================================================================

    pub async fn log_session(&self, log: StudyLog) -> Result<Outcome<StudyLog>> {
        if log.duration_minutes == 0 {
            return Err(AppError::validation("学习时长必须大于 0"));
        }
        if !self.subjects.items.read().await.iter().any(|s| s.id == log.subject_id) {
            return Err(AppError::not_found(format!("科目不存在: {}", log.subject_id)));
        }
        Ok(self.insert(&self.logs, log).await)
    }

    pub async fn delete_log(&self, id: &str) -> Result<Outcome<()>> {
        self.remove(&self.logs, id).await
    }

    // ========================================================================
    // 目标
    // ========================================================================

    pub async fn add_goal(&self, goal: StudyGoal) -> Result<Outcome<StudyGoal>> {
        if goal.title.trim().is_empty() {
            return Err(AppError::validation("目标标题不能为空"));
        }
        Ok(self.insert(&self.goals, goal).await)
    }

    pub async fn set_goal_completed(&self, id: &str, completed: bool) -> Result<Outcome<StudyGoal>> {
        let mut goal = self.find(&self.goals, id).await?;
        goal.completed = completed;
        self.replace(&self.goals, goal).await
    }

    pub async fn delete_goal(&self, id: &str) -> Result<Outcome<()>> {
        self.remove(&self.goals, id).await
    }

    /// 目标已投入的分钟数（按科目过滤日志；不限科目时统计全部）
    pub async fn goal_minutes(&self, goal: &StudyGoal) -> u64 {
        self.logs
            .items
            .read()
            .await
            .iter()
            .filter(|l| goal.subject_id.as_deref().map_or(true, |s| s == l.subject_id))
            .filter(|l| goal.deadline.map_or(true, |d| l.date <= d))
            .map(|l| u64::from(l.duration_minutes))
            .sum()
    }

    // ========================================================================
    // 日程
    // ========================================================================

    pub async fn add_event(&self, event: StudyEvent) -> Result<Outcome<StudyEvent>> {
        if event.title.trim().is_empty() {
            return Err(AppError::validation("日程标题不能为空"));
        }
        if event.end < event.start {
            return Err(AppError::validation("结束时间不能早于开始时间"));
        }
        Ok(self.insert(&self.events, event).await)
    }

    pub async fn delete_event(&self, id: &str) -> Result<Outcome<()>> {
        self.remove(&self.events, id).await
    }

    /// 与 `[from, to]` 日期区间有交集的日程，按开始时间排序
    pub async fn events_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<StudyEvent> {
        let mut hits: Vec<StudyEvent> = self
            .events
            .items
            .read()
            .await
            .iter()
            .filter(|e| e.start.date_naive() <= to && e.end.date_naive() >= from)
            .cloned()
            .collect();
        hits.sort_by_key(|e| e.start);
        hits
    }

    // ========================================================================
    // 统计
    // ========================================================================

    pub async fn analytics(&self, today: NaiveDate) -> Outcome<StudyAnalytics> {
        match self.api.analytics().await {
            Ok(summary) => Outcome::new(summary, RemoteStatus::Synced),
            Err(e) => {
                debug!("统计接口不可用，改用本地日志计算: {}", e);
                let logs = self.logs.items.read().await;
                Outcome::new(
                    compute_analytics(&logs, today),
                    RemoteStatus::Failed(e.message),
                )
            }
        }
    }

    // ========================================================================
    // 通用集合操作
    // ========================================================================

    async fn load_local<T: StudyItem>(&self, coll: &Collection<T>) {
        let stored: Vec<T> =
            local_storage::get_json_lenient(self.storage.as_ref(), coll.key).unwrap_or_default();
        *coll.items.write().await = stored;
    }

    /// 服务端列表在前，未同步的本地条目（id 不在服务端列表中）追加在后
    async fn load_remote<T: StudyItem>(&self, coll: &Collection<T>) -> std::result::Result<(), String> {
        let server_items = match self.api.list::<T>(coll.resource).await {
            Ok(items) => items,
            Err(e) => return Err(format!("{}: {}", coll.resource.path, e.message)),
        };
        debug!("{} 从服务端加载 {} 条", coll.key, server_items.len());

        let mut items = coll.items.write().await;
        let seen: HashSet<String> = server_items.iter().map(|i| i.id().to_string()).collect();
        let pending: Vec<T> = items
            .iter()
            .filter(|i| i.is_local_only() && !seen.contains(i.id()))
            .cloned()
            .collect();
        if !pending.is_empty() {
            info!("{} 保留 {} 条未同步的本地数据", coll.key, pending.len());
        }
        let mut merged = server_items;
        merged.extend(pending);
        coll.persist(self.storage.as_ref(), &merged);
        *items = merged;
        Ok(())
    }

    async fn find<T: StudyItem>(&self, coll: &Collection<T>, id: &str) -> Result<T> {
        coll.items
            .read()
            .await
            .iter()
            .find(|item| item.id() == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("{} 中不存在 {id}", coll.key)))
    }

    /// 本地先落盘，再尝试服务端创建；成功则换成服务端 id
    async fn insert<T: StudyItem>(&self, coll: &Collection<T>, mut item: T) -> Outcome<T> {
        if item.id().is_empty() {
            item.set_id(uuid::Uuid::new_v4().to_string());
        }
        item.set_local_only(false);
        let local_id = item.id().to_string();
        self.commit(coll, |items| items.push(item.clone())).await;

        match self.api.create::<T, T>(coll.resource, &item).await {
            Ok(saved) => {
                info!("{} 已同步: {} -> {}", coll.key, local_id, saved.id());
                let value = saved.clone();
                self.commit(coll, |items| {
                    if let Some(slot) = items.iter_mut().find(|i| i.id() == local_id) {
                        *slot = saved;
                    }
                })
                .await;
                Outcome::new(value, RemoteStatus::Synced)
            }
            Err(e) => {
                warn!("{} 同步失败，仅保存在本地: {}", coll.key, e);
                self.error
                    .set(format!("已保存到本地，同步服务器失败: {}", e.message))
                    .await;
                item.set_local_only(true);
                let stored = item.clone();
                self.commit(coll, |items| {
                    if let Some(slot) = items.iter_mut().find(|i| i.id() == local_id) {
                        *slot = stored;
                    }
                })
                .await;
                Outcome::new(item, RemoteStatus::Failed(e.message))
            }
        }
    }

    async fn replace<T: StudyItem>(&self, coll: &Collection<T>, mut item: T) -> Result<Outcome<T>> {
        let existing = self.find(coll, item.id()).await?;
        item.set_local_only(existing.is_local_only());
        let id = item.id().to_string();
        let stored = item.clone();
        self.commit(coll, |items| {
            if let Some(slot) = items.iter_mut().find(|i| i.id() == id) {
                *slot = stored;
            }
        })
        .await;

        if item.is_local_only() {
            return Ok(Outcome::local(item));
        }
        let remote = match self.api.update::<T, T>(coll.resource, &id, &item).await {
            Ok(_) => RemoteStatus::Synced,
            Err(e) => {
                warn!("{} 更新同步失败: {}", coll.key, e);
                self.error.set(format!("同步服务器失败: {}", e.message)).await;
                RemoteStatus::Failed(e.message)
            }
        };
        Ok(Outcome::new(item, remote))
    }

    async fn remove<T: StudyItem>(&self, coll: &Collection<T>, id: &str) -> Result<Outcome<()>> {
        let existing = self.find(coll, id).await?;
        self.commit(coll, |items| items.retain(|i| i.id() != id)).await;
        if existing.is_local_only() {
            return Ok(Outcome::local(()));
        }

        let remote = match self.api.delete(coll.resource, id).await {
            Ok(()) => RemoteStatus::Synced,
            Err(e) => {
                warn!("{} 删除同步失败: {}", coll.key, e);
                self.error
                    .set(format!("已从本地删除，服务器删除失败: {}", e.message))
                    .await;
                RemoteStatus::Failed(e.message)
            }
        };
        Ok(Outcome::new((), remote))
    }

    /// 修改内存列表并写回本地存储
    async fn commit<T, F>(&self, coll: &Collection<T>, f: F)
    where
        T: StudyItem,
        F: FnOnce(&mut Vec<T>),
    {
        let mut items = coll.items.write().await;
        f(&mut items);
        coll.persist(self.storage.as_ref(), &items);
    }
}

/// 由本地日志推导统计
///
/// 连续天数从今天往前数；今天还没有记录时从昨天开始，不算中断。
pub fn compute_analytics(logs: &[StudyLog], today: NaiveDate) -> StudyAnalytics {
    let mut minutes_by_subject: BTreeMap<String, u64> = BTreeMap::new();
    let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut total_minutes = 0u64;

    for log in logs {
        let minutes = u64::from(log.duration_minutes);
        total_minutes += minutes;
        *minutes_by_subject.entry(log.subject_id.clone()).or_default() += minutes;
        if minutes > 0 {
            days.insert(log.date);
        }
    }

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0u32;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }

    StudyAnalytics {
        total_minutes,
        minutes_by_subject,
        current_streak_days: streak,
        sessions: logs.len(),
    }
}
