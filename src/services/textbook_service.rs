//! 教材混合对账服务
//!
//! 无论服务端是否可用，都向界面提供一份统一的教材列表：
//! - 服务端记录 + 本地附加字段（`book_local_<id>`）合并
//! - 只在本地存在的记录追加在后，按 `id` / `api_id` 去重
//! - 新建先插入乐观占位，服务端成功后替换为服务端记录，失败则定为仅本地
//! - 所有变更都镜像到旧版扁平数组 `textbooks`，保持旧存储格式可读
//!
//! 每个操作最多发起一次服务端调用，失败不回滚本地状态。

use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::reading_plan::{build_study_plan, mark_plan_progress};
use super::{ErrorSlot, Outcome, RemoteStatus};
use crate::api::TextbookBackend;
use crate::local_storage::{self, keys, LocalStorage};
use crate::models::{
    AppError, LocalAugmentation, ReadingEntry, ReadingStatus, TextbookDraft, TextbookPatch,
    TextbookRecord,
};

type Result<T> = std::result::Result<T, AppError>;

pub struct TextbookService {
    backend: Arc<dyn TextbookBackend>,
    storage: Arc<dyn LocalStorage>,
    records: RwLock<Vec<TextbookRecord>>,
    error: ErrorSlot,
    last_temp_id: AtomicI64,
}

impl TextbookService {
    pub fn new(backend: Arc<dyn TextbookBackend>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            backend,
            storage,
            records: RwLock::new(Vec::new()),
            error: ErrorSlot::default(),
            last_temp_id: AtomicI64::new(0),
        }
    }

    /// 当前内存列表快照
    pub async fn records(&self) -> Vec<TextbookRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<TextbookRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.matches_id(id))
            .cloned()
    }

    pub async fn error(&self) -> Option<String> {
        self.error.get().await
    }

    pub async fn clear_error(&self) {
        self.error.clear().await;
    }

    // ========================================================================
    // 加载与合并
    // ========================================================================

    pub async fn load(&self) -> Vec<TextbookRecord> {
        let legacy = self.read_legacy();
        let mut merged: Vec<TextbookRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if self.backend.is_available().await {
            match self.backend.list().await {
                Ok(server_records) => {
                    for mut rec in server_records {
                        if !seen.insert(rec.resolved_id().to_string()) {
                            continue;
                        }
                        seen.insert(rec.id.clone());
                        let legacy_copy = legacy.iter().find(|l| {
                            rec.matches_id(&l.id)
                                || l.api_id.as_deref().is_some_and(|a| rec.matches_id(a))
                        });
                        rec.local = self
                            .read_augmentation(rec.resolved_id())
                            .or_else(|| legacy_copy.map(|l| l.local.clone()))
                            .unwrap_or_default();
                        merged.push(rec);
                    }
                    debug!("服务端教材 {} 本", merged.len());
                }
                Err(e) => {
                    warn!("获取服务端教材失败，使用本地数据: {}", e);
                    self.error.set(format!("无法同步教材: {}", e.message)).await;
                }
            }
        } else {
            info!("教材服务不可达，使用本地数据");
        }

        let server_count = merged.len();
        for mut rec in legacy {
            let duplicate = seen.contains(&rec.id)
                || rec.api_id.as_deref().is_some_and(|a| seen.contains(a));
            if duplicate {
                continue;
            }
            seen.insert(rec.id.clone());
            if let Some(api_id) = &rec.api_id {
                seen.insert(api_id.clone());
            }
            if let Some(local) = self.read_augmentation(rec.resolved_id()) {
                rec.local = local;
            }
            rec.saving = false;
            merged.push(rec);
        }
        debug!("本地追加教材 {} 本", merged.len() - server_count);

        *self.records.write().await = merged.clone();
        merged
    }

    // ========================================================================
    // 新建
    // ========================================================================

    pub async fn create(&self, draft: TextbookDraft) -> Result<Outcome<TextbookRecord>> {
        draft.validate().map_err(AppError::validation)?;

        let temp_id = self.next_temp_id();
        let mut placeholder = draft.into_record(temp_id.clone());
        placeholder.saving = true;
        self.records.write().await.push(placeholder.clone());

        let (record, remote) = match self.backend.create(&placeholder).await {
            Ok(mut created) => {
                created.local = placeholder.local.clone();
                created.is_local_only = false;
                created.saving = false;
                info!("教材已同步到服务端: {} -> {}", temp_id, created.resolved_id());
                (created, RemoteStatus::Synced)
            }
            Err(e) => {
                warn!("教材创建同步失败，保留为本地记录 {}: {}", temp_id, e);
                self.error
                    .set(format!("教材已保存在本地，同步失败: {}", e.message))
                    .await;
                let mut local = placeholder;
                local.is_local_only = true;
                local.saving = false;
                (local, RemoteStatus::Failed(e.message))
            }
        };

        {
            let mut records = self.records.write().await;
            match records.iter_mut().find(|r| r.id == temp_id) {
                Some(slot) => *slot = record.clone(),
                None => records.push(record.clone()),
            }
        }

        self.write_augmentation(record.resolved_id(), &record.local)?;
        self.mirror_legacy(&record)?;
        Ok(Outcome::new(record, remote))
    }

    // ========================================================================
    // 更新
    // ========================================================================

    pub async fn update(&self, id: &str, patch: TextbookPatch) -> Result<Outcome<TextbookRecord>> {
        let updated = {
            let mut records = self.records.write().await;
            let rec = records
                .iter_mut()
                .find(|r| r.matches_id(id))
                .ok_or_else(|| AppError::not_found(format!("本地未找到教材 {id}")))?;
            patch.apply_to(rec);
            rec.clone()
        };

        let remote = match updated.api_id.as_deref() {
            Some(api_id) if updated.is_server_backed() => {
                match self.backend.update(api_id, &updated).await {
                    Ok(_) => RemoteStatus::Synced,
                    Err(e) => {
                        warn!("教材 {} 服务端更新失败，保留本地修改: {}", api_id, e);
                        self.error
                            .set(format!("教材修改仅保存在本地: {}", e.message))
                            .await;
                        RemoteStatus::Failed(e.message)
                    }
                }
            }
            _ => RemoteStatus::NotAttempted,
        };

        let key_id = updated.resolved_id();
        let mut local = self
            .read_augmentation(key_id)
            .unwrap_or_else(|| updated.local.clone());
        patch.apply_local(&mut local);
        self.write_augmentation(key_id, &local)?;
        self.mirror_legacy(&updated)?;
        Ok(Outcome::new(updated, remote))
    }

    /// 用调用方保存的快照覆盖本地状态（不触发服务端调用）
    pub async fn revert(&self, snapshot: TextbookRecord) -> Result<()> {
        {
            let mut records = self.records.write().await;
            let slot = records
                .iter_mut()
                .find(|r| r.id == snapshot.id)
                .ok_or_else(|| AppError::not_found(format!("本地未找到教材 {}", snapshot.id)))?;
            *slot = snapshot.clone();
        }
        self.write_augmentation(snapshot.resolved_id(), &snapshot.local)?;
        self.mirror_legacy(&snapshot)
    }

    // ========================================================================
    // 删除
    // ========================================================================

    pub async fn delete(&self, id: &str) -> Result<Outcome<()>> {
        let target = self
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found(format!("本地未找到教材 {id}")))?;

        let remote = match target.api_id.as_deref() {
            Some(api_id) if target.is_server_backed() => match self.backend.delete(api_id).await {
                Ok(()) => RemoteStatus::Synced,
                Err(e) => {
                    warn!("教材 {} 服务端删除失败，继续删除本地数据: {}", api_id, e);
                    self.error
                        .set(format!("服务端删除失败: {}", e.message))
                        .await;
                    RemoteStatus::Failed(e.message)
                }
            },
            _ => RemoteStatus::NotAttempted,
        };

        self.records
            .write()
            .await
            .retain(|r| !same_record(r, &target));

        self.storage
            .remove_item(&keys::book_local(target.resolved_id()))?;
        if target.resolved_id() != target.id {
            self.storage.remove_item(&keys::book_local(&target.id))?;
        }
        let mut legacy = self.read_legacy();
        legacy.retain(|r| !same_record(r, &target));
        local_storage::set_json(self.storage.as_ref(), keys::TEXTBOOKS, &legacy)?;

        Ok(Outcome::new((), remote))
    }

    // ========================================================================
    // 阅读进度与计划
    // ========================================================================

    /// 记录一次阅读：追加历史、推进当前页、推导状态并勾掉已完成的计划项
    pub async fn log_reading(
        &self,
        id: &str,
        to_page: u32,
        minutes: u32,
        date: NaiveDate,
    ) -> Result<Outcome<TextbookRecord>> {
        let rec = self
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found(format!("本地未找到教材 {id}")))?;

        let to_page = if rec.total_pages > 0 {
            to_page.min(rec.total_pages)
        } else {
            to_page
        };
        if to_page < rec.current_page {
            return Err(AppError::validation(format!(
                "阅读页码 {} 小于当前页 {}",
                to_page, rec.current_page
            )));
        }

        let mut history = rec.local.reading_history.clone();
        history.push(ReadingEntry {
            date,
            from_page: rec.current_page,
            to_page,
            minutes,
        });
        let mut plan = rec.local.study_plan.clone();
        mark_plan_progress(&mut plan, to_page);

        let patch = TextbookPatch {
            current_page: Some(to_page),
            status: Some(ReadingStatus::from_progress(to_page, rec.total_pages)),
            reading_history: Some(history),
            study_plan: Some(plan),
            ..Default::default()
        };
        self.update(id, patch).await
    }

    pub async fn generate_study_plan(
        &self,
        id: &str,
        today: NaiveDate,
    ) -> Result<Outcome<TextbookRecord>> {
        let rec = self
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found(format!("本地未找到教材 {id}")))?;
        let plan = build_study_plan(&rec, today).map_err(AppError::validation)?;
        debug!("教材 {} 生成阅读计划 {} 天", id, plan.len());
        self.update(
            id,
            TextbookPatch {
                study_plan: Some(plan),
                ..Default::default()
            },
        )
        .await
    }

    // ========================================================================
    // 本地存储
    // ========================================================================

    /// 毫秒时间戳作为临时 ID，同一毫秒内递增保证唯一
    fn next_temp_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_temp_id.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(prev + 1);
            match self.last_temp_id.compare_exchange(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    fn read_legacy(&self) -> Vec<TextbookRecord> {
        local_storage::get_json_lenient(self.storage.as_ref(), keys::TEXTBOOKS).unwrap_or_default()
    }

    fn read_augmentation(&self, id: &str) -> Option<LocalAugmentation> {
        local_storage::get_json_lenient(self.storage.as_ref(), &keys::book_local(id))
    }

    fn write_augmentation(&self, id: &str, local: &LocalAugmentation) -> Result<()> {
        let key = keys::book_local(id);
        if local.is_empty() {
            self.storage.remove_item(&key)?;
        } else {
            local_storage::set_json(self.storage.as_ref(), &key, local)?;
        }
        Ok(())
    }

    fn mirror_legacy(&self, record: &TextbookRecord) -> Result<()> {
        let mut legacy = self.read_legacy();
        match legacy.iter_mut().find(|r| same_record(r, record)) {
            Some(slot) => *slot = record.clone(),
            None => legacy.push(record.clone()),
        }
        local_storage::set_json(self.storage.as_ref(), keys::TEXTBOOKS, &legacy)?;
        Ok(())
    }
}

fn same_record(a: &TextbookRecord, b: &TextbookRecord) -> bool {
    a.matches_id(&b.id) || b.api_id.as_deref().is_some_and(|id| a.matches_id(id))
}
