//! 集成测试公共工具

#![allow(dead_code)]

use async_trait::async_trait;
use slacko_lib::api::TextbookBackend;
use slacko_lib::models::{AppError, TextbookRecord};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// 可切换在线状态的内存教材后端
#[derive(Default)]
pub struct FakeBackend {
    pub online: AtomicBool,
    pub fail_delete: AtomicBool,
    pub books: Mutex<Vec<TextbookRecord>>,
    pub calls: Mutex<Vec<String>>,
    next_id: AtomicU32,
}

impl FakeBackend {
    pub fn online() -> Self {
        let backend = Self::default();
        backend.online.store(true, Ordering::SeqCst);
        backend
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// 预置一条服务端记录
    pub fn seed(&self, api_id: &str, title: &str, total_pages: u32) {
        self.books.lock().unwrap().push(TextbookRecord {
            id: api_id.to_string(),
            api_id: Some(api_id.to_string()),
            title: title.to_string(),
            total_pages,
            ..server_record_defaults()
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record_call(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn ensure_online(&self) -> Result<(), AppError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::network("connection refused"))
        }
    }
}

fn server_record_defaults() -> TextbookRecord {
    TextbookRecord {
        id: String::new(),
        api_id: None,
        title: String::new(),
        author: String::new(),
        publisher: String::new(),
        total_pages: 0,
        current_page: 0,
        target_date: None,
        status: Default::default(),
        is_local_only: false,
        saving: false,
        local: Default::default(),
    }
}

#[async_trait]
impl TextbookBackend for FakeBackend {
    async fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<TextbookRecord>, AppError> {
        self.record_call("list");
        self.ensure_online()?;
        Ok(self.books.lock().unwrap().clone())
    }

    async fn create(&self, record: &TextbookRecord) -> Result<TextbookRecord, AppError> {
        self.record_call("create");
        self.ensure_online()?;
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let saved = TextbookRecord {
            id: id.clone(),
            api_id: Some(id),
            title: record.title.clone(),
            author: record.author.clone(),
            publisher: record.publisher.clone(),
            total_pages: record.total_pages,
            current_page: record.current_page,
            target_date: record.target_date,
            status: record.status,
            ..server_record_defaults()
        };
        self.books.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn update(&self, api_id: &str, record: &TextbookRecord) -> Result<TextbookRecord, AppError> {
        self.record_call(format!("update:{api_id}"));
        self.ensure_online()?;
        let mut books = self.books.lock().unwrap();
        let slot = books
            .iter_mut()
            .find(|b| b.api_id.as_deref() == Some(api_id))
            .ok_or_else(|| AppError::http_status(404, "book not found"))?;
        slot.title = record.title.clone();
        slot.current_page = record.current_page;
        slot.total_pages = record.total_pages;
        slot.status = record.status;
        Ok(slot.clone())
    }

    async fn delete(&self, api_id: &str) -> Result<(), AppError> {
        self.record_call(format!("delete:{api_id}"));
        self.ensure_online()?;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::http_status(500, "delete failed"));
        }
        self.books
            .lock()
            .unwrap()
            .retain(|b| b.api_id.as_deref() != Some(api_id));
        Ok(())
    }
}
