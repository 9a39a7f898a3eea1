//! 教材混合对账集成测试

mod common;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use common::FakeBackend;
use mockito::Server;
use serde_json::json;
use slacko_lib::api::{ApiTransport, TextbookApi, TextbookBackend};
use slacko_lib::local_storage::{self, keys, FileStorage, LocalStorage, MemoryStorage};
use slacko_lib::models::{
    AppErrorType, LocalAugmentation, ReadingStatus, TextbookDraft, TextbookPatch, TextbookRecord,
};
use slacko_lib::services::{RemoteStatus, TextbookService};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn draft(title: &str, total_pages: u32) -> TextbookDraft {
    TextbookDraft {
        title: title.to_string(),
        total_pages,
        ..Default::default()
    }
}

fn count_with_title(records: &[TextbookRecord], title: &str) -> usize {
    records.iter().filter(|r| r.title == title).count()
}

#[tokio::test]
async fn test_offline_created_record_appears_once_as_local_only() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::offline());
    let svc = TextbookService::new(backend.clone(), storage.clone());

    let out = svc.create(draft("Linear Algebra", 300)).await.unwrap();
    assert_matches!(out.remote, RemoteStatus::Failed(_));

    // 重新加载（模拟刷新页面）
    let reloaded = TextbookService::new(backend, storage);
    let records = reloaded.load().await;
    assert_eq!(count_with_title(&records, "Linear Algebra"), 1);
    let rec = records.iter().find(|r| r.title == "Linear Algebra").unwrap();
    assert!(rec.is_local_only);
    assert!(!rec.saving);
    assert_eq!(rec.id, out.value.id);
}

#[tokio::test]
async fn test_server_and_local_copies_are_not_duplicated() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    let svc = TextbookService::new(backend.clone(), storage.clone());

    let created = svc.create(draft("Algorithms", 900)).await.unwrap();
    assert!(created.remote.is_synced());
    svc.create(draft("Compilers", 500)).await.unwrap();

    let records = svc.load().await;
    assert_eq!(records.len(), 2);
    assert_eq!(count_with_title(&records, "Algorithms"), 1);
    assert!(records.iter().all(|r| !r.is_local_only));

    // 旧版数组里也只有两条
    let legacy: Vec<TextbookRecord> = local_storage::get_json(storage.as_ref(), keys::TEXTBOOKS)
        .unwrap()
        .unwrap();
    assert_eq!(legacy.len(), 2);
}

#[tokio::test]
async fn test_server_records_merge_local_augmentation() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    backend.seed("42", "Databases", 400);

    let augmentation = LocalAugmentation {
        notes: "focus on chapter 7".to_string(),
        ..Default::default()
    };
    local_storage::set_json(storage.as_ref(), &keys::book_local("42"), &augmentation).unwrap();

    let svc = TextbookService::new(backend, storage);
    let records = svc.load().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local.notes, "focus on chapter 7");
    assert_eq!(records[0].api_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_offline_load_falls_back_to_local_records() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    let svc = TextbookService::new(backend.clone(), storage.clone());
    svc.create(draft("Networks", 250)).await.unwrap();

    backend.set_online(false);
    let reloaded = TextbookService::new(backend.clone(), storage);
    let records = reloaded.load().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "Networks");
    // 不可达时不调用 list
    assert!(!backend.calls().iter().any(|c| c == "list"));
}

#[tokio::test]
async fn test_delete_removes_local_data_even_if_server_delete_fails() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    let svc = TextbookService::new(backend.clone(), storage.clone());

    let mut d = draft("Graph Theory", 120);
    d.local.notes = "exam in June".to_string();
    let created = svc.create(d).await.unwrap().value;
    let api_id = created.api_id.clone().unwrap();
    assert!(storage
        .get_item(&keys::book_local(&api_id))
        .unwrap()
        .is_some());

    backend
        .fail_delete
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let out = svc.delete(&created.id).await.unwrap();
    assert_matches!(out.remote, RemoteStatus::Failed(_));

    assert!(svc.get(&created.id).await.is_none());
    assert!(storage
        .get_item(&keys::book_local(&api_id))
        .unwrap()
        .is_none());
    let legacy: Vec<TextbookRecord> = local_storage::get_json(storage.as_ref(), keys::TEXTBOOKS)
        .unwrap()
        .unwrap();
    assert!(legacy.is_empty());
    assert!(svc.error().await.is_some());
}

#[tokio::test]
async fn test_update_failure_keeps_local_change() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    let svc = TextbookService::new(backend.clone(), storage);
    let created = svc.create(draft("Topology", 200)).await.unwrap().value;

    backend.set_online(false);
    let snapshot = svc.get(&created.id).await.unwrap();
    let out = svc
        .update(
            &created.id,
            TextbookPatch {
                current_page: Some(50),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_matches!(out.remote, RemoteStatus::Failed(_));
    assert_eq!(svc.get(&created.id).await.unwrap().current_page, 50);

    // 调用方可以选择回滚
    svc.revert(snapshot).await.unwrap();
    assert_eq!(svc.get(&created.id).await.unwrap().current_page, 0);
}

#[tokio::test]
async fn test_notes_patch_on_server_record_syncs_and_keeps_augmentation() {
    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let backend = Arc::new(FakeBackend::online());
    let svc = TextbookService::new(backend.clone(), storage.clone());
    let created = svc.create(draft("Rhetoric", 150)).await.unwrap().value;

    let out = svc
        .update(
            &created.id,
            TextbookPatch {
                notes: Some("read with seminar notes".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(out.remote.is_synced());
    assert!(backend
        .calls()
        .contains(&format!("update:{}", created.resolved_id())));

    let aug: LocalAugmentation =
        local_storage::get_json(storage.as_ref(), &keys::book_local(created.resolved_id()))
            .unwrap()
            .unwrap();
    assert_eq!(aug.notes, "read with seminar notes");
}

#[tokio::test]
async fn test_reading_flow_persists_to_disk() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::open(dir.path()).unwrap());
    let backend = Arc::new(FakeBackend::offline());
    let svc = TextbookService::new(backend.clone(), storage.clone());

    let id = svc
        .create(TextbookDraft {
            target_date: NaiveDate::from_ymd_opt(2024, 9, 4),
            ..draft("Calculus", 60)
        })
        .await
        .unwrap()
        .value
        .id;
    let today = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
    svc.generate_study_plan(&id, today).await.unwrap();
    svc.log_reading(&id, 30, 45, today).await.unwrap();

    let reopened = TextbookService::new(
        backend,
        Arc::new(FileStorage::open(dir.path()).unwrap()),
    );
    let records = reopened.load().await;
    let rec = records.iter().find(|r| r.id == id).unwrap();
    assert_eq!(rec.current_page, 30);
    assert_eq!(rec.status, ReadingStatus::Reading);
    assert_eq!(rec.progress_percent(), 50.0);
    assert_eq!(rec.local.study_plan.len(), 4);
    assert_eq!(
        rec.local.study_plan.iter().filter(|p| p.done).count(),
        2
    );
    assert_eq!(rec.local.reading_history.len(), 1);
}

// ============================================================================
// TextbookApi 与真实 HTTP
// ============================================================================

fn transport(primary: &str, fallback: Option<&str>) -> ApiTransport {
    ApiTransport::new(primary, fallback, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_textbook_api_list_transforms_backend_schema() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/books")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "books": [{
                    "_id": 7,
                    "title": "Signals",
                    "total_pages": 320,
                    "current_page": 320,
                    "target_date": "2024-12-01T00:00:00Z",
                    "status": "completed"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let api = TextbookApi::new(transport(&format!("{}/api", server.url()), None));
    let books = api.list().await.unwrap();
    mock.assert_async().await;

    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, "7");
    assert_eq!(books[0].api_id.as_deref(), Some("7"));
    assert_eq!(books[0].status, ReadingStatus::Completed);
    assert_eq!(books[0].target_date, NaiveDate::from_ymd_opt(2024, 12, 1));
}

#[tokio::test]
async fn test_textbook_api_health_uses_fallback() {
    let mut server = Server::new_async().await;
    let _health = server
        .mock("GET", "/api/health")
        .with_status(200)
        .with_body(r#"{"status":"ok"}"#)
        .create_async()
        .await;

    let api = TextbookApi::new(transport(
        "http://127.0.0.1:1/api",
        Some(&format!("{}/api", server.url())),
    ));
    assert!(api.is_available().await);

    let down = TextbookApi::new(transport("http://127.0.0.1:1/api", None));
    assert!(!down.is_available().await);
}

#[tokio::test]
async fn test_textbook_api_health_rejects_html_page() {
    let mut html = Server::new_async().await;
    let _spa = html
        .mock("GET", "/api/health")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<!DOCTYPE html><html><body>app shell</body></html>")
        .create_async()
        .await;

    let api = TextbookApi::new(transport(&format!("{}/api", html.url()), None));
    assert!(!api.is_available().await);

    // HTML 主地址之后仍会检查备用地址
    let mut healthy = Server::new_async().await;
    let ok = healthy
        .mock("GET", "/api/health")
        .with_status(200)
        .with_body(r#"{"status":"ok"}"#)
        .create_async()
        .await;
    let api = TextbookApi::new(transport(
        &format!("{}/api", html.url()),
        Some(&format!("{}/api", healthy.url())),
    ));
    assert!(api.is_available().await);
    ok.assert_async().await;
}

#[tokio::test]
async fn test_textbook_api_html_error_page() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/books")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<!DOCTYPE html><html><body>Cannot POST /books</body></html>")
        .create_async()
        .await;

    let api = TextbookApi::new(transport(&format!("{}/api", server.url()), None));
    let rec = draft("Optics", 80).into_record("1".to_string());
    let err = api.create(&rec).await.unwrap_err();
    assert_eq!(err.error_type, AppErrorType::InvalidResponse);
}
