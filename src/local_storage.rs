//! 本地持久化存储
//!
//! 以键值对形式保存客户端状态，对应浏览器端的 localStorage：
//! - `FileStorage`：每个键一个 JSON 文件，写入时先落临时文件再原子替换
//! - `MemoryStorage`：进程内存储，用于测试与无磁盘环境
//!
//! 已使用的键见 [`keys`]。

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::models::AppError;

/// 存储键常量
pub mod keys {
    pub const TOKENS: &str = "slacko_tokens";
    pub const STUDY_SUBJECTS: &str = "studySubjects";
    pub const STUDY_LOGS: &str = "studyLogs";
    pub const STUDY_GOALS: &str = "studyGoals";
    pub const STUDY_EVENTS: &str = "studyEvents";
    /// 旧版扁平教材数组
    pub const TEXTBOOKS: &str = "textbooks";
    pub const BOOK_LOCAL_PREFIX: &str = "book_local_";

    pub fn book_local(id: &str) -> String {
        format!("{BOOK_LOCAL_PREFIX}{id}")
    }
}

/// 本地存储错误类型
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("非法存储键: {0}")]
    InvalidKey(String),
    #[error("读写失败 {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("数据损坏 {key}: {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("序列化失败 {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("存储锁已损坏")]
    Poisoned,
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::storage(err.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// 同步键值存储接口
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// 列出所有键（无序保证由实现决定）
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// 读取并反序列化 JSON 值
pub fn get_json<T: DeserializeOwned>(
    storage: &dyn LocalStorage,
    key: &str,
) -> StorageResult<Option<T>> {
    match storage.get_item(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupted {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// 读取 JSON，数据损坏时记录告警并视为不存在
pub fn get_json_lenient<T: DeserializeOwned>(storage: &dyn LocalStorage, key: &str) -> Option<T> {
    match get_json(storage, key) {
        Ok(value) => value,
        Err(e) => {
            warn!("读取本地存储 {} 失败，忽略该条目: {}", key, e);
            None
        }
    }
}

pub fn set_json<T: Serialize + ?Sized>(
    storage: &dyn LocalStorage,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    storage.set_item(key, &raw)
}

// ============================================================================
// 文件存储
// ============================================================================

/// 目录型存储：`<root>/<encoded-key>.json`
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        debug!("本地存储目录: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self
            .root
            .join(format!("{}.json", urlencoding::encode(key))))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(key)(e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(Self::io_err(key))?;
        tmp.write_all(value.as_bytes()).map_err(Self::io_err(key))?;
        tmp.flush().map_err(Self::io_err(key))?;
        tmp.persist(&path)
            .map_err(|e| Self::io_err(key)(e.error))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key)(e)),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(Self::io_err("<root>"))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_err("<root>"))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Ok(key) = urlencoding::decode(stem) {
                keys.push(key.into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// 内存存储
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let items = self.items.read().map_err(|_| StorageError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let mut items = self.items.write().map_err(|_| StorageError::Poisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut items = self.items.write().map_err(|_| StorageError::Poisoned)?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let items = self.items.read().map_err(|_| StorageError::Poisoned)?;
        Ok(items.keys().cloned().collect())
    }
}
