//! 访问令牌存储
//!
//! 内存缓存 + `slacko_tokens` 持久化；传输层读取 access token 生成 Bearer 头。

use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::local_storage::{self, keys, LocalStorage};
use crate::models::{AppError, AuthTokens};

type Result<T> = std::result::Result<T, AppError>;

pub struct TokenStore {
    storage: Arc<dyn LocalStorage>,
    cached: RwLock<Option<AuthTokens>>,
}

impl TokenStore {
    /// 从本地存储恢复令牌
    pub fn load(storage: Arc<dyn LocalStorage>) -> Self {
        let cached = local_storage::get_json_lenient::<AuthTokens>(storage.as_ref(), keys::TOKENS);
        Self {
            storage,
            cached: RwLock::new(cached),
        }
    }

    pub fn get(&self) -> Option<AuthTokens> {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|t| t.access_token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get().and_then(|t| t.refresh_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }

    pub fn set(&self, tokens: AuthTokens) -> Result<()> {
        local_storage::set_json(self.storage.as_ref(), keys::TOKENS, &tokens)?;
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(tokens);
        Ok(())
    }

    /// 清除令牌；持久化删除失败只记录告警，内存状态总是清空
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(keys::TOKENS) {
            warn!("清除本地令牌失败: {}", e);
        }
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_storage::MemoryStorage;

    fn tokens() -> AuthTokens {
        AuthTokens {
            access_token: "acc".into(),
            refresh_token: Some("ref".into()),
        }
    }

    #[test]
    fn test_set_persists_and_reload_restores() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let store = TokenStore::load(storage.clone());
        assert!(!store.is_authenticated());

        store.set(tokens()).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("acc"));

        let raw = storage.get_item(keys::TOKENS).unwrap().unwrap();
        assert!(raw.contains("\"accessToken\":\"acc\""));

        let reloaded = TokenStore::load(storage);
        assert_eq!(reloaded.refresh_token().as_deref(), Some("ref"));
    }

    #[test]
    fn test_clear_removes_persisted_tokens() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let store = TokenStore::load(storage.clone());
        store.set(tokens()).unwrap();
        store.clear();
        assert!(!store.is_authenticated());
        assert_eq!(storage.get_item(keys::TOKENS).unwrap(), None);
    }

    #[test]
    fn test_corrupted_tokens_are_ignored() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        storage.set_item(keys::TOKENS, "oops").unwrap();
        let store = TokenStore::load(storage);
        assert!(!store.is_authenticated());
    }
}
