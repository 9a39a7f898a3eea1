//! 应用上下文装配
//!
//! 按 `AppConfig` 打开本地存储、构建共享的令牌与传输层，再创建各状态服务。

use std::sync::Arc;
use tracing::info;

use crate::api::{
    ApiTransport, AuthApi, ProjectApi, StudyApi, TextbookApi, TextbookBackend, TokenStore,
};
use crate::app_config::AppConfig;
use crate::local_storage::{FileStorage, LocalStorage};
use crate::models::AppError;
use crate::services::{ProjectService, StudyService, TextbookService, UserService};

pub struct AppContext {
    pub config: AppConfig,
    pub storage: Arc<dyn LocalStorage>,
    pub tokens: Arc<TokenStore>,
    pub users: UserService,
    pub projects: ProjectService,
    pub study: StudyService,
    pub textbooks: TextbookService,
}

impl AppContext {
    /// 使用配置中的数据目录创建文件存储
    pub fn from_config(config: AppConfig) -> Result<Self, AppError> {
        config.validate()?;
        let data_dir = config.resolved_data_dir();
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::open(data_dir.clone())?);
        info!("本地数据目录: {}", data_dir.display());
        Self::with_storage(config, storage)
    }

    /// 注入任意存储实现（测试用 `MemoryStorage`）
    pub fn with_storage(config: AppConfig, storage: Arc<dyn LocalStorage>) -> Result<Self, AppError> {
        let tokens = Arc::new(TokenStore::load(storage.clone()));
        let transport = ApiTransport::from_config(&config, true)?.with_tokens(tokens.clone());

        let textbook_backend: Arc<dyn TextbookBackend> =
            Arc::new(TextbookApi::new(transport.clone()));

        Ok(Self {
            users: UserService::new(AuthApi::new(transport.clone(), tokens.clone())),
            projects: ProjectService::new(ProjectApi::new(transport.clone())),
            study: StudyService::new(StudyApi::new(transport), storage.clone()),
            textbooks: TextbookService::new(textbook_backend, storage.clone()),
            config,
            storage,
            tokens,
        })
    }

    /// 启动时加载：恢复会话，然后同步学习数据与教材；均不致命
    pub async fn bootstrap(&self) {
        if let Err(e) = self.users.restore_session().await {
            tracing::warn!("恢复会话失败: {}", e);
        }
        let status = self.study.load().await;
        let books = self.textbooks.load().await;
        info!(
            "启动加载完成: 学习数据 {:?}, 教材 {} 本",
            status,
            books.len()
        );
    }
}
