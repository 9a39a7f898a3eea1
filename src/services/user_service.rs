//! 用户会话服务
//!
//! 持有当前用户；启动时若 `slacko_tokens` 中有令牌则尝试恢复会话，
//! access token 失效时用 refresh token 刷新一次。

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::ErrorSlot;
use crate::api::AuthApi;
use crate::models::{AppError, LoginRequest, RegisterRequest, User};

type Result<T> = std::result::Result<T, AppError>;

pub struct UserService {
    api: AuthApi,
    user: RwLock<Option<User>>,
    error: ErrorSlot,
}

impl UserService {
    pub fn new(api: AuthApi) -> Self {
        Self {
            api,
            user: RwLock::new(None),
            error: ErrorSlot::default(),
        }
    }

    pub async fn current_user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.user.read().await.is_some()
    }

    pub async fn error(&self) -> Option<String> {
        self.error.get().await
    }

    pub async fn clear_error(&self) {
        self.error.clear().await;
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let req = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        if req.email.is_empty() || req.password.is_empty() {
            return Err(AppError::validation("邮箱和密码不能为空"));
        }
        let session = match self.api.login(&req).await {
            Ok(s) => s,
            Err(e) => {
                self.error.set(format!("登录失败: {}", e.message)).await;
                return Err(e);
            }
        };
        self.finish_session(session.user).await
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let req = RegisterRequest {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        if req.name.is_empty() || req.email.is_empty() || req.password.is_empty() {
            return Err(AppError::validation("姓名、邮箱和密码不能为空"));
        }
        let session = match self.api.register(&req).await {
            Ok(s) => s,
            Err(e) => {
                self.error.set(format!("注册失败: {}", e.message)).await;
                return Err(e);
            }
        };
        self.finish_session(session.user).await
    }

    /// 根据已保存的令牌恢复会话；无令牌时返回 `Ok(None)`
    pub async fn restore_session(&self) -> Result<Option<User>> {
        if !self.api.tokens().is_authenticated() {
            return Ok(None);
        }
        match self.api.me().await {
            Ok(user) => {
                *self.user.write().await = Some(user.clone());
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                info!("access token 已失效，尝试刷新");
                if let Err(refresh_err) = self.api.refresh().await {
                    warn!("刷新令牌失败，清除会话: {}", refresh_err);
                    self.api.tokens().clear();
                    return Ok(None);
                }
                let user = self.api.me().await?;
                *self.user.write().await = Some(user.clone());
                Ok(Some(user))
            }
            Err(e) => {
                // 网络问题时保留令牌，下次再试
                self.error.set(format!("无法恢复会话: {}", e.message)).await;
                Err(e)
            }
        }
    }

    pub async fn logout(&self) {
        self.api.logout().await;
        *self.user.write().await = None;
    }

    async fn finish_session(&self, user: Option<User>) -> Result<User> {
        let user = match user {
            Some(u) => u,
            None => self.api.me().await?,
        };
        self.error.clear().await;
        *self.user.write().await = Some(user.clone());
        Ok(user)
    }
}
