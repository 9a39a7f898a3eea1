//! 认证接口 `/auth/*`
//!
//! 只走主地址；登录/注册/刷新成功后把令牌写入 [`TokenStore`]。

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::tokens::TokenStore;
use super::transport::ApiTransport;
use crate::models::{AppError, AuthTokens, LoginRequest, RegisterRequest, User};

type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(alias = "access_token", alias = "token")]
    access_token: String,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

/// 登录/注册结果
#[derive(Debug, Clone)]
pub struct Session {
    pub tokens: AuthTokens,
    pub user: Option<User>,
}

pub struct AuthApi {
    transport: ApiTransport,
    tokens: Arc<TokenStore>,
}

impl AuthApi {
    /// 认证接口不使用备用地址
    pub fn new(transport: ApiTransport, tokens: Arc<TokenStore>) -> Self {
        Self {
            transport: transport.without_fallback().with_tokens(tokens.clone()),
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<Session> {
        let resp: AuthResponse = self.transport.post("auth/login", req).await?;
        info!("登录成功: {}", req.email);
        self.store(resp)
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<Session> {
        let resp: AuthResponse = self.transport.post("auth/register", req).await?;
        info!("注册成功: {}", req.email);
        self.store(resp)
    }

    /// 用 refresh token 换取新令牌；服务端未返回新的 refresh token 时沿用旧值
    pub async fn refresh(&self) -> Result<AuthTokens> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or_else(|| AppError::validation("没有可用的 refresh token"))?;
        let resp: AuthResponse = self
            .transport
            .post("auth/refresh", &json!({ "refreshToken": refresh_token }))
            .await?;
        let tokens = AuthTokens {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(Some(refresh_token)),
        };
        self.tokens.set(tokens.clone())?;
        Ok(tokens)
    }

    pub async fn me(&self) -> Result<User> {
        let value: Value = self.transport.get("auth/me").await?;
        let value = super::unwrap_item(value, "user");
        serde_json::from_value(value)
            .map_err(|e| AppError::invalid_response(format!("用户信息格式错误: {e}")))
    }

    /// 通知服务端注销；无论成功与否都清除本地令牌
    pub async fn logout(&self) {
        if self.tokens.is_authenticated() {
            if let Err(e) = self.transport.send_json(reqwest::Method::POST, "auth/logout", None).await {
                warn!("服务端注销失败（已忽略）: {}", e);
            }
        }
        self.tokens.clear();
    }

    fn store(&self, resp: AuthResponse) -> Result<Session> {
        let tokens = AuthTokens {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
        };
        self.tokens.set(tokens.clone())?;
        Ok(Session {
            tokens,
            user: resp.user,
        })
    }
}
