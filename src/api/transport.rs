//! HTTP 传输层
//!
//! 统一负责 JSON 编解码、Bearer 认证与主/备地址切换：
//! - 主地址任何失败（网络错误、非 2xx、非 JSON、HTML 错误页）后，对备用地址原样重发一次
//! - 两者都失败时返回包含两个失败原因的组合错误
//! - 空响应体：2xx 视为 `{}`，否则为错误
//! - 以 HTML 标签开头的响应体一律视为服务端配置错误，与状态码无关

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::tokens::TokenStore;
use crate::app_config::{parse_base_url, AppConfig};
use crate::models::{AppError, AppErrorType};

type Result<T> = std::result::Result<T, AppError>;

/// 错误信息中保留的响应体最大字符数
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Clone)]
pub struct ApiTransport {
    http: Client,
    primary: Url,
    fallback: Option<Url>,
    tokens: Option<Arc<TokenStore>>,
}

impl ApiTransport {
    pub fn new(primary: &str, fallback: Option<&str>, timeout: Duration) -> Result<Self> {
        let primary = parse_base_url(primary)?;
        let fallback = fallback.map(parse_base_url).transpose()?;
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::configuration(format!("构建 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            http,
            primary,
            fallback,
            tokens: None,
        })
    }

    /// 按配置构建；`with_fallback` 为 false 时忽略备用地址
    pub fn from_config(cfg: &AppConfig, with_fallback: bool) -> Result<Self> {
        let fallback = if with_fallback {
            cfg.fallback_base()
        } else {
            None
        };
        Self::new(&cfg.api_base_url, fallback, cfg.timeout())
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn without_fallback(&self) -> Self {
        Self {
            fallback: None,
            ..self.clone()
        }
    }

    pub fn primary_url(&self) -> &Url {
        &self.primary
    }

    pub fn fallback_url(&self) -> Option<&Url> {
        self.fallback.as_ref()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send_json(Method::DELETE, path, None).await
    }

    /// 发送请求并把 `data` 包裹层拆掉后反序列化为目标类型
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let value = self.send_json(method.clone(), path, body).await?;
        serde_json::from_value(extract_data(value)).map_err(|e| {
            AppError::invalid_response(format!("{method} {path} 响应结构不符合预期: {e}"))
        })
    }

    /// 主地址失败后对备用地址重发一次
    pub async fn send_json(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let primary_err = match self.attempt(&self.primary, &method, path, body.as_ref()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        warn!(
            "{} {} 主地址失败，切换备用地址 {}: {}",
            method, path, fallback, primary_err
        );
        match self.attempt(fallback, &method, path, body.as_ref()).await {
            Ok(value) => {
                info!("{} {} 备用地址请求成功", method, path);
                Ok(value)
            }
            Err(fallback_err) => Err(combine_errors(primary_err, fallback_err)),
        }
    }

    /// 依次检查主/备地址，响应体与普通请求一样通过解析（2xx 且不是 HTML 页面）才算可达
    pub async fn is_reachable(&self, path: &str) -> bool {
        let bases = std::iter::once(&self.primary).chain(self.fallback.iter());
        for base in bases {
            let Ok(url) = build_url(base, path) else {
                continue;
            };
            let resp = match self.http.get(url.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!("可达性检查 {} 失败: {}", url, e);
                    continue;
                }
            };
            let status = resp.status();
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("可达性检查 {} 读取响应失败: {}", url, e);
                    continue;
                }
            };
            match parse_response_body(status, &body) {
                Ok(_) => return true,
                Err(e) => debug!("可达性检查 {} 不可用: {}", url, e),
            }
        }
        false
    }

    async fn attempt(
        &self,
        base: &Url,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = build_url(base, path)?;
        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = self.tokens.as_ref().and_then(|t| t.access_token()) {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").json(body);
        }

        debug!("{} {}", method, url);
        let resp = builder
            .send()
            .await
            .map_err(|e| AppError::network(format!("{method} {url} 请求失败: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::network(format!("读取 {url} 响应体失败: {e}")))?;
        parse_response_body(status, &text)
    }
}

/// 拼接基础地址与相对路径
pub fn build_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| AppError::validation(format!("无效的请求路径 {path}: {e}")))
}

/// 解析响应体
pub fn parse_response_body(status: StatusCode, body: &str) -> Result<Value> {
    let code = status.as_u16();
    let trimmed = body.trim_start_matches('\u{feff}').trim();

    if looks_like_html(trimmed) {
        return Err(AppError::invalid_response(format!(
            "服务器返回了 HTML 页面而不是 JSON（HTTP {code}），请检查 API 地址配置"
        )));
    }

    if trimmed.is_empty() {
        return if status.is_success() {
            Ok(json!({}))
        } else {
            Err(AppError::http_status(
                code,
                format!("HTTP {code} {}（空响应体）", reason(status)),
            ))
        };
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) if status.is_success() => {
            return Err(AppError::invalid_response(format!(
                "响应不是合法 JSON: {e}; 内容: {}",
                snippet(trimmed)
            )));
        }
        Err(_) => {
            return Err(AppError::http_status(
                code,
                format!("HTTP {code} {}: {}", reason(status), snippet(trimmed)),
            ));
        }
    };

    if !status.is_success() {
        let message = error_message(&value)
            .map(|m| format!("HTTP {code}: {m}"))
            .unwrap_or_else(|| format!("HTTP {code} {}", reason(status)));
        return Err(AppError::http_status(code, message));
    }

    Ok(value)
}

/// 拆掉 `{ "data": ... }` 包裹层
pub fn extract_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// `<!DOCTYPE html>`、`<html>` 等；合法 JSON 不可能以 `<` 开头
fn looks_like_html(body: &str) -> bool {
    body.starts_with('<')
}

fn error_message(value: &Value) -> Option<String> {
    for key in ["message", "error", "detail", "msg"] {
        match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Object(inner)) => {
                if let Some(Value::String(s)) = inner.get("message") {
                    return Some(s.clone());
                }
            }
            _ => {}
        }
    }
    None
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

fn snippet(body: &str) -> String {
    let mut out: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
    if body.chars().count() > BODY_SNIPPET_CHARS {
        out.push('…');
    }
    out
}

fn combine_errors(primary: AppError, fallback: AppError) -> AppError {
    let error_type = if primary.error_type == fallback.error_type {
        primary.error_type
    } else {
        AppErrorType::Network
    };
    AppError::with_details(
        error_type,
        format!(
            "主地址请求失败: {}; 备用地址请求失败: {}",
            primary.message, fallback.message
        ),
        json!({
            "primary": primary,
            "fallback": fallback,
        }),
    )
}
