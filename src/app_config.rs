//! 应用配置
//!
//! 加载顺序：`.env`（dotenvy）→ `config/slacko.toml`（可选）→ `SLACKO__*` 环境变量。
//! 例如 `SLACKO__API_BASE_URL=https://api.example.com/api`。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::models::AppError;

type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const CONFIG_FILE: &str = "config/slacko";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 主 API 地址
    pub api_base_url: String,
    /// 备用 API 地址（项目与教材接口在主地址失败后重试一次）
    pub fallback_base_url: Option<String>,
    /// 本地存储目录，缺省为系统数据目录下的 `slacko`
    pub data_dir: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            fallback_base_url: None,
            data_dir: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    pub fn from_env_and_file() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut builder = ::config::Config::builder();
        if std::path::Path::new(&format!("{CONFIG_FILE}.toml")).exists() {
            builder = builder.add_source(::config::File::with_name(CONFIG_FILE));
        }
        builder = builder.add_source(::config::Environment::with_prefix("SLACKO").separator("__"));
        let loaded = builder.build()?;
        let cfg: AppConfig = loaded.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        parse_base_url(&self.api_base_url)?;
        if let Some(fallback) = self.fallback_base() {
            parse_base_url(fallback)?;
        }
        if self.timeout_ms == 0 {
            return Err(AppError::configuration("timeout_ms 必须大于 0"));
        }
        Ok(())
    }

    /// 空字符串视为未配置
    pub fn fallback_base(&self) -> Option<&str> {
        self.fallback_base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("slacko")
        })
    }
}

/// 解析基础地址，保证以 `/` 结尾以便 `Url::join` 拼接相对路径
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::configuration("API 地址不能为空"));
    }
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| AppError::configuration(format!("无效的 API 地址 {trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::configuration(format!(
            "API 地址仅支持 http/https: {trimmed}"
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timeout(), Duration::from_secs(15));
        assert_eq!(cfg.fallback_base(), None);
    }

    #[test]
    fn test_blank_fallback_is_ignored() {
        let cfg = AppConfig {
            fallback_base_url: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(cfg.fallback_base(), None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let cfg = AppConfig {
            api_base_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AppConfig {
            fallback_base_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_base_url_appends_slash() {
        let url = parse_base_url("https://api.example.com/api").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/");
        assert_eq!(
            url.join("books/1").unwrap().as_str(),
            "https://api.example.com/api/books/1"
        );
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let cfg = AppConfig {
            data_dir: Some(PathBuf::from("/tmp/slacko-test")),
            ..Default::default()
        };
        assert_eq!(cfg.resolved_data_dir(), PathBuf::from("/tmp/slacko-test"));
    }
}
