/*!
common/src/lib.rs

Shared configuration types and credential helpers for newspost.

This file provides:
- Config data structures (deserialized from TOML, every field defaulted)
- An async loader merging a default file with an optional override file
- Credential lookup for the news and generation API keys
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// News API section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    /// Full top-headlines endpoint
    pub api_url: String,
    /// Name of the environment variable holding the news API key
    pub api_key_env: String,
    /// ISO country code passed to the endpoint
    pub country: String,
    /// Requested page size; never more than 10 articles are kept
    pub page_size: u32,
    pub timeout_seconds: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://newsapi.org/v2/top-headlines".to_string(),
            api_key_env: "NEWS_API_KEY".to_string(),
            country: "fr".to_string(),
            page_size: 10,
            timeout_seconds: 10,
        }
    }
}

/// Text and image generation section (OpenAI-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API root, e.g. "https://api.openai.com/v1"
    pub api_url: String,
    pub api_key_env: String,
    pub text_model: String,
    pub image_model: String,
    pub image_size: String,
    pub image_quality: String,
    /// Overrides the embedded post instruction template
    pub post_prompt_path: Option<String>,
    /// Unset means the HTTP client's own defaults apply
    pub timeout_seconds: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            image_quality: "standard".to_string(),
            post_prompt_path: None,
            timeout_seconds: None,
        }
    }
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served under /static; defaults to the crate's bundled page
    pub static_dir: Option<String>,
    /// Key for the private session cookie; required by Rocket in release builds
    pub secret_key: Option<String>,
    /// Sessions unused for this long are dropped
    pub session_idle_minutes: u64,
    /// Upper bound on sessions kept in memory
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: None,
            secret_key: None,
            session_idle_minutes: 120,
            max_sessions: 1000,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub news: NewsConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Missing keys
    /// fall back to built-in defaults.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject endpoint URLs that cannot be parsed and nonsensical paging.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.news.api_url)
            .with_context(|| format!("Invalid news.api_url: {}", self.news.api_url))?;
        Url::parse(&self.llm.api_url)
            .with_context(|| format!("Invalid llm.api_url: {}", self.llm.api_url))?;
        if self.news.page_size == 0 {
            anyhow::bail!("news.page_size must be at least 1");
        }
        if self.server.max_sessions == 0 || self.server.session_idle_minutes == 0 {
            anyhow::bail!("server.max_sessions and server.session_idle_minutes must be at least 1");
        }
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Variable read by earlier versions of the tool for the news key, still
/// honoured when the configured one is unset.
pub const LEGACY_NEWS_KEY_ENV: &str = "apiKey";

/// API keys resolved once at startup. A missing key only disables the
/// operations that need it.
#[derive(Clone, Default)]
pub struct Credentials {
    pub news_api_key: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Credentials {
    /// Read both keys from the process environment, using the variable names
    /// configured in `news.api_key_env` and `llm.api_key_env`. The news key
    /// falls back to `apiKey`.
    pub fn from_env(config: &Config) -> Self {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an arbitrary lookup; blank values count as missing.
    pub fn from_lookup<F>(config: &Config, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            news_api_key: read(&config.news.api_key_env).or_else(|| read(LEGACY_NEWS_KEY_ENV)),
            llm_api_key: read(&config.llm.api_key_env),
        }
    }
}

// Keys must never end up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("news_api_key", &self.news_api_key.as_ref().map(|_| "<set>"))
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}
