use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use common::NewsConfig;

use crate::error::{PipelineError, Result};

/// Upper bound on articles kept from one fetch.
pub const MAX_ARTICLES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub name: Option<String>,
}

/// One headline as returned by the news API (fields are nullable upstream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: ArticleSource,
    #[serde(default)]
    pub published_at: Option<String>,
}

impl Article {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Sans titre")
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.name.as_deref().filter(|n| !n.trim().is_empty())
    }

    /// Publication day, parsed from RFC 3339 when possible, otherwise the
    /// leading `YYYY-MM-DD` of the raw value.
    pub fn published_date(&self) -> Option<NaiveDate> {
        let raw = self.published_at.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.date_naive());
        }
        raw.get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    }
}

/// Top-headlines payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsResponse {
    pub status: String,
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// Same envelope with the error fields the API sends when `status` is "error".
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNewsResponse {
    status: String,
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the top-headlines endpoint.
pub struct NewsClient {
    config: NewsConfig,
    api_key: Option<String>,
}

impl NewsClient {
    pub fn new(config: NewsConfig, api_key: Option<String>) -> Self {
        Self { config, api_key }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Fetch the current headlines for the configured country. Fails with a
    /// configuration error before any request when no key is set. No retry.
    pub async fn fetch_top_headlines(&self) -> Result<NewsResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::missing_key(&self.config.api_key_env))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .user_agent("Newspost/0.1.0")
            .build()
            .map_err(|e| PipelineError::Fetch(format!("failed to build HTTP client: {}", e)))?;

        let page_size = (self.config.page_size as usize).min(MAX_ARTICLES);
        let page_size_param = page_size.to_string();

        let response = client
            .get(&self.config.api_url)
            .query(&[
                ("country", self.config.country.as_str()),
                ("apiKey", api_key),
                ("pageSize", page_size_param.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "news request failed");
                PipelineError::Fetch(without_key(&e.to_string(), api_key))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<NewsErrorBody>(&body)
                .ok()
                .and_then(|b| b.message.or(b.code))
                .unwrap_or_else(|| body.trim().to_string());
            warn!(%status, "news API returned an error");
            return Err(PipelineError::Fetch(format!("{} - {}", status.as_u16(), detail)));
        }

        let raw: RawNewsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Fetch(format!("invalid JSON response: {}", e)))?;

        if raw.status != "ok" {
            let detail = raw
                .message
                .or(raw.code)
                .unwrap_or_else(|| format!("unexpected status '{}'", raw.status));
            return Err(PipelineError::Fetch(detail));
        }

        let mut news = NewsResponse {
            status: raw.status,
            total_results: raw.total_results,
            articles: raw.articles,
        };
        news.articles.truncate(page_size);
        info!(
            country = %self.config.country,
            total = news.total_results,
            kept = news.articles.len(),
            "fetched top headlines"
        );
        Ok(news)
    }
}

// reqwest includes the full URL (query string and key) in its errors.
fn without_key(message: &str, api_key: &str) -> String {
    message.replace(api_key, "***")
}
