use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use common::LlmConfig;

use super::{ImageProvider, ImageRequest, LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use crate::error::{PipelineError, Result};

/// Remote provider for an OpenAI-compatible HTTP API: chat completions and
/// image generations share one key and one client.
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    image_model: String,
    default_timeout: Option<Duration>,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    /// `base_url` is the API root (chat goes to `{base_url}/chat/completions`).
    /// A `None` key is accepted here; every call then fails with a
    /// configuration error before touching the network.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: model.into(),
            image_model: "dall-e-3".to_string(),
            default_timeout: None,
            default_temperature: 0.7,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig, api_key: Option<String>) -> Self {
        Self::new(&config.api_url, api_key, &config.text_model)
            .with_image_model(&config.image_model)
            .with_key_env(&config.api_key_env)
            .with_timeout(config.timeout_seconds)
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    /// Name of the variable the key comes from, used in the error message.
    pub fn with_key_env(mut self, name: impl Into<String>) -> Self {
        self.api_key_env = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.default_timeout = timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PipelineError::missing_key(&self.api_key_env))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let api_key = self.api_key()?;

        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body);
        // Covers connect, headers and body.
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }

        let response = builder.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url, %status, "generation API returned an error");
            return Err(classify_api_error(status, &body));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .or(self.default_timeout);

        let temperature = request.temperature.unwrap_or(self.default_temperature);

        let mut messages = Vec::with_capacity(2);
        if !request.system.trim().is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: request.system,
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt,
        });

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: Some(temperature),
        };

        debug!(model = %self.model, temperature, "sending chat completion request");

        let response = self
            .post_json(&self.endpoint("chat/completions"), &req_body, timeout)
            .await?;

        let resp_body: OpenAiResponse = read_json(response).await?;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Provider("la réponse ne contient aucun choix".to_string()))?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[async_trait::async_trait]
impl ImageProvider for RemoteLlmProvider {
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<u8>> {
        let req_body = ImagesRequest {
            model: self.image_model.clone(),
            prompt: request.prompt,
            n: 1,
            size: request.size,
            quality: request.quality,
            response_format: "b64_json",
        };

        debug!(model = %self.image_model, size = %req_body.size, "sending image generation request");

        let response = self
            .post_json(&self.endpoint("images/generations"), &req_body, self.default_timeout)
            .await?;

        let resp_body: ImagesResponse = read_json(response).await?;

        let encoded = resp_body
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| PipelineError::Provider("aucune image renvoyée".to_string()))?;

        STANDARD
            .decode(encoded.trim())
            .map_err(|e| PipelineError::Provider(format!("image base64 invalide ({})", e)))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response.json().await.map_err(|e| {
        if e.is_timeout() {
            map_transport_error(e)
        } else {
            PipelineError::Provider(format!("réponse illisible ({})", e))
        }
    })
}

fn map_transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_connect() || err.is_timeout() {
        warn!(error = %err, "cannot reach generation API");
        PipelineError::Connectivity
    } else {
        PipelineError::Provider(err.to_string())
    }
}

/// Map an error response onto the closed error set.
pub(crate) fn classify_api_error(status: StatusCode, body: &str) -> PipelineError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .unwrap_or_default();

    let code = detail.code.as_ref().and_then(|c| c.as_str()).unwrap_or("");
    let kind = detail.kind.as_deref().unwrap_or("");
    let message = detail.message.clone().unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || code == "insufficient_quota" {
        return PipelineError::RateLimit;
    }

    if code == "content_policy_violation"
        || kind == "content_policy_violation"
        || message.to_lowercase().contains("safety system")
    {
        return PipelineError::ContentPolicy;
    }

    let message = if message.is_empty() {
        body.trim().to_string()
    } else {
        message
    };
    if message.is_empty() {
        PipelineError::Provider(status.to_string())
    } else {
        PipelineError::Provider(format!("{} - {}", status.as_u16(), message))
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ImagesRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    quality: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
    // Usually a string, sometimes null or numeric depending on the vendor
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}
