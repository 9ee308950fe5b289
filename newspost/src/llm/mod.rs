use crate::error::Result;

/// Chat-completion provider (remote or mocked in tests)
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate one completion for a system instruction + user message
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Image-generation provider returning decoded image bytes
#[async_trait::async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<u8>>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// System instruction; omitted from the request when empty
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// One square image request
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    /// e.g. "1024x1024"
    pub size: String,
    /// e.g. "standard"
    pub quality: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;
