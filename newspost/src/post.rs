use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::{LlmProvider, LlmRequest};
use crate::source::SourceText;

/// Low creativity keeps the tone consistent between regenerations.
pub const POST_TEMPERATURE: f32 = 0.6;

const EMBEDDED_POST_PROMPT: &str = include_str!("../prompts/post_system.txt");

/// Post copy returned by the model, trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GeneratedPost(String);

impl GeneratedPost {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GeneratedPost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct PostGenerator {
    provider: Arc<dyn LlmProvider>,
    prompt_path: Option<PathBuf>,
}

impl PostGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            prompt_path: None,
        }
    }

    /// Read the system instruction from this file instead of the embedded one.
    pub fn with_prompt_path(mut self, path: Option<PathBuf>) -> Self {
        self.prompt_path = path;
        self
    }

    pub async fn load_system_prompt(&self) -> Result<String> {
        match &self.prompt_path {
            Some(path) => {
                let data = tokio::fs::read_to_string(path).await.map_err(|e| {
                    warn!(path = %path.display(), error = %e, "cannot read post prompt");
                    PipelineError::Configuration(format!(
                        "Impossible de lire le prompt {} : {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(data.trim().to_string())
            }
            None => Ok(EMBEDDED_POST_PROMPT.trim().to_string()),
        }
    }

    pub async fn generate(&self, source: &SourceText) -> Result<GeneratedPost> {
        let system = self.load_system_prompt().await?;
        let prompt = format!(
            "Texte fourni :\n\n{}\n\nGénère le post eToro.",
            source.as_str()
        );

        let request = LlmRequest::new(system, prompt).with_temperature(POST_TEMPERATURE);
        let response = self.provider.generate(request).await?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(PipelineError::Provider(
                "le modèle a renvoyé un post vide".to_string(),
            ));
        }

        info!(
            model = %response.model,
            chars = text.chars().count(),
            tokens = response.usage.total_tokens,
            "post generated"
        );
        Ok(GeneratedPost(text.to_string()))
    }
}

#[cfg(test)]
pub(crate) fn post_for_tests(text: &str) -> GeneratedPost {
    GeneratedPost(text.to_string())
}
