use std::sync::Arc;
use tracing::info;

use common::LlmConfig;

use crate::error::{PipelineError, Result};
use crate::llm::{ImageProvider, ImageRequest};

/// File name offered when the image is downloaded.
pub const DOWNLOAD_FILE_NAME: &str = "post_etoro.png";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Raw bytes of one generated illustration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn is_png(&self) -> bool {
        self.bytes.starts_with(&PNG_SIGNATURE)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub struct ImageGenerator {
    provider: Arc<dyn ImageProvider>,
    size: String,
    quality: String,
}

impl ImageGenerator {
    /// One square, standard-quality image per call.
    pub fn new(provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            provider,
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
        }
    }

    pub fn from_config(provider: Arc<dyn ImageProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            size: config.image_size.clone(),
            quality: config.image_quality.clone(),
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::Validation(
                "Le prompt d'image est vide.".to_string(),
            ));
        }

        let bytes = self
            .provider
            .generate_image(ImageRequest {
                prompt: prompt.to_string(),
                size: self.size.clone(),
                quality: self.quality.clone(),
            })
            .await?;

        if bytes.is_empty() {
            return Err(PipelineError::Provider("image vide".to_string()));
        }

        let image = GeneratedImage { bytes };
        info!(bytes = image.len(), png = image.is_png(), "image generated");
        Ok(image)
    }
}
