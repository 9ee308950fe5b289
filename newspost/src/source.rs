use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::ingestion::{Article, MAX_ARTICLES};

/// Where the text handed to the post generator came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Pasted,
}

/// Validated, non-blank input for post generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    text: String,
    kind: SourceKind,
}

impl SourceText {
    /// Text pasted by the user.
    pub fn pasted(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "Le texte source est vide. Collez un texte avant de générer le post.".to_string(),
            ));
        }
        Ok(Self {
            text,
            kind: SourceKind::Pasted,
        })
    }

    /// One `- title : description` line per article (description omitted when absent).
    pub fn from_articles(articles: &[Article]) -> Result<Self> {
        let text = articles
            .iter()
            .take(MAX_ARTICLES)
            .map(|art| {
                let title = art.display_title();
                match art.description.as_deref().map(str::trim) {
                    Some(desc) if !desc.is_empty() => format!("- {} : {}", title, desc),
                    _ => format!("- {}", title),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "Aucune actualité disponible.".to_string(),
            ));
        }
        Ok(Self {
            text,
            kind: SourceKind::News,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}
