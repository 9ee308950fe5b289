//! Three illustration prompts derived from a generated post.
//!
//! The model is asked for a numbered list, but its formatting drifts, so the
//! raw text goes through [`parse_prompt_variants`], which always yields three
//! usable prompts.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::{LlmProvider, LlmRequest};
use crate::post::GeneratedPost;

pub const PROMPT_TEMPERATURE: f32 = 0.8;

/// Characters of the post included in the request.
pub const MAX_POST_CHARS: usize = 1500;

/// Variants shorter than this (after stripping the marker) are dropped.
pub const MIN_VARIANT_CHARS: usize = 6;

pub const PROMPT_COUNT: usize = 3;

/// Prepended to every prompt sent to the image model.
pub const STYLE_PREFIX: &str = "Professional financial infographic, clean minimalist design, \
charts and trend lines, corporate blue palette, no text, no faces. ";

const SYSTEM_INSTRUCTION: &str = "Tu crées des prompts pour DALL-E 3. Propose EXACTEMENT 3 variantes \
distinctes, numérotées « 1. », « 2. » et « 3. », une par ligne. Chaque variante est rédigée en anglais, \
en 2-3 phrases maximum, et décrit une scène différente. Style : infographie professionnelle, \
finance/investissement, design épuré, graphiques, tendances. Pas de texte dans l'image. Pas de visages. \
Réponds UNIQUEMENT par la liste.";

const MARKERS: [&str; 9] = ["1.", "2.", "3.", "1)", "2)", "3)", "(1)", "(2)", "(3)"];

/// Exactly three prompts, each starting with the style prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImagePromptOptions([String; PROMPT_COUNT]);

impl ImagePromptOptions {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for ImagePromptOptions {
    /// Three bare style prefixes, what a fully unusable model answer yields.
    fn default() -> Self {
        Self(parse_prompt_variants("", STYLE_PREFIX))
    }
}

/// Parse a numbered list out of free-form model output.
///
/// Lines starting with `1.`/`2.`/`3.`, `1)`..`3)` or `(1)`..`(3)` qualify
/// (leading whitespace ignored). The marker and any punctuation or whitespace
/// after it are stripped, as are trailing emphasis marks and quotes. Short
/// variants are discarded, and the rest are
/// prefixed. Missing entries are filled with the bare prefix; extras are cut.
/// Variants keep their textual order, even when the numerals are out of order.
pub fn parse_prompt_variants(raw: &str, prefix: &str) -> [String; PROMPT_COUNT] {
    let mut variants: Vec<String> = raw
        .lines()
        .filter_map(strip_marker)
        .filter(|v| v.chars().count() >= MIN_VARIANT_CHARS)
        .map(|v| format!("{}{}", prefix, v))
        .take(PROMPT_COUNT)
        .collect();

    while variants.len() < PROMPT_COUNT {
        variants.push(prefix.to_string());
    }

    let mut out = variants.into_iter();
    [(); PROMPT_COUNT].map(|_| out.next().unwrap_or_default())
}

fn strip_marker(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let rest = MARKERS.iter().find_map(|m| line.strip_prefix(m))?;
    Some(
        rest.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '"' | '`')),
    )
}

/// Cut to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct ImagePromptGenerator {
    provider: Arc<dyn LlmProvider>,
    prefix: String,
}

impl ImagePromptGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            prefix: STYLE_PREFIX.to_string(),
        }
    }

    pub async fn generate(&self, post: &GeneratedPost) -> Result<ImagePromptOptions> {
        let excerpt = truncate_chars(post.as_str(), MAX_POST_CHARS);
        let request = LlmRequest::new(
            SYSTEM_INSTRUCTION,
            format!("Post eToro à illustrer :\n\n{}", excerpt),
        )
        .with_temperature(PROMPT_TEMPERATURE);

        let response = self.provider.generate(request).await?;
        let prompts = parse_prompt_variants(&response.content, &self.prefix);

        let padded = prompts.iter().filter(|p| p.as_str() == self.prefix).count();
        if padded > 0 {
            warn!(padded, "model returned fewer than 3 usable variants");
        }
        info!(model = %response.model, "image prompts generated");

        Ok(ImagePromptOptions(prompts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: &str = "STYLE: ";

    #[test]
    fn skips_unnumbered_lines() {
        let raw = "1. cat on chart\n2. bull market\nnot numbered\n3. line graph";
        assert_eq!(
            parse_prompt_variants(raw, P),
            [
                "STYLE: cat on chart".to_string(),
                "STYLE: bull market".to_string(),
                "STYLE: line graph".to_string(),
            ]
        );
    }

    #[test]
    fn pads_with_bare_prefix() {
        let raw = "Voici une idée :\n1. A rising green candlestick chart over Paris";
        let out = parse_prompt_variants(raw, P);
        assert_eq!(out[0], "STYLE: A rising green candlestick chart over Paris");
        assert_eq!(out[1], P);
        assert_eq!(out[2], P);
    }

    #[test]
    fn empty_or_malformed_output_still_gives_three() {
        for raw in ["", "no list at all", "4. out of range\n- bullet"] {
            let out = parse_prompt_variants(raw, P);
            assert!(out.iter().all(|p| p == P), "input {:?}", raw);
        }
    }

    #[test]
    fn paren_markers_and_punctuation_are_stripped() {
        let raw = "  1) - Euro coins stacked\n(2): **Bull and bear statue**\n3.   \"Globe with arrows\"";
        let out = parse_prompt_variants(raw, P);
        assert_eq!(out[0], "STYLE: Euro coins stacked");
        assert_eq!(out[1], "STYLE: Bull and bear statue");
        assert_eq!(out[2], "STYLE: Globe with arrows");
    }

    #[test]
    fn closing_markdown_and_quotes_are_trimmed() {
        let raw = "1. *Euro coins on a desk*\n2. `Bull statue at dawn` \n3. \"Stock ticker on a wall\"";
        let out = parse_prompt_variants(raw, P);
        assert_eq!(out[0], "STYLE: Euro coins on a desk");
        assert_eq!(out[1], "STYLE: Bull statue at dawn");
        assert_eq!(out[2], "STYLE: Stock ticker on a wall");
    }

    #[test]
    fn short_variants_are_discarded() {
        let raw = "1. bull\n2. ok.\n3. A long enough description";
        let out = parse_prompt_variants(raw, P);
        assert_eq!(out[0], "STYLE: A long enough description");
        assert_eq!(out[1], P);
    }

    #[test]
    fn extra_variants_are_truncated_in_textual_order() {
        let raw = "2. second scene here\n1. first scene here\n3. third scene here\n1. another first scene";
        let out = parse_prompt_variants(raw, P);
        assert_eq!(out[0], "STYLE: second scene here");
        assert_eq!(out[1], "STYLE: first scene here");
        assert_eq!(out[2], "STYLE: third scene here");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(2000);
        let cut = truncate_chars(&text, MAX_POST_CHARS);
        assert_eq!(cut.chars().count(), MAX_POST_CHARS);
        assert_eq!(truncate_chars("court", MAX_POST_CHARS), "court");
    }
}
