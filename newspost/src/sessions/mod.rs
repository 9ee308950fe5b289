use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use common::{Config, Credentials};

use crate::error::{PipelineError, Result};
use crate::image_prompts::{ImagePromptGenerator, ImagePromptOptions, PROMPT_COUNT};
use crate::imaging::{GeneratedImage, ImageGenerator};
use crate::ingestion::{Article, NewsClient};
use crate::llm::remote::RemoteLlmProvider;
use crate::post::{GeneratedPost, PostGenerator};
use crate::source::{SourceKind, SourceText};

pub mod store;

/// Where a session is in the post → prompts → image flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoPost,
    PostGenerated,
    PromptsReady,
    ImageReady,
    /// Post generation failed and there is no earlier post to show
    Error,
}

/// Everything one user has produced so far. Lives only in memory.
#[derive(Debug, Clone)]
pub struct SessionState {
    created_at: DateTime<Utc>,
    articles: Option<Vec<Article>>,
    source_kind: Option<SourceKind>,
    post: Option<GeneratedPost>,
    prompts: Option<ImagePromptOptions>,
    selected: Option<usize>,
    image: Option<GeneratedImage>,
    news_error: Option<PipelineError>,
    post_error: Option<PipelineError>,
    image_error: Option<PipelineError>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            articles: None,
            source_kind: None,
            post: None,
            prompts: None,
            selected: None,
            image: None,
            news_error: None,
            post_error: None,
            image_error: None,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        match (&self.post, &self.prompts, &self.image) {
            (None, _, _) if self.post_error.is_some() => Phase::Error,
            (None, _, _) => Phase::NoPost,
            (Some(_), _, Some(_)) => Phase::ImageReady,
            (Some(_), Some(_), None) => Phase::PromptsReady,
            (Some(_), None, None) => Phase::PostGenerated,
        }
    }

    pub fn articles(&self) -> Option<&[Article]> {
        self.articles.as_deref()
    }

    pub fn post(&self) -> Option<&GeneratedPost> {
        self.post.as_ref()
    }

    pub fn prompts(&self) -> Option<&ImagePromptOptions> {
        self.prompts.as_ref()
    }

    pub fn selected_prompt(&self) -> Option<usize> {
        self.selected
    }

    pub fn image(&self) -> Option<&GeneratedImage> {
        self.image.as_ref()
    }

    pub fn news_error(&self) -> Option<&PipelineError> {
        self.news_error.as_ref()
    }

    pub fn post_error(&self) -> Option<&PipelineError> {
        self.post_error.as_ref()
    }

    pub fn image_error(&self) -> Option<&PipelineError> {
        self.image_error.as_ref()
    }

    /// Record which prompt variant the user picked. Nothing else changes.
    pub fn select_prompt(&mut self, index: usize) -> Result<()> {
        if self.prompts.is_none() {
            return Err(PipelineError::Validation(
                "Aucun prompt disponible : générez d'abord le post.".to_string(),
            ));
        }
        if index >= PROMPT_COUNT {
            return Err(PipelineError::Validation(format!(
                "Choix de prompt invalide ({}), valeurs possibles : 0 à {}.",
                index,
                PROMPT_COUNT - 1
            )));
        }
        self.selected = Some(index);
        Ok(())
    }

    /// Record a post failure detected before any generation call.
    pub(crate) fn record_post_error(&mut self, err: PipelineError) {
        self.post_error = Some(err);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replace the post and drop everything derived from the previous one.
    fn replace_post(&mut self, post: GeneratedPost, kind: SourceKind) {
        self.post = Some(post);
        self.source_kind = Some(kind);
        self.post_error = None;
        self.prompts = None;
        self.selected = None;
        self.image = None;
        self.image_error = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase(),
            created_at: self.created_at,
            articles: self
                .articles
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(ArticleView::from)
                .collect(),
            source_kind: self.source_kind,
            post: self.post.as_ref().map(|p| p.as_str().to_string()),
            prompts: self
                .prompts
                .as_ref()
                .map(|p| p.iter().map(String::from).collect()),
            selected_prompt: self.selected,
            has_image: self.image.is_some(),
            image_bytes: self.image.as_ref().map(GeneratedImage::len),
            news_error: self.news_error.as_ref().map(ErrorView::from),
            post_error: self.post_error.as_ref().map(ErrorView::from),
            image_error: self.image_error.as_ref().map(ErrorView::from),
        }
    }
}

/// JSON rendering of a session for the page.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub articles: Vec<ArticleView>,
    pub source_kind: Option<SourceKind>,
    pub post: Option<String>,
    pub prompts: Option<Vec<String>>,
    pub selected_prompt: Option<usize>,
    pub has_image: bool,
    pub image_bytes: Option<usize>,
    pub news_error: Option<ErrorView>,
    pub post_error: Option<ErrorView>,
    pub image_error: Option<ErrorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleView {
    pub title: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub published: Option<NaiveDate>,
}

impl From<&Article> for ArticleView {
    fn from(art: &Article) -> Self {
        Self {
            title: art.display_title().to_string(),
            description: art.description.clone().filter(|d| !d.trim().is_empty()),
            source: art.source_name().map(String::from),
            published: art.published_date(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ErrorView {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Drives one session through the pipeline. Holds the collaborators; the
/// state itself is passed in by the caller for every action.
pub struct SessionController {
    news: NewsClient,
    posts: PostGenerator,
    prompts: ImagePromptGenerator,
    images: ImageGenerator,
}

impl SessionController {
    pub fn new(
        news: NewsClient,
        posts: PostGenerator,
        prompts: ImagePromptGenerator,
        images: ImageGenerator,
    ) -> Self {
        Self {
            news,
            posts,
            prompts,
            images,
        }
    }

    /// Wire the remote providers from configuration. Missing keys are kept
    /// as `None` so only the operations needing them fail.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let remote = Arc::new(RemoteLlmProvider::from_config(
            &config.llm,
            credentials.llm_api_key.clone(),
        ));

        let news = NewsClient::new(config.news.clone(), credentials.news_api_key.clone());
        let posts = PostGenerator::new(remote.clone())
            .with_prompt_path(config.llm.post_prompt_path.as_ref().map(PathBuf::from));
        let prompts = ImagePromptGenerator::new(remote.clone());
        let images = ImageGenerator::from_config(remote, &config.llm);

        Self::new(news, posts, prompts, images)
    }

    /// Fetch headlines once per session; `refresh` forces a new fetch.
    pub async fn load_news(&self, state: &mut SessionState, refresh: bool) -> Result<()> {
        if state.articles.is_some() && !refresh {
            return Ok(());
        }

        match self.news.fetch_top_headlines().await {
            Ok(news) => {
                state.articles = Some(news.articles);
                state.news_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "loading headlines failed");
                state.news_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Generate a post from the session's headlines, fetching them if needed.
    /// A failed fetch also counts as a failed post generation.
    pub async fn generate_post_from_news(&self, state: &mut SessionState) -> Result<()> {
        if let Err(e) = self.load_news(state, false).await {
            state.post_error = Some(e.clone());
            return Err(e);
        }
        let articles = state.articles.as_deref().unwrap_or_default();
        match SourceText::from_articles(articles) {
            Ok(source) => self.generate_post(state, source).await,
            Err(e) => {
                state.post_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Generate a post from text pasted by the user.
    pub async fn generate_post_from_text(&self, state: &mut SessionState, text: &str) -> Result<()> {
        match SourceText::pasted(text) {
            Ok(source) => self.generate_post(state, source).await,
            Err(e) => {
                state.post_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Generate the post, then immediately its three image prompts.
    ///
    /// A post failure leaves every earlier result in place. A prompt failure
    /// after a successful post is recorded as the image error and does not
    /// fail the action.
    pub async fn generate_post(&self, state: &mut SessionState, source: SourceText) -> Result<()> {
        let post = match self.posts.generate(&source).await {
            Ok(post) => post,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "post generation failed");
                state.post_error = Some(e.clone());
                return Err(e);
            }
        };

        state.replace_post(post, source.kind());
        info!(source = ?source.kind(), "post stored in session");

        if let Some(post) = state.post.as_ref() {
            match self.prompts.generate(post).await {
                Ok(options) => state.prompts = Some(options),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "image prompt generation failed");
                    state.image_error = Some(e);
                }
            }
        }
        Ok(())
    }

    /// Generate the image for the selected prompt. Post and prompts stay
    /// intact whatever happens.
    pub async fn generate_image(&self, state: &mut SessionState) -> Result<()> {
        let prompt = match (state.prompts.as_ref(), state.selected) {
            (None, _) => Err(PipelineError::Validation(
                "Aucun prompt disponible : générez d'abord le post.".to_string(),
            )),
            (Some(_), None) => Err(PipelineError::Validation(
                "Sélectionnez un prompt avant de générer l'image.".to_string(),
            )),
            (Some(options), Some(index)) => options.get(index).map(String::from).ok_or_else(|| {
                PipelineError::Validation(format!("Choix de prompt invalide ({}).", index))
            }),
        };

        let result = match prompt {
            Ok(prompt) => self.images.generate(&prompt).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(image) => {
                state.image = Some(image);
                state.image_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "image generation failed");
                state.image_error = Some(e.clone());
                Err(e)
            }
        }
    }
}
