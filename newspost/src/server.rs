use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::fs::{relative, FileServer, Options};
use rocket::http::{ContentType, Cookie, CookieJar, Header, Status};
use rocket::response::Redirect;
use rocket::serde::json::{self, Json};
use rocket::{delete, get, post, routes, Build, Responder, Rocket, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{Config, Credentials, ServerConfig};

use crate::error::PipelineError;
use crate::imaging::DOWNLOAD_FILE_NAME;
use crate::sessions::store::{SessionStore, SharedSession};
use crate::sessions::{SessionController, SessionState, SessionView};

const SESSION_COOKIE: &str = "newspost_session";

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub controller: Arc<SessionController>,
    pub sessions: Arc<SessionStore>,
    pub news_key_present: bool,
    pub llm_key_present: bool,
}

impl AppState {
    pub fn new(controller: SessionController, credentials: &Credentials) -> Self {
        Self {
            started_at: Utc::now(),
            controller: Arc::new(controller),
            sessions: Arc::new(SessionStore::new()),
            news_key_present: credentials.news_api_key.is_some(),
            llm_key_present: credentials.llm_api_key.is_some(),
        }
    }

    /// Replace the default store (2 h idle TTL, 1000 sessions).
    pub fn with_session_store(mut self, store: SessionStore) -> Self {
        self.sessions = Arc::new(store);
        self
    }

    /// Session for this browser, creating the cookie on first contact.
    fn session(&self, cookies: &CookieJar<'_>) -> SharedSession {
        self.sessions.get_or_create(session_id(cookies))
    }

    /// Session for this browser if it already has one. Never sets a cookie.
    fn existing_session(&self, cookies: &CookieJar<'_>) -> Option<SharedSession> {
        cookie_session_id(cookies).and_then(|id| self.sessions.get(id))
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    sessions: usize,
    news_api_key: bool,
    llm_api_key: bool,
}

/// Request body for post generation. Without `text`, the headlines are used.
#[derive(Debug, Default, Deserialize)]
struct GeneratePostRequest {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectPromptRequest {
    index: usize,
}

#[derive(Responder)]
#[response(content_type = "image/png")]
struct PngDownload {
    bytes: Vec<u8>,
    disposition: Header<'static>,
}

/// Errors come back with the full session view so earlier results stay on screen.
type ApiResult = Result<Json<SessionView>, (Status, Json<SessionView>)>;

fn cookie_session_id(cookies: &CookieJar<'_>) -> Option<Uuid> {
    cookies
        .get_private(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

fn session_id(cookies: &CookieJar<'_>) -> Uuid {
    if let Some(id) = cookie_session_id(cookies) {
        return id;
    }
    let id = Uuid::new_v4();
    cookies.add_private(Cookie::new(SESSION_COOKIE, id.to_string()));
    tracing::info!(session = %id, "new session");
    id
}

pub(crate) fn status_for(err: &PipelineError) -> Status {
    match err {
        PipelineError::Validation(_) => Status::BadRequest,
        PipelineError::Configuration(_) => Status::ServiceUnavailable,
        PipelineError::RateLimit => Status::TooManyRequests,
        PipelineError::ContentPolicy => Status::UnprocessableEntity,
        PipelineError::Connectivity | PipelineError::Fetch(_) | PipelineError::Provider(_) => {
            Status::BadGateway
        }
    }
}

fn respond(state: &SessionState, result: crate::error::Result<()>) -> ApiResult {
    match result {
        Ok(()) => Ok(Json(state.view())),
        Err(e) => Err((status_for(&e), Json(state.view()))),
    }
}

/// Redirect root to static index.html
#[get("/")]
async fn index_redirect() -> Redirect {
    Redirect::to("/static/index.html")
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(app: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - app.started_at).num_seconds(),
        sessions: app.sessions.len(),
        news_api_key: app.news_key_present,
        llm_api_key: app.llm_key_present,
    })
}

/// Read-only: a browser without a session gets the empty view, nothing is stored.
#[get("/api/v1/session")]
async fn get_session(app: &State<AppState>, cookies: &CookieJar<'_>) -> Json<SessionView> {
    let Some(session) = app.existing_session(cookies) else {
        return Json(SessionState::new().view());
    };
    let state = session.lock().await;
    Json(state.view())
}

#[delete("/api/v1/session")]
async fn reset_session(app: &State<AppState>, cookies: &CookieJar<'_>) -> Json<SessionView> {
    let session = app.session(cookies);
    let mut state = session.lock().await;
    state.reset();
    Json(state.view())
}

#[get("/api/v1/news?<refresh>")]
async fn load_news(
    app: &State<AppState>,
    cookies: &CookieJar<'_>,
    refresh: Option<bool>,
) -> ApiResult {
    let session = app.session(cookies);
    let mut state = session.lock().await;
    let result = app
        .controller
        .load_news(&mut state, refresh.unwrap_or(false))
        .await;
    respond(&state, result)
}

#[post("/api/v1/post", data = "<body>")]
async fn generate_post(
    app: &State<AppState>,
    cookies: &CookieJar<'_>,
    body: Result<Json<GeneratePostRequest>, json::Error<'_>>,
) -> ApiResult {
    let session = app.session(cookies);
    let mut state = session.lock().await;

    let request = match body {
        Ok(payload) => payload.into_inner(),
        // No body at all means "use the headlines".
        Err(json::Error::Parse(raw, _)) if raw.trim().is_empty() => GeneratePostRequest::default(),
        Err(e) => {
            let err = PipelineError::Validation(format!("Requête invalide : {}", e));
            state.record_post_error(err.clone());
            return respond(&state, Err(err));
        }
    };

    let result = match request.text {
        Some(text) => app.controller.generate_post_from_text(&mut state, &text).await,
        None => app.controller.generate_post_from_news(&mut state).await,
    };
    respond(&state, result)
}

#[post("/api/v1/prompts/select", data = "<body>")]
async fn select_prompt(
    app: &State<AppState>,
    cookies: &CookieJar<'_>,
    body: Json<SelectPromptRequest>,
) -> ApiResult {
    let session = app.session(cookies);
    let mut state = session.lock().await;
    let result = state.select_prompt(body.index);
    respond(&state, result)
}

#[post("/api/v1/image")]
async fn generate_image(app: &State<AppState>, cookies: &CookieJar<'_>) -> ApiResult {
    let session = app.session(cookies);
    let mut state = session.lock().await;
    let result = app.controller.generate_image(&mut state).await;
    respond(&state, result)
}

#[get("/api/v1/image")]
async fn image(app: &State<AppState>, cookies: &CookieJar<'_>) -> Option<(ContentType, Vec<u8>)> {
    let session = app.existing_session(cookies)?;
    let state = session.lock().await;
    state
        .image()
        .map(|img| (ContentType::PNG, img.bytes.clone()))
}

#[get("/api/v1/image/download")]
async fn download_image(app: &State<AppState>, cookies: &CookieJar<'_>) -> Option<PngDownload> {
    let session = app.existing_session(cookies)?;
    let state = session.lock().await;
    state.image().map(|img| PngDownload {
        bytes: img.bytes.clone(),
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", DOWNLOAD_FILE_NAME),
        ),
    })
}

/// Assemble the Rocket instance without launching it (tests use it with a
/// local client).
pub fn build_rocket(state: AppState, server: &ServerConfig) -> Rocket<Build> {
    let mut fig = rocket::Config::figment()
        .merge(("address", server.bind.clone()))
        .merge(("port", server.port));
    if let Some(key) = &server.secret_key {
        fig = fig.merge(("secret_key", key.clone()));
    }

    let static_dir = server
        .static_dir
        .clone()
        .unwrap_or_else(|| relative!("static").to_string());

    rocket::custom(fig)
        .manage(state)
        .mount(
            "/",
            routes![
                index_redirect,
                health,
                status,
                get_session,
                reset_session,
                load_news,
                generate_post,
                select_prompt,
                generate_image,
                image,
                download_image,
            ],
        )
        .mount("/static", FileServer::new(static_dir, Options::Index | Options::Missing))
}

/// Build and launch the Rocket server. Blocks until Rocket shuts down.
pub async fn launch_rocket(config: &Config, credentials: &Credentials) -> Result<()> {
    let controller = SessionController::from_config(config, credentials);
    let store = SessionStore::with_limits(
        Duration::from_secs(config.server.session_idle_minutes.saturating_mul(60)),
        config.server.max_sessions,
    );
    let state = AppState::new(controller, credentials).with_session_store(store);

    if !state.news_key_present {
        tracing::warn!(env = %config.news.api_key_env, "news API key not set, headlines disabled");
    }
    if !state.llm_key_present {
        tracing::warn!(env = %config.llm.api_key_env, "generation API key not set, post and image generation disabled");
    }

    tracing::info!(bind = %config.server.bind, port = config.server.port, "Starting Rocket HTTP server");
    build_rocket(state, &config.server)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
