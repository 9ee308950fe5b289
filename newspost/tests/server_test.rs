use std::sync::Arc;
use std::time::Duration;

use common::{Credentials, NewsConfig, ServerConfig};
use mockito::{Matcher, Server};
use newspost::image_prompts::ImagePromptGenerator;
use newspost::imaging::ImageGenerator;
use newspost::ingestion::NewsClient;
use newspost::llm::remote::RemoteLlmProvider;
use newspost::post::PostGenerator;
use newspost::server::{build_rocket, AppState};
use newspost::sessions::store::SessionStore;
use newspost::sessions::SessionController;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;

fn app_state_for(server: &Server, llm_key: Option<&str>) -> AppState {
    let credentials = Credentials {
        news_api_key: Some("news-key".to_string()),
        llm_api_key: llm_key.map(String::from),
    };
    let remote = Arc::new(RemoteLlmProvider::new(
        server.url(),
        credentials.llm_api_key.clone(),
        "gpt-4o-mini",
    ));
    let news = NewsClient::new(
        NewsConfig {
            api_url: format!("{}/v2/top-headlines", server.url()),
            ..NewsConfig::default()
        },
        credentials.news_api_key.clone(),
    );
    let controller = SessionController::new(
        news,
        PostGenerator::new(remote.clone()),
        ImagePromptGenerator::new(remote.clone()),
        ImageGenerator::new(remote),
    );

    AppState::new(controller, &credentials)
}

async fn client_for(server: &Server, llm_key: Option<&str>) -> Client {
    Client::tracked(build_rocket(app_state_for(server, llm_key), &ServerConfig::default()))
        .await
        .expect("valid rocket instance")
}

/// No cookie jar: every request looks like a first visit.
async fn cookieless_client(state: AppState) -> Client {
    Client::untracked(build_rocket(state, &ServerConfig::default()))
        .await
        .expect("valid rocket instance")
}

async fn session_count(client: &Client) -> u64 {
    let res = client.get("/api/v1/status").dispatch().await;
    let body: Value = res.into_json().await.expect("status json");
    body["sessions"].as_u64().unwrap_or(u64::MAX)
}

async fn mock_generation(server: &mut Server) {
    let chat = |content: &str| {
        serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    };

    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("Texte fourni".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat("Le CAC 40 signe sa meilleure semaine #Bourse"))
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("illustrer".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat(
            "1. Rising chart over Paris\n2. Bull statue in gold light\n3. Candlesticks on a screen",
        ))
        .create_async()
        .await;
    server
        .mock("POST", "/images/generations")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data": [{"b64_json": "iVBORw0KGgo="}]}"#)
        .create_async()
        .await;
}

#[tokio::test]
async fn test_health_and_status() {
    let server = Server::new_async().await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client.get("/health").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_string().await.as_deref(), Some("OK"));

    let res = client.get("/api/v1/status").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    let body: Value = res.into_json().await.expect("status json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["news_api_key"], true);
    assert_eq!(body["llm_api_key"], true);
}

#[tokio::test]
async fn test_pasted_text_to_download() {
    let mut server = Server::new_async().await;
    mock_generation(&mut server).await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client
        .post("/api/v1/post")
        .header(ContentType::JSON)
        .body(r#"{"text": "Le CAC 40 gagne 3 % sur la semaine."}"#)
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["phase"], "prompts_ready");
    assert_eq!(view["source_kind"], "pasted");
    assert_eq!(view["post"], "Le CAC 40 signe sa meilleure semaine #Bourse");
    assert_eq!(view["prompts"].as_array().map(Vec::len), Some(3));
    assert_eq!(view["selected_prompt"], Value::Null);

    // No image yet.
    let res = client.get("/api/v1/image/download").dispatch().await;
    assert_eq!(res.status(), Status::NotFound);

    let res = client
        .post("/api/v1/prompts/select")
        .header(ContentType::JSON)
        .body(r#"{"index": 1}"#)
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);

    let res = client.post("/api/v1/image").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["phase"], "image_ready");
    assert_eq!(view["has_image"], true);
    assert_eq!(view["selected_prompt"], 1);

    let res = client.get("/api/v1/image/download").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.content_type(), Some(ContentType::PNG));
    assert_eq!(
        res.headers().get_one("Content-Disposition"),
        Some("attachment; filename=\"post_etoro.png\"")
    );
    let bytes = res.into_bytes().await.expect("png bytes");
    assert_eq!(&bytes[1..4], b"PNG");
}

#[tokio::test]
async fn test_blank_text_is_a_bad_request() {
    let server = Server::new_async().await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client
        .post("/api/v1/post")
        .header(ContentType::JSON)
        .body(r#"{"text": "   "}"#)
        .dispatch()
        .await;

    assert_eq!(res.status(), Status::BadRequest);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["phase"], "error");
    assert_eq!(view["post_error"]["kind"], "validation");
}

#[tokio::test]
async fn test_missing_generation_key_is_reported() {
    let server = Server::new_async().await;
    let client = client_for(&server, None).await;

    let res = client
        .post("/api/v1/post")
        .header(ContentType::JSON)
        .body(r#"{"text": "Le pétrole recule."}"#)
        .dispatch()
        .await;

    assert_eq!(res.status(), Status::ServiceUnavailable);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["post_error"]["kind"], "configuration");
    assert!(view["post_error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("OPENAI_API_KEY"));
}

#[tokio::test]
async fn test_invalid_selection_and_reset() {
    let mut server = Server::new_async().await;
    mock_generation(&mut server).await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client
        .post("/api/v1/prompts/select")
        .header(ContentType::JSON)
        .body(r#"{"index": 0}"#)
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);

    client
        .post("/api/v1/post")
        .header(ContentType::JSON)
        .body(r#"{"text": "Le CAC 40 gagne 3 %."}"#)
        .dispatch()
        .await;

    let res = client
        .post("/api/v1/prompts/select")
        .header(ContentType::JSON)
        .body(r#"{"index": 7}"#)
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["selected_prompt"], Value::Null);
    assert_eq!(view["phase"], "prompts_ready");

    let res = client.delete("/api/v1/session").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["phase"], "no_post");
    assert_eq!(view["post"], Value::Null);
}

#[tokio::test]
async fn test_reading_the_session_stores_nothing() {
    let server = Server::new_async().await;
    let client = cookieless_client(app_state_for(&server, Some("llm-key"))).await;

    for _ in 0..50 {
        let res = client.get("/api/v1/session").dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        assert!(res.cookies().get("newspost_session").is_none());
        let view: Value = res.into_json().await.expect("session json");
        assert_eq!(view["phase"], "no_post");
    }
    assert_eq!(client.get("/api/v1/image").dispatch().await.status(), Status::NotFound);

    assert_eq!(session_count(&client).await, 0);
}

#[tokio::test]
async fn test_session_count_is_bounded() {
    let server = Server::new_async().await;
    let state = app_state_for(&server, Some("llm-key"))
        .with_session_store(SessionStore::with_limits(Duration::from_secs(3600), 3));
    let client = cookieless_client(state).await;

    for _ in 0..10 {
        client
            .post("/api/v1/post")
            .header(ContentType::JSON)
            .body(r#"{"text": " "}"#)
            .dispatch()
            .await;
    }

    assert_eq!(session_count(&client).await, 3);
}

#[tokio::test]
async fn test_malformed_body_is_rejected_without_fetching_news() {
    let mut server = Server::new_async().await;
    let news = server
        .mock("GET", "/v2/top-headlines")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client
        .post("/api/v1/post")
        .header(ContentType::JSON)
        .body(r#"{"text": "Le CAC 40"#)
        .dispatch()
        .await;

    assert_eq!(res.status(), Status::BadRequest);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["post_error"]["kind"], "validation");
    assert_eq!(view["phase"], "error");

    news.assert_async().await;
}

#[tokio::test]
async fn test_empty_body_uses_the_headlines() {
    let mut server = Server::new_async().await;
    let news = server
        .mock("GET", "/v2/top-headlines")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status": "ok", "totalResults": 1, "articles": [{"source": {"name": "Les Echos"}, "title": "Le CAC 40 grimpe", "description": null}]}"#,
        )
        .expect(1)
        .create_async()
        .await;
    mock_generation(&mut server).await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client.post("/api/v1/post").dispatch().await;

    assert_eq!(res.status(), Status::Ok);
    let view: Value = res.into_json().await.expect("session json");
    assert_eq!(view["source_kind"], "news");
    assert_eq!(view["articles"][0]["title"], "Le CAC 40 grimpe");

    news.assert_async().await;
}

#[tokio::test]
async fn test_page_never_injects_markup() {
    let server = Server::new_async().await;
    let client = client_for(&server, Some("llm-key")).await;

    let res = client.get("/static/index.html").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    let page = res.into_string().await.expect("page body");

    assert!(!page.contains("innerHTML"));
    assert!(!page.contains("insertAdjacentHTML"));
    assert!(page.contains("textContent"));
}
