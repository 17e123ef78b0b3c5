// HTTP API tests
//
// Requests go straight into the router with tower's `oneshot`; the
// orchestrator behind it talks to the loopback agent.

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use lucidia_realtime::config::OpenAiConfig;
use lucidia_realtime::error::{SessionError, SessionResult};
use lucidia_realtime::generation::{
    JobSubmission, JobSubmitter, PromptBuilder, StatusDocument, StatusFetcher,
};
use lucidia_realtime::session::{Collaborators, OrchestratorConfig, SessionOrchestrator};
use lucidia_realtime::transport::{LoopbackBackend, LoopbackSignaling};
use lucidia_realtime::{create_router, AppState, SessionMinter};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Unavailable;

#[async_trait::async_trait]
impl PromptBuilder for Unavailable {
    async fn build_prompt(&self, _conversation: &str) -> SessionResult<String> {
        Err(SessionError::Prompt("offline".to_string()))
    }
}

#[async_trait::async_trait]
impl JobSubmitter for Unavailable {
    async fn submit(&self, _prompt: &str) -> SessionResult<JobSubmission> {
        Err(SessionError::Fetch("offline".to_string()))
    }
}

#[async_trait::async_trait]
impl StatusFetcher for Unavailable {
    async fn fetch(&self, _url: &str) -> SessionResult<StatusDocument> {
        Err(SessionError::Fetch("offline".to_string()))
    }
}

fn app() -> Router {
    let orchestrator = SessionOrchestrator::new(
        OrchestratorConfig::default(),
        Collaborators {
            backend: Arc::new(LoopbackBackend::default()),
            signaling: Arc::new(LoopbackSignaling::new()),
            prompts: Arc::new(Unavailable),
            jobs: Arc::new(Unavailable),
            status: Arc::new(Unavailable),
        },
    );
    let minter = SessionMinter::new(&OpenAiConfig {
        api_key: None,
        ..Default::default()
    });
    create_router(AppState::new(orchestrator, minter))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Vec<u8>)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec()))
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let (status, bytes) = send(app, method, uri, body).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
    Ok(())
}

#[tokio::test]
async fn test_initial_state() -> Result<()> {
    let app = app();
    let (status, body) = send_json(&app, Method::GET, "/conversation/state", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["connected"], false);
    assert_eq!(body["generating"], false);
    assert_eq!(body["poller"], "idle");
    Ok(())
}

#[tokio::test]
async fn test_controls_require_connection() -> Result<()> {
    let app = app();

    let (status, body) = send_json(&app, Method::POST, "/conversation/mute", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap_or_default().contains("Not connected"));

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/conversation/message",
        Some(json!({ "text": "hello" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_conversation_lifecycle() -> Result<()> {
    let app = app();

    let (status, body) = send_json(&app, Method::POST, "/conversation/start", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["state"]["recording"], true);

    let (status, body) = send_json(&app, Method::POST, "/conversation/mute", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["muted"], true);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/conversation/message",
        Some(json!({ "text": "I dreamt of a red door" })),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["muted"], true);

    let (status, body) = send_json(&app, Method::GET, "/conversation/transcript", None).await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body["entries"].as_array().cloned().unwrap_or_default();
    assert!(entries
        .iter()
        .any(|e| e["speaker"] == "user" && e["text"] == "I dreamt of a red door"));
    assert!(body["rendered"]
        .as_str()
        .unwrap_or_default()
        .contains("User: I dreamt of a red door"));

    let (status, body) = send_json(&app, Method::POST, "/conversation/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["status"], "disconnected");
    Ok(())
}

#[tokio::test]
async fn test_start_with_overrides() -> Result<()> {
    let app = app();

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/conversation/start",
        Some(json!({ "voice": "alloy" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(&app, Method::POST, "/conversation/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_empty_message_rejected() -> Result<()> {
    let app = app();
    send_json(&app, Method::POST, "/conversation/start", None).await?;

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/conversation/message",
        Some(json!({ "text": "   " })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_no_generation_job() -> Result<()> {
    let app = app();
    let (status, body) = send_json(&app, Method::GET, "/generation", None).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No generation job");
    Ok(())
}

#[tokio::test]
async fn test_realtime_session_without_key() -> Result<()> {
    let app = app();
    let (status, body) = send_json(&app, Method::GET, "/realtime/session", None).await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to create session");
    assert!(body["details"].is_string());
    Ok(())
}
