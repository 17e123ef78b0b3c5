// HTTP client tests against local axum fakes
//
// Each test binds a throwaway server on 127.0.0.1:0 that plays the remote
// endpoint, then checks both what the client sent and how it read the reply.

use anyhow::Result;
use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use lucidia_realtime::config::OpenAiConfig;
use lucidia_realtime::error::SessionError;
use lucidia_realtime::generation::{
    ChatCompletionsPromptBuilder, HttpJobSubmitter, HttpStatusFetcher, JobSubmitter,
    PromptBuilder, StatusFetcher,
};
use lucidia_realtime::transport::{HttpSignaling, SessionDescription, Signaling};
use lucidia_realtime::SessionMinter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone, Default)]
struct Captured {
    authorization: Option<String>,
    content_type: Option<String>,
    query: HashMap<String, String>,
    body: String,
}

fn capture(headers: &HeaderMap, query: HashMap<String, String>, body: String) -> Captured {
    let value_of = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Captured {
        authorization: value_of(header::AUTHORIZATION),
        content_type: value_of(header::CONTENT_TYPE),
        query,
        body,
    }
}

const ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

// ============================================================================
// Signaling
// ============================================================================

#[tokio::test]
async fn test_fetch_credential() -> Result<()> {
    let base = serve(Router::new().route(
        "/session",
        get(|| async {
            Json(json!({
                "id": "sess_123",
                "client_secret": { "value": "ek_abc", "expires_at": 1735689600 }
            }))
        }),
    ))
    .await;

    let signaling = HttpSignaling::new(format!("{}/session", base), format!("{}/realtime", base));
    let credential = signaling.fetch_credential().await?;

    assert_eq!(credential.value, "ek_abc");
    assert_eq!(credential.expires_at, Some(1735689600));
    assert_eq!(credential.id.as_deref(), Some("sess_123"));
    Ok(())
}

#[tokio::test]
async fn test_fetch_credential_failure_status() {
    let base = serve(Router::new().route(
        "/session",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await;

    let signaling = HttpSignaling::new(format!("{}/session", base), format!("{}/realtime", base));
    let err = signaling.fetch_credential().await.unwrap_err();

    match err {
        SessionError::Credential(message) => {
            assert_eq!(message, "Failed to get session token: 500")
        }
        other => panic!("expected credential error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exchange_posts_offer_with_bearer_credential() -> Result<()> {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let sink = captured.clone();
    let base = serve(Router::new().route(
        "/realtime",
        post(
            move |headers: HeaderMap, Query(query): Query<HashMap<String, String>>, body: String| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = capture(&headers, query, body);
                    ANSWER_SDP
                }
            },
        ),
    ))
    .await;

    let signaling = HttpSignaling::new(format!("{}/session", base), format!("{}/realtime", base));
    let credential = lucidia_realtime::transport::parse_credential(
        r#"{"client_secret":{"value":"ek_abc"}}"#,
    )?;
    let offer = SessionDescription::offer("v=0\r\no=- offer\r\n");

    let answer = signaling
        .exchange(&credential, "gpt-4o-realtime-preview-2024-12-17", &offer)
        .await?;
    assert_eq!(answer.sdp, ANSWER_SDP);

    let request = captured.lock().unwrap().clone();
    assert_eq!(request.authorization.as_deref(), Some("Bearer ek_abc"));
    assert_eq!(request.content_type.as_deref(), Some("application/sdp"));
    assert_eq!(
        request.query.get("model").map(String::as_str),
        Some("gpt-4o-realtime-preview-2024-12-17")
    );
    assert_eq!(request.body, "v=0\r\no=- offer\r\n");
    Ok(())
}

#[tokio::test]
async fn test_exchange_rejected() -> Result<()> {
    let base = serve(Router::new().route(
        "/realtime",
        post(|| async { (StatusCode::UNAUTHORIZED, "unauthorized") }),
    ))
    .await;

    let signaling = HttpSignaling::new(format!("{}/session", base), format!("{}/realtime", base));
    let credential =
        lucidia_realtime::transport::parse_credential(r#"{"client_secret":{"value":"ek"}}"#)?;
    let err = signaling
        .exchange(&credential, "m", &SessionDescription::offer("v=0\r\n"))
        .await
        .unwrap_err();

    match err {
        SessionError::Negotiation(message) => assert!(message.contains("401")),
        other => panic!("expected negotiation error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_exchange_malformed_answer() -> Result<()> {
    let base = serve(Router::new().route(
        "/realtime",
        post(|| async { "<html>gateway error</html>" }),
    ))
    .await;

    let signaling = HttpSignaling::new(format!("{}/session", base), format!("{}/realtime", base));
    let credential =
        lucidia_realtime::transport::parse_credential(r#"{"client_secret":{"value":"ek"}}"#)?;
    let err = signaling
        .exchange(&credential, "m", &SessionDescription::offer("v=0\r\n"))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Negotiation(_)));
    Ok(())
}

// ============================================================================
// Generation endpoints
// ============================================================================

#[tokio::test]
async fn test_status_fetcher_reads_document() -> Result<()> {
    let base = serve(Router::new().route(
        "/metadata/job.json",
        get(|| async {
            Json(json!({
                "id": "20250101_120000",
                "status": "processing",
                "image_status": "completed",
                "image_url": "http://localhost:5000/files/a.png",
                "ply_status": "generating",
                "image_path": "/srv/files/a.png"
            }))
        }),
    ))
    .await;

    let document = HttpStatusFetcher::new()
        .fetch(&format!("{}/metadata/job.json", base))
        .await?;

    assert_eq!(
        document.completed_image_url(),
        Some("http://localhost:5000/files/a.png")
    );
    assert_eq!(document.completed_model_url(), None);
    assert!(document.extra.contains_key("image_path"));
    Ok(())
}

#[tokio::test]
async fn test_status_fetcher_error_status() {
    let base = serve(Router::new()).await;

    let err = HttpStatusFetcher::new()
        .fetch(&format!("{}/metadata/missing.json", base))
        .await
        .unwrap_err();

    match err {
        SessionError::Fetch(message) => {
            assert!(message.starts_with("Failed to fetch metadata: 404"))
        }
        other => panic!("expected fetch error, got {:?}", other),
    }
}

/// Endpoint that answers long after any sane timeout
async fn hanging(path: &str) -> String {
    let base = serve(Router::new().route(
        path,
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "late"
        })
        .post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "late"
        }),
    ))
    .await;
    format!("{}{}", base, path)
}

#[tokio::test]
async fn test_hanging_credential_endpoint_times_out() {
    let url = hanging("/session").await;
    let signaling =
        HttpSignaling::new(url, "http://127.0.0.1:9/realtime").with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = signaling.fetch_credential().await.unwrap_err();

    assert!(matches!(err, SessionError::Credential(_)), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_hanging_status_endpoint_times_out() {
    let url = hanging("/metadata/job.json").await;

    let started = Instant::now();
    let err = HttpStatusFetcher::new()
        .with_timeout(Duration::from_millis(100))
        .fetch(&url)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Fetch(_)), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_job_submitter_accepts_server_field_names() -> Result<()> {
    let captured = Arc::new(Mutex::new(Value::Null));
    let sink = captured.clone();
    let base = serve(Router::new().route(
        "/generate-image",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = body;
                Json(json!({
                    "id": "20250101_120000",
                    "metadata_url": "http://localhost:5000/metadata/m.json",
                    "expected_image_url": "http://localhost:5000/files/a.png",
                    "expected_ply_url": "http://localhost:5000/files/a.ply",
                    "status": "processing"
                }))
            }
        }),
    ))
    .await;

    let submission = HttpJobSubmitter::new(format!("{}/generate-image", base))
        .submit("A lighthouse on a floating island")
        .await?;

    assert_eq!(
        *captured.lock().unwrap(),
        json!({ "prompt": "A lighthouse on a floating island" })
    );
    assert_eq!(submission.id, "20250101_120000");
    assert_eq!(
        submission.status_url.as_deref(),
        Some("http://localhost:5000/metadata/m.json")
    );
    assert_eq!(
        submission.expected_model_url.as_deref(),
        Some("http://localhost:5000/files/a.ply")
    );
    Ok(())
}

#[tokio::test]
async fn test_job_submitter_requires_status_url() {
    let base = serve(Router::new().route(
        "/generate-image",
        post(|| async { Json(json!({ "id": "x", "status": "processing" })) }),
    ))
    .await;

    let err = HttpJobSubmitter::new(format!("{}/generate-image", base))
        .submit("prompt")
        .await
        .unwrap_err();

    match err {
        SessionError::Fetch(message) => assert_eq!(message, "No metadata URL returned from API"),
        other => panic!("expected fetch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prompt_builder_request_and_response() -> Result<()> {
    let captured = Arc::new(Mutex::new((None::<String>, Value::Null)));
    let sink = captured.clone();
    let base = serve(Router::new().route(
        "/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *sink.lock().unwrap() = (auth, body);
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "  A violet forest at dusk  " } }]
                }))
            }
        }),
    ))
    .await;

    let builder = ChatCompletionsPromptBuilder::new(
        base,
        Some("sk-test".to_string()),
        "gpt-4o-2024-05-13",
        "Describe the dream",
    );
    let prompt = builder
        .build_prompt("User: I was in a forest\n\nAI: What colour was it?")
        .await?;
    assert_eq!(prompt, "A violet forest at dusk");

    let (auth, body) = captured.lock().unwrap().clone();
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-4o-2024-05-13");
    assert_eq!(body["temperature"], 0.7);
    assert_eq!(body["max_tokens"], 500);
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap_or_default();
    assert!(user.starts_with("Describe the dream"));
    assert!(user.contains("User: I was in a forest"));
    Ok(())
}

#[tokio::test]
async fn test_prompt_builder_rejects_empty_choices() {
    let base = serve(Router::new().route(
        "/chat/completions",
        post(|| async { Json(json!({ "choices": [] })) }),
    ))
    .await;

    let builder = ChatCompletionsPromptBuilder::new(base, None, "m", "i");
    let err = builder.build_prompt("User: hi").await.unwrap_err();

    assert!(matches!(err, SessionError::Prompt(_)));
}

// ============================================================================
// Credential minting
// ============================================================================

fn openai_config(base: String, key: Option<&str>) -> OpenAiConfig {
    OpenAiConfig {
        api_base: base,
        api_key: key.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_minter_relays_session() -> Result<()> {
    let captured = Arc::new(Mutex::new((None::<String>, Value::Null)));
    let sink = captured.clone();
    let base = serve(Router::new().route(
        "/realtime/sessions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *sink.lock().unwrap() = (auth, body);
                Json(json!({ "id": "sess_1", "client_secret": { "value": "ek_1" } }))
            }
        }),
    ))
    .await;

    let minter = SessionMinter::new(&openai_config(base, Some("sk-server")));
    let session = minter.mint().await.map_err(|e| anyhow::anyhow!(e.error))?;

    assert_eq!(session["client_secret"]["value"], "ek_1");
    let (auth, body) = captured.lock().unwrap().clone();
    assert_eq!(auth.as_deref(), Some("Bearer sk-server"));
    assert_eq!(
        body,
        json!({ "model": "gpt-4o-realtime-preview-2024-12-17", "voice": "shimmer" })
    );
    Ok(())
}

#[tokio::test]
async fn test_minter_relays_upstream_error() {
    let base = serve(Router::new().route(
        "/realtime/sessions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "message": "Incorrect API key provided" } })),
            )
        }),
    ))
    .await;

    let minter = SessionMinter::new(&openai_config(base, Some("sk-bad")));
    let err = minter.mint().await.unwrap_err();

    assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    assert_eq!(err.error, "Failed to create OpenAI session");
    assert_eq!(err.details["error"]["message"], "Incorrect API key provided");
}

#[tokio::test]
async fn test_minter_without_key() {
    let minter = SessionMinter::new(&openai_config("http://127.0.0.1:9".to_string(), None));
    let err = minter.mint().await.unwrap_err();

    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}
