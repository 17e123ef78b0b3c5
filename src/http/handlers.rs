use super::state::AppState;
use crate::conversation::TranscriptEntry;
use crate::error::SessionError;
use crate::session::{SessionState, StartOutcome};
use crate::transport::ConnectConfig;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartConversationRequest {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub status: String,
    pub message: String,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub entries: Vec<TranscriptEntry>,
    /// Transcript as sent for prompt derivation
    pub rendered: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            details: None,
        }),
    )
        .into_response()
}

fn session_error_response(err: &SessionError) -> Response {
    let status = match err {
        SessionError::NotConnected => StatusCode::CONFLICT,
        SessionError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
        SessionError::MediaAccess(_) => StatusCode::FORBIDDEN,
        SessionError::Credential(_)
        | SessionError::Negotiation(_)
        | SessionError::Fetch(_)
        | SessionError::Prompt(_) => StatusCode::BAD_GATEWAY,
        SessionError::Generation(_) | SessionError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversation/start
/// Start a new conversation, replacing any current one
pub async fn start_conversation(
    State(state): State<AppState>,
    req: Option<Json<StartConversationRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let config = ConnectConfig {
        instructions: req.instructions,
        voice: req.voice,
        model: req.model,
    };

    info!("Starting conversation");

    match state.orchestrator.start_conversation(Some(config)).await {
        Ok(StartOutcome::Connected) => (
            StatusCode::OK,
            Json(ConversationResponse {
                status: "connected".to_string(),
                message: "Conversation started".to_string(),
                state: state.orchestrator.state(),
            }),
        )
            .into_response(),
        Ok(StartOutcome::Superseded) => (
            StatusCode::CONFLICT,
            Json(ConversationResponse {
                status: "superseded".to_string(),
                message: "A later request replaced this conversation start".to_string(),
                state: state.orchestrator.state(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start conversation: {}", e);
            session_error_response(&e)
        }
    }
}

/// POST /conversation/stop
pub async fn stop_conversation(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.disconnect().await;

    (
        StatusCode::OK,
        Json(ConversationResponse {
            status: "disconnected".to_string(),
            message: "Conversation stopped".to_string(),
            state: state.orchestrator.state(),
        }),
    )
        .into_response()
}

/// POST /conversation/mute
pub async fn toggle_mute(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.toggle_mute().await {
        Ok(muted) => (StatusCode::OK, Json(MuteResponse { muted })).into_response(),
        Err(e) => session_error_response(&e),
    }
}

/// POST /conversation/message
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    match state.orchestrator.send_text(&req.text).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(state.orchestrator.state())).into_response(),
        Err(e) => {
            error!("Failed to send message: {}", e);
            session_error_response(&e)
        }
    }
}

/// GET /conversation/state
pub async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.orchestrator.state())).into_response()
}

/// GET /conversation/transcript
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript = state.orchestrator.transcript();
    (
        StatusCode::OK,
        Json(TranscriptResponse {
            rendered: transcript.render(),
            entries: transcript.entries().to_vec(),
        }),
    )
        .into_response()
}

/// GET /generation
/// The current generation job, if a conversation has produced one
pub async fn get_generation(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.current_job() {
        Some(job) => (StatusCode::OK, Json(job)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No generation job"),
    }
}

/// GET /events
/// Session events as server-sent events, named after their kind
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => warn!("Could not encode event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /realtime/session
/// Mint an ephemeral credential for the realtime agent
pub async fn realtime_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.minter.mint().await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => (
            e.status,
            Json(ErrorResponse {
                error: e.error,
                details: Some(e.details),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
