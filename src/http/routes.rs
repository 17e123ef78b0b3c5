use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Conversation control
        .route("/conversation/start", post(handlers::start_conversation))
        .route("/conversation/stop", post(handlers::stop_conversation))
        .route("/conversation/mute", post(handlers::toggle_mute))
        .route("/conversation/message", post(handlers::send_message))
        // Queries
        .route("/conversation/state", get(handlers::get_state))
        .route("/conversation/transcript", get(handlers::get_transcript))
        .route("/generation", get(handlers::get_generation))
        .route("/events", get(handlers::events))
        // Ephemeral credential for the realtime agent
        .route("/realtime/session", get(handlers::realtime_session))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
