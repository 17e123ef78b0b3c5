//! HTTP API server for the browser UI
//!
//! This module exposes the session orchestrator over REST and SSE:
//! - POST /conversation/start - Connect to the agent
//! - POST /conversation/stop - Disconnect
//! - POST /conversation/mute - Toggle the microphone
//! - POST /conversation/message - Send typed text
//! - GET /conversation/state - Aggregate session state
//! - GET /conversation/transcript - Transcript so far
//! - GET /generation - Current generation job
//! - GET /events - Server-sent session events
//! - GET /realtime/session - Mint an ephemeral realtime credential
//! - GET /health - Health check

mod handlers;
mod minter;
mod routes;
mod state;

pub use minter::{MintError, SessionMinter};
pub use routes::create_router;
pub use state::AppState;
