//! Conversation session management
//!
//! This module provides the `SessionOrchestrator`, which ties one realtime
//! conversation to the generation job it produces:
//! - Transport status and mute changes, forwarded as events
//! - Transcript accumulation and conclusion detection
//! - Graceful teardown once the agent says goodbye
//! - Prompt derivation, job submission and status polling
//! - Aggregate state and a timestamped event stream for the UI

mod config;
mod events;
mod orchestrator;
mod state;

pub use config::OrchestratorConfig;
pub use events::{EventBus, EventKind, SessionEvent};
pub use orchestrator::{Collaborators, SessionOrchestrator, StartOutcome};
pub use state::{aggregate, DerivationPhase, SessionState};
