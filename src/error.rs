//! Error types for realtime sessions and generation jobs

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the negotiator, poller and orchestrator
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Credential request failed: {0}")]
    Credential(String),

    #[error("Microphone access denied: {0}")]
    MediaAccess(String),

    #[error("Session negotiation failed: {0}")]
    Negotiation(String),

    #[error("Not connected to the realtime agent")]
    NotConnected,

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Malformed channel message: {0}")]
    MalformedMessage(String),

    #[error("Prompt derivation failed: {0}")]
    Prompt(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Short machine-readable kind, used in event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Credential(_) => "credential",
            SessionError::MediaAccess(_) => "media_access",
            SessionError::Negotiation(_) => "negotiation",
            SessionError::NotConnected => "not_connected",
            SessionError::Fetch(_) => "fetch",
            SessionError::Generation(_) => "generation",
            SessionError::MalformedMessage(_) => "malformed_message",
            SessionError::Prompt(_) => "prompt",
            SessionError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Fetch(err.to_string())
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}
