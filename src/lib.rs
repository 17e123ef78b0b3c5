pub mod config;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod http;
pub mod session;
pub mod transport;

pub use config::Config;
pub use conversation::{ConclusionPolicy, ConversationTracker, Speaker, Transcript};
pub use error::{SessionError, SessionResult};
pub use generation::{GenerationJob, GenerationPoller, PollerState, StatusDocument};
pub use http::{create_router, AppState, SessionMinter};
pub use session::{
    Collaborators, EventKind, OrchestratorConfig, SessionEvent, SessionOrchestrator, SessionState,
    StartOutcome,
};
pub use transport::{ConnectConfig, ConnectionStatus, TransportNegotiator};
