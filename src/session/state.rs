use crate::generation::PollerState;
use crate::transport::{ConnectionStatus, TransportState};
use serde::Serialize;

/// Where the orchestrator is between conclusion and a running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationPhase {
    Idle,
    DerivingPrompt,
    SubmittingJob,
    Failed,
}

/// Aggregate state rendered by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub muted: bool,
    pub connected: bool,
    /// Connected with the microphone enabled
    pub recording: bool,
    /// Connecting, or turning the conversation into a job
    pub processing: bool,
    /// A job's status document is being polled
    pub generating: bool,
    pub derivation: DerivationPhase,
    pub poller: PollerState,
}

pub fn aggregate(
    transport: TransportState,
    derivation: DerivationPhase,
    poller: PollerState,
) -> SessionState {
    let connected = transport.status == ConnectionStatus::Connected;
    SessionState {
        status: transport.status,
        muted: transport.muted,
        connected,
        recording: connected && !transport.muted,
        processing: transport.status == ConnectionStatus::Connecting
            || matches!(
                derivation,
                DerivationPhase::DerivingPrompt | DerivationPhase::SubmittingJob
            ),
        generating: poller == PollerState::Polling,
        derivation,
        poller,
    }
}
