use super::minter::SessionMinter;
use crate::session::SessionOrchestrator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single conversation this service drives
    pub orchestrator: SessionOrchestrator,

    pub minter: Arc<SessionMinter>,
}

impl AppState {
    pub fn new(orchestrator: SessionOrchestrator, minter: SessionMinter) -> Self {
        Self {
            orchestrator,
            minter: Arc::new(minter),
        }
    }
}
