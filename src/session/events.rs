use crate::conversation::Speaker;
use crate::generation::StatusDocument;
use crate::transport::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// A notification for the UI
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    /// When the event was emitted
    pub at: DateTime<Utc>,

    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StatusChanged {
        status: ConnectionStatus,
        muted: bool,
    },
    /// A new conversation cleared the transcript and any previous job
    Reset,
    TranscriptUpdated {
        speaker: Speaker,
        text: String,
    },
    ConversationConcluded {
        matched: Vec<String>,
    },
    PromptDerived {
        prompt: String,
    },
    GenerationStarted {
        job_id: String,
        status_url: String,
    },
    ImageReady {
        url: String,
    },
    ModelReady {
        url: String,
    },
    GenerationCompleted {
        document: StatusDocument,
    },
    GenerationFailed {
        kind: String,
        message: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl EventKind {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StatusChanged { .. } => "status_changed",
            EventKind::Reset => "reset",
            EventKind::TranscriptUpdated { .. } => "transcript_updated",
            EventKind::ConversationConcluded { .. } => "conversation_concluded",
            EventKind::PromptDerived { .. } => "prompt_derived",
            EventKind::GenerationStarted { .. } => "generation_started",
            EventKind::ImageReady { .. } => "image_ready",
            EventKind::ModelReady { .. } => "model_ready",
            EventKind::GenerationCompleted { .. } => "generation_completed",
            EventKind::GenerationFailed { .. } => "generation_failed",
            EventKind::Error { .. } => "error",
        }
    }
}

/// Fan-out of session events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, kind: EventKind) {
        debug!("Event: {}", kind.name());
        // No subscribers is fine
        let _ = self.tx.send(SessionEvent { at: Utc::now(), kind });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
