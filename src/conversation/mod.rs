//! Conversation tracking
//!
//! This module merges speaker-tagged fragments into one transcript and decides
//! when the agent has concluded the conversation:
//! - `Transcript` keeps the ordered user/agent entries
//! - `ConclusionPolicy` holds the phrase set, threshold and grace delay
//! - `ConversationTracker` applies the policy to the cumulative agent reply

mod policy;
mod tracker;
mod transcript;

pub use policy::ConclusionPolicy;
pub use tracker::{AgentUpdate, ConversationTracker, PendingUserText};
pub use transcript::{Speaker, Transcript, TranscriptEntry};
