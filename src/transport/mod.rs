//! Realtime transport negotiation
//!
//! This module establishes and supervises the link with the remote agent:
//! - `Signaling` issues the ephemeral credential and exchanges session descriptions
//! - `RealtimeBackend` provides the microphone, the playback sink and the peer link
//! - `TransportNegotiator` runs the connect sequence, rolls back on failure,
//!   and forwards channel messages as `TransportEvent`s
//! - `loopback` simulates the agent in-process

mod backend;
pub mod loopback;
pub mod messages;
mod negotiator;
mod signaling;

pub use backend::{
    AudioSink, AudioTrack, ChannelReceiver, DescriptionKind, MessageChannel, PeerLink,
    RealtimeBackend, SessionDescription,
};
pub use loopback::{AgentScript, LoopbackBackend, LoopbackFaults, LoopbackSignaling, SignalingFaults};
pub use messages::{InboundEvent, OutboundMessage};
pub use negotiator::{
    ConnectConfig, ConnectionStatus, NegotiatorDefaults, TransportEvent, TransportNegotiator,
    TransportState, CHANNEL_LABEL, DEFAULT_MODEL, DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_VOICE,
};
pub use signaling::{parse_credential, EphemeralCredential, HttpSignaling, Signaling};
