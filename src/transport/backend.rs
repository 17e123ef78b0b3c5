use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Offer or answer half of a peer negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation (SDP text)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Minimal SDP sanity check: non-empty and starting with the version line
    pub fn looks_valid(&self) -> bool {
        self.sdp.trim_start().starts_with("v=")
    }
}

/// Local microphone input
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Enabled tracks send audio; disabled tracks send silence but stay attached
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Release the capture device. Calling twice is a no-op.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Playback target for the agent's audio
pub trait AudioSink: Send + Sync {
    fn detach(&self);

    fn is_attached(&self) -> bool;
}

/// Ordered, reliable message channel to the agent
#[async_trait::async_trait]
pub trait MessageChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send(&self, text: String) -> Result<()>;

    /// Close the channel. Calling twice is a no-op.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Inbound half of a message channel, in arrival order. Yields `None` once closed.
pub type ChannelReceiver = mpsc::Receiver<String>;

/// Peer connection to the remote agent
#[async_trait::async_trait]
pub trait PeerLink: Send + Sync {
    fn add_track(&mut self, track: Arc<dyn AudioTrack>) -> Result<()>;

    /// Route remote audio into `sink`
    fn attach_sink(&mut self, sink: Arc<dyn AudioSink>) -> Result<()>;

    async fn create_channel(
        &mut self,
        label: &str,
    ) -> Result<(Arc<dyn MessageChannel>, ChannelReceiver)>;

    async fn create_offer(&mut self) -> Result<SessionDescription>;

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()>;

    async fn close(&mut self);
}

/// Media and peer backend
///
/// Platform implementations wrap a WebRTC stack and the OS audio devices.
/// The loopback backend simulates the agent in-process.
#[async_trait::async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &str;

    /// True when no real microphone, speaker or remote peer is involved
    fn is_simulated(&self) -> bool {
        false
    }

    async fn open_microphone(&self) -> Result<Arc<dyn AudioTrack>>;

    async fn open_output(&self) -> Result<Arc<dyn AudioSink>>;

    async fn create_peer(&self) -> Result<Box<dyn PeerLink>>;
}
