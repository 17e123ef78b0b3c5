use super::backend::{AudioSink, AudioTrack, ChannelReceiver, MessageChannel, PeerLink, RealtimeBackend};
use super::messages::{
    InboundEvent, OutboundMessage, SessionSettings, TranscriptionSettings, TurnDetection,
};
use super::signaling::{EphemeralCredential, Signaling};
use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "shimmer";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const CHANNEL_LABEL: &str = "oai-events";

const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Snapshot published whenever the status or mute flag actually changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportState {
    pub status: ConnectionStatus,
    pub muted: bool,
}

/// Caller-supplied session settings; unset fields fall back to the negotiator defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
}

/// Negotiator defaults for missing connect settings
#[derive(Debug, Clone)]
pub struct NegotiatorDefaults {
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
}

impl Default for NegotiatorDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

/// Events forwarded from the message channel, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Transcription(String),
    AgentFragment(String),
    /// The remote side closed the channel
    ChannelClosed,
}

impl From<InboundEvent> for TransportEvent {
    fn from(event: InboundEvent) -> Self {
        match event {
            InboundEvent::Transcription(text) => TransportEvent::Transcription(text),
            InboundEvent::AgentFragment(text) => TransportEvent::AgentFragment(text),
        }
    }
}

/// A live connection. Every handle is present for as long as the value exists.
struct Session {
    id: String,
    credential: EphemeralCredential,
    track: Arc<dyn AudioTrack>,
    channel: Arc<dyn MessageChannel>,
    peer: Box<dyn PeerLink>,
    sink: Arc<dyn AudioSink>,
    reader: JoinHandle<()>,
}

impl Session {
    async fn release(mut self) {
        info!("Releasing realtime session {}", self.id);
        self.reader.abort();
        self.track.stop();
        self.channel.close();
        self.peer.close().await;
        self.sink.detach();
    }
}

/// Handles acquired so far during `connect`, released in the same order as a session
#[derive(Default)]
struct Acquired {
    track: Option<Arc<dyn AudioTrack>>,
    channel: Option<Arc<dyn MessageChannel>>,
    peer: Option<Box<dyn PeerLink>>,
    sink: Option<Arc<dyn AudioSink>>,
}

impl Acquired {
    async fn release(mut self) {
        if let Some(track) = self.track.take() {
            track.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close().await;
        }
        if let Some(sink) = self.sink.take() {
            sink.detach();
        }
    }
}

/// Establishes and tears down the realtime link with the agent
pub struct TransportNegotiator {
    backend: Arc<dyn RealtimeBackend>,
    signaling: Arc<dyn Signaling>,
    defaults: NegotiatorDefaults,
    session: Option<Session>,
    status: ConnectionStatus,
    muted: bool,
    state_tx: watch::Sender<TransportState>,
    transitions_tx: broadcast::Sender<TransportState>,
}

impl TransportNegotiator {
    pub fn new(
        backend: Arc<dyn RealtimeBackend>,
        signaling: Arc<dyn Signaling>,
        defaults: NegotiatorDefaults,
    ) -> Self {
        let initial = TransportState {
            status: ConnectionStatus::Disconnected,
            muted: false,
        };
        let (state_tx, _) = watch::channel(initial);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            backend,
            signaling,
            defaults,
            session: None,
            status: ConnectionStatus::Disconnected,
            muted: false,
            state_tx,
            transitions_tx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            status: self.status,
            muted: self.muted,
        }
    }

    /// Watch the latest status and mute flag without locking the negotiator
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }

    /// Every transition in order, including short-lived ones like `Connecting`
    pub fn transitions(&self) -> broadcast::Receiver<TransportState> {
        self.transitions_tx.subscribe()
    }

    /// Connect to the agent, tearing down any previous session first
    ///
    /// Channel events are forwarded to `events` until the session ends. On
    /// failure every handle acquired so far is released and the status is `Failed`.
    pub async fn connect(
        &mut self,
        config: ConnectConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SessionResult<()> {
        self.disconnect().await;
        self.set_state(ConnectionStatus::Connecting, false);

        let mut acquired = Acquired::default();
        match self.establish(&config, &mut acquired, events).await {
            Ok(session) => {
                info!(
                    "Realtime session {} connected via {} (credential expires at {:?})",
                    session.id,
                    self.backend.name(),
                    session.credential.expires_at
                );
                self.session = Some(session);
                self.set_state(ConnectionStatus::Connected, false);
                Ok(())
            }
            Err(e) => {
                error!("Connection error: {}", e);
                acquired.release().await;
                self.set_state(ConnectionStatus::Failed, false);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        config: &ConnectConfig,
        acquired: &mut Acquired,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SessionResult<Session> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| self.defaults.model.clone());
        let voice = config
            .voice
            .clone()
            .unwrap_or_else(|| self.defaults.voice.clone());

        // 1. Credential
        let credential = self.signaling.fetch_credential().await?;

        // 2. Microphone
        info!("Requesting microphone access...");
        let track = self
            .backend
            .open_microphone()
            .await
            .map_err(|e| SessionError::MediaAccess(format!("{:#}", e)))?;
        acquired.track = Some(Arc::clone(&track));

        // 3. Peer link with the microphone track and the playback sink
        let sink = self
            .backend
            .open_output()
            .await
            .map_err(|e| SessionError::Negotiation(format!("audio output: {:#}", e)))?;
        acquired.sink = Some(Arc::clone(&sink));

        let mut peer = self
            .backend
            .create_peer()
            .await
            .map_err(|e| SessionError::Negotiation(format!("peer link: {:#}", e)))?;
        let attached = peer
            .add_track(Arc::clone(&track))
            .and_then(|_| peer.attach_sink(Arc::clone(&sink)));
        let peer = acquired.peer.insert(peer);
        attached.map_err(|e| SessionError::Negotiation(format!("{:#}", e)))?;

        // 4. Ordered message channel
        let (channel, inbound) = peer
            .create_channel(CHANNEL_LABEL)
            .await
            .map_err(|e| SessionError::Negotiation(format!("message channel: {:#}", e)))?;
        acquired.channel = Some(Arc::clone(&channel));

        // 5. Offer/answer exchange
        let offer = peer
            .create_offer()
            .await
            .map_err(|e| SessionError::Negotiation(format!("local description: {:#}", e)))?;
        let answer = self.signaling.exchange(&credential, &model, &offer).await?;

        // 6. Remote description
        peer.apply_answer(answer)
            .await
            .map_err(|e| SessionError::Negotiation(format!("remote description: {:#}", e)))?;

        let update = OutboundMessage::SessionUpdate {
            session: SessionSettings {
                instructions: config.instructions.clone(),
                voice: Some(voice),
                model,
                input_audio_transcription: TranscriptionSettings {
                    model: self.defaults.transcription_model.clone(),
                },
                turn_detection: TurnDetection::server_vad(),
            },
        };
        channel
            .send(update.to_json()?)
            .await
            .map_err(|e| SessionError::Negotiation(format!("session update: {:#}", e)))?;

        let reader = spawn_reader(inbound, events);

        // Everything acquired moves into the session together
        let peer = acquired
            .peer
            .take()
            .ok_or_else(|| SessionError::Negotiation("peer link missing".to_string()))?;
        acquired.track = None;
        acquired.channel = None;
        acquired.sink = None;

        Ok(Session {
            id: credential
                .id
                .clone()
                .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4())),
            credential,
            track,
            channel,
            peer,
            sink,
            reader,
        })
    }

    /// Release every handle and return to `Disconnected`. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.release().await;
        }
        if self.status != ConnectionStatus::Disconnected || self.muted {
            info!("Realtime transport disconnected");
        }
        self.set_state(ConnectionStatus::Disconnected, false);
    }

    /// Flip the microphone track's enabled flag and return the new muted state
    pub fn toggle_mute(&mut self) -> SessionResult<bool> {
        let track = self.connected()?.track.clone();
        let muted = !self.muted;
        track.set_enabled(!muted);
        info!("Microphone {}", if muted { "muted" } else { "enabled" });
        self.set_state(self.status, muted);
        Ok(muted)
    }

    /// Send one user text message to the agent
    pub async fn send_message(&self, text: &str) -> SessionResult<()> {
        let session = self.connected()?;
        let payload = OutboundMessage::user_text(text).to_json()?;
        session
            .channel
            .send(payload)
            .await
            .map_err(|e| SessionError::Negotiation(format!("send failed: {:#}", e)))?;
        info!("Message sent ({} chars)", text.len());
        Ok(())
    }

    fn connected(&self) -> SessionResult<&Session> {
        match (&self.session, self.status) {
            (Some(session), ConnectionStatus::Connected) => Ok(session),
            _ => Err(SessionError::NotConnected),
        }
    }

    fn set_state(&mut self, status: ConnectionStatus, muted: bool) {
        if self.status == status && self.muted == muted {
            return;
        }
        self.status = status;
        self.muted = muted;

        let state = TransportState { status, muted };
        self.state_tx.send_replace(state);
        // No receivers is fine
        let _ = self.transitions_tx.send(state);
    }
}

impl Drop for TransportNegotiator {
    fn drop(&mut self) {
        // The peer closes when dropped; everything else is released here
        if let Some(session) = self.session.take() {
            session.reader.abort();
            session.track.stop();
            session.channel.close();
            session.sink.detach();
        }
    }
}

/// Forward parsed channel messages; malformed ones are logged and dropped
fn spawn_reader(
    mut inbound: ChannelReceiver,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = inbound.recv().await {
            match InboundEvent::parse(&raw) {
                Ok(Some(event)) => {
                    if events.send(event.into()).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping channel message: {}", e),
            }
        }

        info!("Message channel closed by remote");
        let _ = events.send(TransportEvent::ChannelClosed);
    })
}
