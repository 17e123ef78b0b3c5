//! In-process realtime agent
//!
//! `LoopbackBackend` and `LoopbackSignaling` stand in for the remote agent and
//! the platform media stack. The simulated agent greets on `session.update`,
//! asks the scripted questions one per user message, then says its farewell.
//! Every handle it hands out is recorded so callers can inspect what was
//! acquired and released.

use super::backend::{
    AudioSink, AudioTrack, ChannelReceiver, MessageChannel, PeerLink, RealtimeBackend,
    SessionDescription,
};
use super::messages::OutboundMessage;
use super::signaling::{EphemeralCredential, Signaling};
use crate::error::{SessionError, SessionResult};
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What the simulated agent says
#[derive(Debug, Clone)]
pub struct AgentScript {
    pub greeting: String,
    pub questions: Vec<String>,
    /// Farewell, delivered as consecutive fragments
    pub farewell: Vec<String>,
}

impl Default for AgentScript {
    fn default() -> Self {
        Self {
            greeting: "Hi! Tell me about your dream.".to_string(),
            questions: vec![
                "Where did the dream take place, and what did it look like?".to_string(),
                "How did you feel, and was anyone else there with you?".to_string(),
            ],
            farewell: vec![
                "Thank you for sharing your dream. I've gathered enough details to create an image based on the scene you described. ".to_string(),
                "The image will appear shortly. Our session will end now, but you can start a new conversation anytime.".to_string(),
            ],
        }
    }
}

/// Failures the loopback backend can be told to produce
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackFaults {
    pub deny_microphone: bool,
    pub fail_peer: bool,
    pub fail_channel: bool,
}

pub struct LoopbackTrack {
    id: String,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl AudioTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Loopback track {} stopped", self.id);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct LoopbackSink {
    attached: AtomicBool,
}

impl AudioSink for LoopbackSink {
    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct AgentTurns {
    questions_asked: usize,
    finished: bool,
}

/// Channel whose far end is the scripted agent
pub struct LoopbackChannel {
    label: String,
    script: AgentScript,
    open: AtomicBool,
    reject_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::Sender<String>>>,
    turns: Mutex<AgentTurns>,
}

impl LoopbackChannel {
    fn new(label: &str, script: AgentScript, inbound: mpsc::Sender<String>) -> Self {
        Self {
            label: label.to_string(),
            script,
            open: AtomicBool::new(true),
            reject_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(Some(inbound)),
            turns: Mutex::new(AgentTurns::default()),
        }
    }

    /// Raw messages sent by the local side, in order
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Deliver a raw message as if the agent had sent it
    pub async fn inject(&self, raw: impl Into<String>) -> bool {
        let tx = lock(&self.inbound).clone();
        match tx {
            Some(tx) => tx.send(raw.into()).await.is_ok(),
            None => false,
        }
    }

    /// Make later sends fail while the channel stays open
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Simulate the agent hanging up
    pub fn close_remote(&self) {
        lock(&self.inbound).take();
    }

    fn replies_to(&self, text: &str) -> Vec<String> {
        let message = match serde_json::from_str::<OutboundMessage>(text) {
            Ok(message) => message,
            Err(_) => return Vec::new(),
        };

        let mut turns = lock(&self.turns);
        let lines: Vec<String> = match message {
            OutboundMessage::SessionUpdate { .. } => vec![self.script.greeting.clone()],
            OutboundMessage::ConversationItemCreate { .. } if turns.finished => Vec::new(),
            OutboundMessage::ConversationItemCreate { .. } => {
                match self.script.questions.get(turns.questions_asked) {
                    Some(question) => {
                        turns.questions_asked += 1;
                        vec![question.clone()]
                    }
                    None => {
                        turns.finished = true;
                        self.script.farewell.clone()
                    }
                }
            }
        };

        lines
            .into_iter()
            .map(|line| serde_json::json!({ "role": "assistant", "content": line }).to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl MessageChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            bail!("channel {} is closed", self.label);
        }
        if self.reject_sends.load(Ordering::SeqCst) {
            bail!("channel {} send buffer is full", self.label);
        }

        let replies = self.replies_to(&text);
        lock(&self.sent).push(text);

        for reply in replies {
            self.inject(reply).await;
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            lock(&self.inbound).take();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct LoopbackLog {
    tracks: Vec<Arc<LoopbackTrack>>,
    sinks: Vec<Arc<LoopbackSink>>,
    channels: Vec<Arc<LoopbackChannel>>,
    peers_created: usize,
    peers_closed: usize,
}

struct LoopbackPeer {
    id: String,
    script: AgentScript,
    fail_channel: bool,
    tracks: Vec<String>,
    sink_attached: bool,
    remote: Option<SessionDescription>,
    closed: bool,
    log: Arc<Mutex<LoopbackLog>>,
}

#[async_trait::async_trait]
impl PeerLink for LoopbackPeer {
    fn add_track(&mut self, track: Arc<dyn AudioTrack>) -> Result<()> {
        self.tracks.push(track.id().to_string());
        Ok(())
    }

    fn attach_sink(&mut self, _sink: Arc<dyn AudioSink>) -> Result<()> {
        self.sink_attached = true;
        Ok(())
    }

    async fn create_channel(
        &mut self,
        label: &str,
    ) -> Result<(Arc<dyn MessageChannel>, ChannelReceiver)> {
        if self.fail_channel {
            bail!("loopback channel creation refused");
        }
        let (tx, rx) = mpsc::channel(64);
        let channel = Arc::new(LoopbackChannel::new(label, self.script.clone(), tx));
        lock(&self.log).channels.push(Arc::clone(&channel));
        Ok((channel, rx))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id
        );
        for track in &self.tracks {
            sdp.push_str(&format!("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=msid:{}\r\n", track));
        }
        sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        Ok(SessionDescription::offer(sdp))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if !answer.looks_valid() {
            bail!("remote description is not SDP");
        }
        self.remote = Some(answer);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.log).peers_closed += 1;
            debug!(
                "Loopback peer {} closed (tracks={}, sink={}, answered={})",
                self.id,
                self.tracks.len(),
                self.sink_attached,
                self.remote.is_some()
            );
        }
    }
}

/// Media backend whose peer is the scripted agent
pub struct LoopbackBackend {
    script: AgentScript,
    faults: LoopbackFaults,
    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackBackend {
    pub fn new(script: AgentScript) -> Self {
        Self::with_faults(script, LoopbackFaults::default())
    }

    pub fn with_faults(script: AgentScript, faults: LoopbackFaults) -> Self {
        Self {
            script,
            faults,
            log: Arc::new(Mutex::new(LoopbackLog::default())),
        }
    }

    pub fn tracks(&self) -> Vec<Arc<LoopbackTrack>> {
        lock(&self.log).tracks.clone()
    }

    pub fn sinks(&self) -> Vec<Arc<LoopbackSink>> {
        lock(&self.log).sinks.clone()
    }

    pub fn channels(&self) -> Vec<Arc<LoopbackChannel>> {
        lock(&self.log).channels.clone()
    }

    pub fn last_channel(&self) -> Option<Arc<LoopbackChannel>> {
        lock(&self.log).channels.last().cloned()
    }

    pub fn peers_created(&self) -> usize {
        lock(&self.log).peers_created
    }

    pub fn peers_closed(&self) -> usize {
        lock(&self.log).peers_closed
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new(AgentScript::default())
    }
}

#[async_trait::async_trait]
impl RealtimeBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn open_microphone(&self) -> Result<Arc<dyn AudioTrack>> {
        if self.faults.deny_microphone {
            bail!("Permission denied");
        }
        let track = Arc::new(LoopbackTrack {
            id: format!("mic-{}", uuid::Uuid::new_v4()),
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        });
        lock(&self.log).tracks.push(Arc::clone(&track));
        Ok(track)
    }

    async fn open_output(&self) -> Result<Arc<dyn AudioSink>> {
        let sink = Arc::new(LoopbackSink {
            attached: AtomicBool::new(true),
        });
        lock(&self.log).sinks.push(Arc::clone(&sink));
        Ok(sink)
    }

    async fn create_peer(&self) -> Result<Box<dyn PeerLink>> {
        if self.faults.fail_peer {
            bail!("loopback peer creation refused");
        }
        lock(&self.log).peers_created += 1;
        Ok(Box::new(LoopbackPeer {
            id: uuid::Uuid::new_v4().simple().to_string(),
            script: self.script.clone(),
            fail_channel: self.faults.fail_channel,
            tracks: Vec::new(),
            sink_attached: false,
            remote: None,
            closed: false,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Failures the loopback signaling can be told to produce
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalingFaults {
    pub reject_credential: bool,
    pub reject_offer: bool,
    /// Answer with a body that is not SDP
    pub malformed_answer: bool,
    /// Hold every credential request this long
    pub credential_delay: Option<Duration>,
}

/// Signaling that issues local credentials and answers offers itself
#[derive(Default)]
pub struct LoopbackSignaling {
    faults: SignalingFaults,
    exchanges: AtomicUsize,
}

impl LoopbackSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: SignalingFaults) -> Self {
        Self {
            faults,
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Signaling for LoopbackSignaling {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential> {
        if let Some(delay) = self.faults.credential_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.reject_credential {
            return Err(SessionError::Credential(
                "Failed to get session token: 500".to_string(),
            ));
        }
        Ok(EphemeralCredential {
            value: format!("ek_loopback_{}", uuid::Uuid::new_v4().simple()),
            expires_at: Some(chrono::Utc::now().timestamp() + 60),
            id: Some(format!("sess_{}", uuid::Uuid::new_v4().simple())),
        })
    }

    async fn exchange(
        &self,
        _credential: &EphemeralCredential,
        model: &str,
        offer: &SessionDescription,
    ) -> SessionResult<SessionDescription> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        if self.faults.reject_offer {
            return Err(SessionError::Negotiation(
                "SDP request failed: 401 Unauthorized".to_string(),
            ));
        }
        if !offer.looks_valid() {
            return Err(SessionError::Negotiation("offer is not SDP".to_string()));
        }
        if self.faults.malformed_answer {
            return Ok(SessionDescription::answer("<html>upstream error</html>"));
        }

        info!("Loopback agent answering offer (model={})", model);
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- loopback 2 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
            model
        )))
    }
}
