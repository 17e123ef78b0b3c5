use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::conversation::ConclusionPolicy;
use crate::error::{SessionError, SessionResult};
use crate::transport::{ConnectConfig, HttpSignaling, LoopbackSignaling, RealtimeBackend, Signaling};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    pub openai: OpenAiConfig,
    pub conversation: ConversationConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
    /// Upper bound for every outbound HTTP request
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "lucidia-realtime".to_string(),
            http: HttpConfig::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Which transport pair the binary wires into the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process simulated agent, no network
    Loopback,
    /// HTTP signaling against the configured endpoints; needs a real media backend
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Endpoint returning an ephemeral client secret
    pub credential_url: String,
    /// Endpoint accepting the local SDP offer
    pub signaling_url: String,
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
    pub instructions: String,
    pub transport: TransportKind,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            credential_url: "http://127.0.0.1:8787/realtime/session".to_string(),
            signaling_url: "https://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "shimmer".to_string(),
            transcription_model: "whisper-1".to_string(),
            instructions: DEFAULT_AGENT_INSTRUCTIONS.to_string(),
            transport: TransportKind::Loopback,
        }
    }
}

impl RealtimeConfig {
    /// Connect settings used when a caller supplies none
    pub fn connect_defaults(&self) -> ConnectConfig {
        ConnectConfig {
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            model: Some(self.model.clone()),
        }
    }

    /// Signaling for the configured transport, checked against the media backend
    ///
    /// A remote agent needs a real offer, so `Http` is refused with a simulated backend.
    pub fn signaling_for(
        &self,
        backend: &dyn RealtimeBackend,
        request_timeout: Duration,
    ) -> SessionResult<Arc<dyn Signaling>> {
        match self.transport {
            TransportKind::Loopback => Ok(Arc::new(LoopbackSignaling::new())),
            TransportKind::Http if backend.is_simulated() => Err(SessionError::Config(format!(
                "transport \"http\" needs a media backend that can reach a remote peer, \
                 but only the {} backend is available",
                backend.name()
            ))),
            TransportKind::Http => Ok(Arc::new(
                HttpSignaling::new(self.credential_url.clone(), self.signaling_url.clone())
                    .with_timeout(request_timeout),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_base: String,
    /// Server-side key; also read from OPENAI_API_KEY by the binary
    pub api_key: Option<String>,
    pub session_model: String,
    pub session_voice: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            session_model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            session_voice: "shimmer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub phrases: Vec<String>,
    pub threshold: usize,
    pub grace_delay_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        let policy = ConclusionPolicy::default();
        Self {
            phrases: policy.phrases().to_vec(),
            threshold: policy.threshold(),
            grace_delay_ms: policy.grace_delay().as_millis() as u64,
        }
    }
}

impl ConversationConfig {
    pub fn policy(&self) -> ConclusionPolicy {
        ConclusionPolicy::new(
            self.phrases.clone(),
            self.threshold,
            Duration::from_millis(self.grace_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub prompt_model: String,
    pub prompt_instructions: String,
    /// Job-creation endpoint (POST {prompt})
    pub job_url: String,
    pub poll_interval_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt_model: "gpt-4o-2024-05-13".to_string(),
            prompt_instructions: DEFAULT_PROMPT_INSTRUCTIONS.to_string(),
            job_url: "http://localhost:5000/generate-image".to_string(),
            poll_interval_ms: 2000,
        }
    }
}

impl GenerationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_AGENT_INSTRUCTIONS: &str = "You are a dream scene constructor AI. Start by asking the user to tell you about their dream. Then, ask 2-3 short, specific questions to gather more details about the visual elements, setting, characters, and emotions in their dream. Based on their responses, construct a detailed mental image of their dream scene. Once you have enough information, tell the user: 'Thank you for sharing your dream. I've gathered enough details to create an image based on the scene you described. The image will appear shortly. Our session will end now, but you can start a new conversation anytime.'";

pub const DEFAULT_PROMPT_INSTRUCTIONS: &str = "Create a detailed image generation prompt based on the following dream description. The prompt should be visually rich, descriptive, and capture the essence of the dream. Include visual details about setting, characters, mood, lighting, and style. Make it suitable for an AI image generator.";

impl Config {
    /// Load from an optional TOML file, then `LUCIDIA__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LUCIDIA").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_conclusion_policy() {
        let cfg = Config::default();
        assert_eq!(cfg.conversation.threshold, 2);
        assert_eq!(cfg.conversation.phrases.len(), 5);
        assert_eq!(cfg.conversation.grace_delay_ms, 5000);
        assert_eq!(cfg.generation.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.realtime.transport, TransportKind::Loopback);
        assert_eq!(cfg.service.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_connect_defaults_fill_every_field() {
        let defaults = RealtimeConfig::default().connect_defaults();
        assert_eq!(defaults.model.as_deref(), Some("gpt-4o-realtime-preview-2024-12-17"));
        assert_eq!(defaults.voice.as_deref(), Some("shimmer"));
        assert!(defaults.instructions.is_some());
    }
}
