use crate::config::Config;
use crate::conversation::ConclusionPolicy;
use crate::generation::PollOptions;
use crate::transport::{ConnectConfig, NegotiatorDefaults};

/// Orchestrator settings, usually derived from the service config
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Applied to any field a `start_conversation` caller leaves empty
    pub connect: ConnectConfig,
    pub negotiator: NegotiatorDefaults,
    pub policy: ConclusionPolicy,
    pub poll: PollOptions,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.realtime.connect_defaults(),
            negotiator: NegotiatorDefaults {
                model: config.realtime.model.clone(),
                voice: config.realtime.voice.clone(),
                transcription_model: config.realtime.transcription_model.clone(),
            },
            policy: config.conversation.policy(),
            poll: PollOptions {
                interval: config.generation.poll_interval(),
            },
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Fill the caller's empty fields from `defaults`
pub(crate) fn merge_connect(requested: Option<ConnectConfig>, defaults: &ConnectConfig) -> ConnectConfig {
    let requested = requested.unwrap_or_default();
    ConnectConfig {
        instructions: requested.instructions.or_else(|| defaults.instructions.clone()),
        voice: requested.voice.or_else(|| defaults.voice.clone()),
        model: requested.model.or_else(|| defaults.model.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.generation.poll_interval_ms = 250;
        config.conversation.grace_delay_ms = 100;

        let orchestrator = OrchestratorConfig::from_config(&config);
        assert_eq!(orchestrator.poll.interval, Duration::from_millis(250));
        assert_eq!(orchestrator.policy.grace_delay(), Duration::from_millis(100));
        assert_eq!(orchestrator.negotiator.voice, "shimmer");
    }

    #[test]
    fn test_merge_connect_prefers_requested_fields() {
        let defaults = ConnectConfig {
            instructions: Some("default instructions".to_string()),
            voice: Some("shimmer".to_string()),
            model: Some("default-model".to_string()),
        };

        let merged = merge_connect(
            Some(ConnectConfig {
                voice: Some("alloy".to_string()),
                ..Default::default()
            }),
            &defaults,
        );
        assert_eq!(merged.voice.as_deref(), Some("alloy"));
        assert_eq!(merged.model.as_deref(), Some("default-model"));
        assert_eq!(merged.instructions.as_deref(), Some("default instructions"));

        assert_eq!(merge_connect(None, &defaults), defaults);
    }
}
