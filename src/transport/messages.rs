use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TRANSCRIPTION_EVENT: &str = "conversation.item.input_audio_transcription";
pub const TRANSCRIPTION_COMPLETED_EVENT: &str =
    "conversation.item.input_audio_transcription.completed";

/// Messages sent to the agent over the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    pub model: String,

    pub input_audio_transcription: TranscriptionSettings,

    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    /// Silence framing handled by the agent, not locally
    pub fn server_vad() -> Self {
        Self {
            kind: "server_vad".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        OutboundMessage::ConversationItemCreate {
            item: ConversationItem {
                kind: "message".to_string(),
                role: "user".to_string(),
                content: vec![ContentPart {
                    kind: "text".to_string(),
                    text: text.into(),
                }],
            },
        }
    }

    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string(self).map_err(|e| SessionError::MalformedMessage(e.to_string()))
    }
}

/// Messages received from the agent that the session cares about
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Speech-to-text of the user's audio
    Transcription(String),
    /// Part of the agent's reply
    AgentFragment(String),
}

impl InboundEvent {
    /// Parse one raw channel message
    ///
    /// Returns `Ok(None)` for well-formed events of other types, and
    /// `MalformedMessage` for invalid JSON or known events with the wrong shape.
    pub fn parse(raw: &str) -> SessionResult<Option<Self>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SessionError::MalformedMessage(e.to_string()))?;

        if !value.is_object() {
            return Err(SessionError::MalformedMessage(
                "expected a JSON object".to_string(),
            ));
        }

        match value.get("type").and_then(Value::as_str) {
            Some(TRANSCRIPTION_EVENT) => {
                let text = value
                    .pointer("/content/text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SessionError::MalformedMessage(
                            "transcription event without content.text".to_string(),
                        )
                    })?;
                return Ok(Some(InboundEvent::Transcription(text.to_string())));
            }
            Some(TRANSCRIPTION_COMPLETED_EVENT) => {
                let text = value
                    .get("transcript")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SessionError::MalformedMessage(
                            "completed transcription without transcript".to_string(),
                        )
                    })?;
                return Ok(Some(InboundEvent::Transcription(text.to_string())));
            }
            _ => {}
        }

        if value.get("role").and_then(Value::as_str) == Some("assistant") {
            return match value.get("content") {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    Ok(Some(InboundEvent::AgentFragment(text.clone())))
                }
                Some(Value::String(_)) => Ok(None),
                _ => Err(SessionError::MalformedMessage(
                    "assistant content is not a string".to_string(),
                )),
            };
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_shape() {
        let msg = OutboundMessage::SessionUpdate {
            session: SessionSettings {
                instructions: None,
                voice: Some("shimmer".to_string()),
                model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
                input_audio_transcription: TranscriptionSettings {
                    model: "whisper-1".to_string(),
                },
                turn_detection: TurnDetection::server_vad(),
            },
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "shimmer");
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert!(value["session"].get("instructions").is_none());
    }

    #[test]
    fn test_user_text_shape() {
        let json = OutboundMessage::user_text("I was underwater").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "text");
        assert_eq!(value["item"]["content"][0]["text"], "I was underwater");
    }

    #[test]
    fn test_parse_transcription() {
        let raw = r#"{"type":"conversation.item.input_audio_transcription","content":{"text":"a red door"}}"#;
        assert_eq!(
            InboundEvent::parse(raw).unwrap(),
            Some(InboundEvent::Transcription("a red door".to_string()))
        );

        let completed = r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"a blue sky"}"#;
        assert_eq!(
            InboundEvent::parse(completed).unwrap(),
            Some(InboundEvent::Transcription("a blue sky".to_string()))
        );
    }

    #[test]
    fn test_parse_agent_fragment() {
        let raw = r#"{"role":"assistant","content":"What happened next?"}"#;
        assert_eq!(
            InboundEvent::parse(raw).unwrap(),
            Some(InboundEvent::AgentFragment("What happened next?".to_string()))
        );

        let blank = r#"{"role":"assistant","content":"   "}"#;
        assert_eq!(InboundEvent::parse(blank).unwrap(), None);
    }

    #[test]
    fn test_parse_ignores_other_events() {
        let raw = r#"{"type":"response.done","response":{}}"#;
        assert_eq!(InboundEvent::parse(raw).unwrap(), None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            InboundEvent::parse("{not json"),
            Err(SessionError::MalformedMessage(_))
        ));
        assert!(matches!(
            InboundEvent::parse("[1,2]"),
            Err(SessionError::MalformedMessage(_))
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"conversation.item.input_audio_transcription","content":{}}"#),
            Err(SessionError::MalformedMessage(_))
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"role":"assistant","content":[1]}"#),
            Err(SessionError::MalformedMessage(_))
        ));
    }
}
