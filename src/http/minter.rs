use crate::config::{OpenAiConfig, DEFAULT_REQUEST_TIMEOUT};
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

/// Why a session could not be minted; relayed to the browser as-is
#[derive(Debug)]
pub struct MintError {
    pub status: StatusCode,
    pub error: String,
    pub details: Value,
}

/// Mints ephemeral realtime credentials with the server-side API key
pub struct SessionMinter {
    client: reqwest::Client,
    timeout: Duration,
    sessions_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl SessionMinter {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            sessions_url: format!("{}/realtime/sessions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            model: config.session_model.clone(),
            voice: config.session_voice.clone(),
        }
    }

    /// Bound every request, from connecting until the body is read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a realtime session and return the provider's JSON untouched
    pub async fn mint(&self) -> Result<Value, MintError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MintError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Failed to create session".to_string(),
                details: Value::String("no API key configured".to_string()),
            });
        };

        let response = self
            .client
            .post(&self.sessions_url)
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "voice": self.voice }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!("Error creating realtime session: {}", e);
                MintError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: "Failed to create session".to_string(),
                    details: Value::String(e.to_string()),
                }
            })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        if !status.is_success() {
            error!("Realtime session API error ({}): {}", status, parsed);
            return Err(MintError {
                status,
                error: "Failed to create OpenAI session".to_string(),
                details: parsed,
            });
        }

        info!("Minted realtime session for model {}", self.model);
        Ok(parsed)
    }
}
