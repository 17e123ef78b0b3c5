use super::backend::SessionDescription;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{SessionError, SessionResult};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Short-lived secret used to authorize the description exchange
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredential {
    pub value: String,
    pub expires_at: Option<i64>,
    pub id: Option<String>,
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("id", &self.id)
            .finish()
    }
}

/// Credential endpoint body: `{ client_secret: { value }, expires_at, id }`
#[derive(Debug, Deserialize)]
struct CredentialResponse {
    client_secret: ClientSecret,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    // Newer responses nest the expiry here
    #[serde(default)]
    expires_at: Option<i64>,
}

impl CredentialResponse {
    fn into_credential(self) -> SessionResult<EphemeralCredential> {
        if self.client_secret.value.trim().is_empty() {
            return Err(SessionError::Credential("empty client secret".to_string()));
        }
        Ok(EphemeralCredential {
            value: self.client_secret.value,
            expires_at: self.expires_at.or(self.client_secret.expires_at),
            id: self.id,
        })
    }
}

/// Parse a credential endpoint response body
pub fn parse_credential(body: &str) -> SessionResult<EphemeralCredential> {
    serde_json::from_str::<CredentialResponse>(body)
        .map_err(|e| SessionError::Credential(format!("malformed credential response: {}", e)))?
        .into_credential()
}

/// Credential issuance and description exchange with the remote agent
#[async_trait::async_trait]
pub trait Signaling: Send + Sync {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential>;

    async fn exchange(
        &self,
        credential: &EphemeralCredential,
        model: &str,
        offer: &SessionDescription,
    ) -> SessionResult<SessionDescription>;
}

/// Signaling over HTTP: `GET` for the credential, `POST application/sdp` for the answer
pub struct HttpSignaling {
    client: reqwest::Client,
    timeout: Duration,
    credential_url: String,
    signaling_url: String,
}

impl HttpSignaling {
    pub fn new(credential_url: impl Into<String>, signaling_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), credential_url, signaling_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        credential_url: impl Into<String>,
        signaling_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            credential_url: credential_url.into(),
            signaling_url: signaling_url.into(),
        }
    }

    /// Bound every request, from connecting until the body is read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Signaling for HttpSignaling {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential> {
        info!("Requesting ephemeral credential from {}", self.credential_url);

        let response = self
            .client
            .get(&self.credential_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SessionError::Credential(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Credential(e.to_string()))?;

        if !status.is_success() {
            warn!("Credential endpoint returned {}: {}", status, body);
            return Err(SessionError::Credential(format!(
                "Failed to get session token: {}",
                status.as_u16()
            )));
        }

        parse_credential(&body)
    }

    async fn exchange(
        &self,
        credential: &EphemeralCredential,
        model: &str,
        offer: &SessionDescription,
    ) -> SessionResult<SessionDescription> {
        info!("Exchanging session description with {} (model={})", self.signaling_url, model);

        let response = self
            .client
            .post(&self.signaling_url)
            .query(&[("model", model)])
            .bearer_auth(&credential.value)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer.sdp.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Negotiation(format!(
                "SDP request failed: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        let sdp = response
            .text()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let answer = SessionDescription::answer(sdp);
        if !answer.looks_valid() {
            return Err(SessionError::Negotiation(
                "malformed session description in response".to_string(),
            ));
        }

        Ok(answer)
    }
}
