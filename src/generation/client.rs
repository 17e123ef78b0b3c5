use super::job::JobSubmission;
use super::status::StatusDocument;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{SessionError, SessionResult};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const PROMPT_SYSTEM_MESSAGE: &str =
    "You are an expert at creating detailed image generation prompts based on dream descriptions.";

/// Turns a conversation transcript into an image-generation prompt
#[async_trait::async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build_prompt(&self, conversation: &str) -> SessionResult<String>;
}

/// Starts a generation job for a prompt
#[async_trait::async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, prompt: &str) -> SessionResult<JobSubmission>;
}

/// Fetches one status document
#[async_trait::async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> SessionResult<StatusDocument>;
}

/// User message sent to the chat model
pub fn compose_prompt_request(instructions: &str, conversation: &str) -> String {
    format!(
        "{}\n\nHere is the dream conversation between a user and AI:\n\n{}\n\nBased on this conversation, create a detailed image generation prompt:",
        instructions, conversation
    )
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Prompt builder backed by an OpenAI-compatible chat completions endpoint
pub struct ChatCompletionsPromptBuilder {
    client: reqwest::Client,
    timeout: Duration,
    api_base: String,
    api_key: Option<String>,
    model: String,
    instructions: String,
}

impl ChatCompletionsPromptBuilder {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            instructions: instructions.into(),
        }
    }

    /// Bound every request, from connecting until the body is read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl PromptBuilder for ChatCompletionsPromptBuilder {
    async fn build_prompt(&self, conversation: &str) -> SessionResult<String> {
        if conversation.trim().is_empty() {
            return Err(SessionError::Prompt("Missing conversation content".to_string()));
        }

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        info!("Generating image prompt from conversation ({} chars)", conversation.len());

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": PROMPT_SYSTEM_MESSAGE },
                { "role": "user", "content": compose_prompt_request(&self.instructions, conversation) },
            ],
            "temperature": 0.7,
            "max_tokens": 500,
        });

        let mut request = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Prompt(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Prompt(format!(
                "Failed to generate image prompt: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Prompt(format!("malformed completion: {}", e)))?;

        let prompt = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                SessionError::Prompt(
                    "Invalid response format from image prompt generation API".to_string(),
                )
            })?;

        info!("Generated image prompt ({} chars)", prompt.len());
        Ok(prompt)
    }
}

/// Job submitter posting `{ prompt }` to the generation server
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    timeout: Duration,
    job_url: String,
}

impl HttpJobSubmitter {
    pub fn new(job_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            job_url: job_url.into(),
        }
    }

    /// Bound every request, from connecting until the body is read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, prompt: &str) -> SessionResult<JobSubmission> {
        info!("Submitting generation job to {} ({} chars)", self.job_url, prompt.len());

        let response = self
            .client
            .post(&self.job_url)
            .json(&json!({ "prompt": prompt }))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Job endpoint returned {}: {}", status, body);
            return Err(SessionError::Fetch(format!(
                "Failed to start generation: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        let submission: JobSubmission = response
            .json()
            .await
            .map_err(|e| SessionError::Fetch(format!("malformed job response: {}", e)))?;

        match submission.status_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(submission),
            _ => Err(SessionError::Fetch("No metadata URL returned from API".to_string())),
        }
    }
}

/// Status fetcher issuing plain `GET`s
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpStatusFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every request, from connecting until the body is read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpStatusFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch(&self, url: &str) -> SessionResult<StatusDocument> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Fetch(format!(
                "Failed to fetch metadata: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        response
            .json::<StatusDocument>()
            .await
            .map_err(|e| SessionError::Fetch(format!("malformed status document: {}", e)))
    }
}
