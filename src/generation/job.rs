use super::status::{ArtifactStatus, StatusDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job-creation response: `{ id, metadataUrl, expectedImageUrl?, expectedPlyUrl?, status }`
///
/// The generation server itself answers in snake_case, so both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "metadataUrl", alias = "metadata_url", default)]
    pub status_url: Option<String>,

    #[serde(rename = "expectedImageUrl", alias = "expected_image_url", default)]
    pub expected_image_url: Option<String>,

    #[serde(rename = "expectedPlyUrl", alias = "expected_ply_url", default)]
    pub expected_model_url: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactState {
    pub status: ArtifactStatus,
    pub url: Option<String>,
}

impl ArtifactState {
    fn complete(&mut self, url: &str) -> bool {
        if self.status == ArtifactStatus::Completed {
            return false;
        }
        self.status = ArtifactStatus::Completed;
        self.url = Some(url.to_string());
        true
    }

    fn fail_if_pending(&mut self) {
        if self.status == ArtifactStatus::Pending {
            self.status = ArtifactStatus::Failed;
        }
    }
}

/// One image + 3-D model derivation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: String,
    pub prompt: String,
    pub status_url: String,
    pub expected_image_url: Option<String>,
    pub expected_model_url: Option<String>,
    pub image: ArtifactState,
    pub model3d: ArtifactState,
    pub error: Option<String>,
    /// No further changes once set
    pub retired: bool,
    pub created_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(prompt: impl Into<String>, status_url: impl Into<String>, submission: JobSubmission) -> Self {
        Self {
            id: submission.id,
            prompt: prompt.into(),
            status_url: status_url.into(),
            expected_image_url: submission.expected_image_url,
            expected_model_url: submission.expected_model_url,
            image: ArtifactState::default(),
            model3d: ArtifactState::default(),
            error: None,
            retired: false,
            created_at: Utc::now(),
        }
    }

    /// Returns false if the job is retired or the image was already recorded
    pub fn complete_image(&mut self, url: &str) -> bool {
        !self.retired && self.image.complete(url)
    }

    pub fn complete_model(&mut self, url: &str) -> bool {
        !self.retired && self.model3d.complete(url)
    }

    /// Retire after the document reported overall completion
    pub fn complete(&mut self, document: &StatusDocument) -> bool {
        if self.retired {
            return false;
        }
        if let Some(url) = document.completed_image_url() {
            self.image.complete(url);
        }
        if let Some(url) = document.completed_model_url() {
            self.model3d.complete(url);
        }
        if document.image() == ArtifactStatus::Failed {
            self.image.fail_if_pending();
        }
        if document.model() == ArtifactStatus::Failed {
            self.model3d.fail_if_pending();
        }
        self.retired = true;
        true
    }

    /// Retire with an error; artifacts still pending are marked failed
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.retired {
            return false;
        }
        self.error = Some(message.into());
        self.image.fail_if_pending();
        self.model3d.fail_if_pending();
        self.retired = true;
        true
    }
}
