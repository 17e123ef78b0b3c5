use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Progress of one artifact, or of the job as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl ArtifactStatus {
    /// Servers also report intermediate values such as "processing" or
    /// "generating"; anything that is not terminal counts as pending.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("completed") => ArtifactStatus::Completed,
            Some(s) if s.eq_ignore_ascii_case("failed") => ArtifactStatus::Failed,
            _ => ArtifactStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ArtifactStatus::Pending)
    }
}

/// Job status document served at the job's status URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ply_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ply_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Server bookkeeping fields we do not interpret (paths, storage info, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusDocument {
    pub fn overall(&self) -> ArtifactStatus {
        ArtifactStatus::parse(self.status.as_deref())
    }

    pub fn image(&self) -> ArtifactStatus {
        ArtifactStatus::parse(self.image_status.as_deref())
    }

    pub fn model(&self) -> ArtifactStatus {
        ArtifactStatus::parse(self.ply_status.as_deref())
    }

    /// Image URL, once the image is completed and the URL is non-empty
    pub fn completed_image_url(&self) -> Option<&str> {
        completed_url(self.image(), self.image_url.as_deref())
    }

    /// 3-D model URL, once the model is completed and the URL is non-empty
    pub fn completed_model_url(&self) -> Option<&str> {
        completed_url(self.model(), self.ply_url.as_deref())
    }

    pub fn error_message(&self) -> &str {
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or("Unknown error")
    }
}

fn completed_url(status: ArtifactStatus, url: Option<&str>) -> Option<&str> {
    match (status, url) {
        (ArtifactStatus::Completed, Some(url)) if !url.trim().is_empty() => Some(url),
        _ => None,
    }
}
