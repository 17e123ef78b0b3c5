//! Generation job tracking
//!
//! After a conversation concludes, its transcript becomes an image prompt,
//! the prompt becomes a generation job, and the job's status document is
//! polled until the image and the 3-D model are available:
//! - `PromptBuilder`, `JobSubmitter`, `StatusFetcher` are the remote collaborators
//! - `GenerationJob` records what the orchestrator knows about the current job
//! - `GenerationPoller` drives the serial polling loop and notifies a `GenerationObserver`

mod client;
mod job;
mod poller;
mod status;

pub use client::{
    compose_prompt_request, ChatCompletionsPromptBuilder, HttpJobSubmitter, HttpStatusFetcher,
    JobSubmitter, PromptBuilder, StatusFetcher,
};
pub use job::{ArtifactState, GenerationJob, JobSubmission};
pub use poller::{GenerationObserver, GenerationPoller, PollOptions, PollerState};
pub use status::{ArtifactStatus, StatusDocument};
