use super::client::StatusFetcher;
use super::status::{ArtifactStatus, StatusDocument};
use crate::error::SessionError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling,
    RetiredComplete,
    RetiredError,
}

impl PollerState {
    pub fn is_retired(self) -> bool {
        matches!(self, PollerState::RetiredComplete | PollerState::RetiredError)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Delay between the end of one fetch and the start of the next
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Receives the outcome of one polled job
///
/// Each artifact callback fires at most once per `poll`, and exactly one of
/// `on_overall_complete` / `on_error` fires unless the poller is stopped first.
pub trait GenerationObserver: Send + Sync {
    fn on_image_complete(&self, _url: &str) {}

    fn on_model_complete(&self, _url: &str) {}

    fn on_overall_complete(&self, _document: &StatusDocument) {}

    fn on_error(&self, _error: &SessionError) {}
}

struct PollShared {
    generation: AtomicU64,
    state: Mutex<PollerState>,
}

impl PollShared {
    fn is_current(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == token
    }

    /// Move `Polling -> retired` for the current token only
    fn retire(&self, token: u64, to: PollerState) -> bool {
        let mut state = lock(&self.state);
        if !self.is_current(token) || *state != PollerState::Polling {
            return false;
        }
        *state = to;
        true
    }
}

#[derive(Default)]
struct Latches {
    image: bool,
    model: bool,
}

/// Serial status-document poller
///
/// One job at a time: starting a new poll or calling `stop` invalidates the
/// previous loop, which then never touches state or observers again.
pub struct GenerationPoller {
    fetcher: Arc<dyn StatusFetcher>,
    shared: Arc<PollShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationPoller {
    pub fn new(fetcher: Arc<dyn StatusFetcher>) -> Self {
        Self {
            fetcher,
            shared: Arc::new(PollShared {
                generation: AtomicU64::new(0),
                state: Mutex::new(PollerState::Idle),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        *lock(&self.shared.state)
    }

    /// Start polling `status_url`, superseding any job already being polled
    pub fn poll(
        &self,
        status_url: impl Into<String>,
        options: PollOptions,
        observer: Arc<dyn GenerationObserver>,
    ) {
        let url = status_url.into();
        let token = {
            let mut state = lock(&self.shared.state);
            let token = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = PollerState::Polling;
            token
        };

        info!("Polling generation status at {} every {:?}", url, options.interval);

        let task = tokio::spawn(run(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.shared),
            token,
            url,
            options.interval,
            observer,
        ));

        if let Some(previous) = lock(&self.task).replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending fetch or sleep. Idempotent, and safe to call from an observer.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            if *state == PollerState::Polling {
                *state = PollerState::Idle;
                info!("Generation polling stopped");
            }
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl Drop for GenerationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    fetcher: Arc<dyn StatusFetcher>,
    shared: Arc<PollShared>,
    token: u64,
    url: String,
    interval: Duration,
    observer: Arc<dyn GenerationObserver>,
) {
    let mut latches = Latches::default();

    loop {
        if !shared.is_current(token) {
            return;
        }

        debug!("Fetching status document {}", url);
        let result = fetcher.fetch(&url).await;

        if !shared.is_current(token) {
            return;
        }

        let document = match result {
            Ok(document) => document,
            Err(e) => {
                error!("Status poll failed: {}", e);
                if shared.retire(token, PollerState::RetiredError) {
                    observer.on_error(&e);
                }
                return;
            }
        };

        if let Some(image_url) = document.completed_image_url() {
            if !latches.image && shared.is_current(token) {
                latches.image = true;
                info!("Image completed: {}", image_url);
                observer.on_image_complete(image_url);
            }
        }

        if let Some(model_url) = document.completed_model_url() {
            if !latches.model && shared.is_current(token) {
                latches.model = true;
                info!("3-D model completed: {}", model_url);
                observer.on_model_complete(model_url);
            }
        }

        match document.overall() {
            ArtifactStatus::Completed => {
                if shared.retire(token, PollerState::RetiredComplete) {
                    info!("Generation completed");
                    observer.on_overall_complete(&document);
                }
                return;
            }
            ArtifactStatus::Failed => {
                let err = SessionError::Generation(document.error_message().to_string());
                error!("{}", err);
                if shared.retire(token, PollerState::RetiredError) {
                    observer.on_error(&err);
                }
                return;
            }
            ArtifactStatus::Pending => {}
        }

        tokio::time::sleep(interval).await;
    }
}
