use super::config::{merge_connect, OrchestratorConfig};
use super::events::{EventBus, EventKind, SessionEvent};
use super::state::{aggregate, DerivationPhase, SessionState};
use crate::conversation::{ConversationTracker, Speaker, Transcript};
use crate::error::{SessionError, SessionResult};
use crate::generation::{
    GenerationJob, GenerationObserver, GenerationPoller, JobSubmitter, PromptBuilder,
    StatusDocument, StatusFetcher,
};
use crate::transport::{
    ConnectConfig, ConnectionStatus, RealtimeBackend, Signaling, TransportEvent,
    TransportNegotiator, TransportState,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remote collaborators the orchestrator drives
pub struct Collaborators {
    pub backend: Arc<dyn RealtimeBackend>,
    pub signaling: Arc<dyn Signaling>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub jobs: Arc<dyn JobSubmitter>,
    pub status: Arc<dyn StatusFetcher>,
}

/// How a `start_conversation` call ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Connected,
    /// A later start, disconnect or shutdown arrived first; nothing was connected
    Superseded,
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    teardown: Option<JoinHandle<()>>,
    derivation: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

fn replace_task(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
    if let Some(previous) = slot.replace(task) {
        previous.abort();
    }
}

fn abort_task(slot: &mut Option<JoinHandle<()>>) {
    if let Some(task) = slot.take() {
        task.abort();
    }
}

struct Inner {
    config: OrchestratorConfig,
    negotiator: tokio::sync::Mutex<TransportNegotiator>,
    transport: watch::Receiver<TransportState>,
    tracker: Mutex<ConversationTracker>,
    prompts: Arc<dyn PromptBuilder>,
    jobs: Arc<dyn JobSubmitter>,
    poller: GenerationPoller,
    job: Mutex<Option<GenerationJob>>,
    derivation: Mutex<DerivationPhase>,
    events: EventBus,
    /// Bumped by every start and disconnect; transport continuations carry it
    session_generation: AtomicU64,
    /// Bumped by every conclusion and reset; derivation and poll callbacks carry it
    job_generation: AtomicU64,
    tasks: Mutex<Tasks>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        abort_task(&mut tasks.pump);
        abort_task(&mut tasks.teardown);
        abort_task(&mut tasks.derivation);
        abort_task(&mut tasks.forwarder);
    }
}

/// Runs one voice conversation at a time and the generation job it produces
///
/// Cheap to clone; clones share the same session. Spawned continuations hold
/// only a weak reference and carry the generation they were started under, so
/// anything that outlives its session or job does nothing when it resumes.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Must be called inside a Tokio runtime
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let negotiator = TransportNegotiator::new(
            collaborators.backend,
            collaborators.signaling,
            config.negotiator.clone(),
        );
        let transport = negotiator.subscribe();
        let events = EventBus::new();
        let forwarder = spawn_status_forwarder(negotiator.transitions(), events.clone());

        let inner = Arc::new(Inner {
            tracker: Mutex::new(ConversationTracker::new(config.policy.clone())),
            config,
            negotiator: tokio::sync::Mutex::new(negotiator),
            transport,
            prompts: collaborators.prompts,
            jobs: collaborators.jobs,
            poller: GenerationPoller::new(collaborators.status),
            job: Mutex::new(None),
            derivation: Mutex::new(DerivationPhase::Idle),
            events,
            session_generation: AtomicU64::new(0),
            job_generation: AtomicU64::new(0),
            tasks: Mutex::new(Tasks {
                forwarder: Some(forwarder),
                ..Default::default()
            }),
        });

        Self { inner }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn is_current_session(&self, generation: u64) -> bool {
        self.inner.session_generation.load(Ordering::SeqCst) == generation
    }

    fn is_current_job(&self, generation: u64) -> bool {
        self.inner.job_generation.load(Ordering::SeqCst) == generation
    }

    fn set_derivation(&self, phase: DerivationPhase) {
        *lock(&self.inner.derivation) = phase;
    }

    fn emit_error(&self, err: &SessionError) {
        self.inner.events.emit(EventKind::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    /// Begin a fresh conversation
    ///
    /// Clears the transcript and any previous job, then connects. Missing
    /// fields in `config` fall back to the configured defaults.
    pub async fn start_conversation(
        &self,
        config: Option<ConnectConfig>,
    ) -> SessionResult<StartOutcome> {
        let generation = self.inner.session_generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut tasks = lock(&self.inner.tasks);
            abort_task(&mut tasks.pump);
            abort_task(&mut tasks.teardown);
        }
        self.reset_generation();
        lock(&self.inner.tracker).reset();
        self.inner.events.emit(EventKind::Reset);

        let config = merge_connect(config, &self.inner.config.connect);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let result = {
            let mut negotiator = self.inner.negotiator.lock().await;
            if !self.is_current_session(generation) {
                info!("Conversation start superseded before connecting");
                return Ok(StartOutcome::Superseded);
            }
            negotiator.connect(config, events_tx).await
        };

        if let Err(e) = result {
            error!("Failed to start conversation: {}", e);
            self.emit_error(&e);
            return Err(e);
        }

        let pump = tokio::spawn(pump(self.weak(), generation, events_rx));
        replace_task(&mut lock(&self.inner.tasks).pump, pump);
        info!("Conversation started");
        Ok(StartOutcome::Connected)
    }

    /// End the conversation now. A running generation job keeps going.
    pub async fn disconnect(&self) {
        self.inner.session_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut tasks = lock(&self.inner.tasks);
            abort_task(&mut tasks.pump);
            abort_task(&mut tasks.teardown);
        }
        self.inner.negotiator.lock().await.disconnect().await;
    }

    /// Disconnect and cancel any job in flight
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.reset_generation();
        info!("Session orchestrator shut down");
    }

    /// Flip the microphone and return the new muted state
    pub async fn toggle_mute(&self) -> SessionResult<bool> {
        self.inner.negotiator.lock().await.toggle_mute()
    }

    /// Send a typed user message to the agent
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::MalformedMessage("empty message".to_string()));
        }

        let negotiator = self.inner.negotiator.lock().await;
        if negotiator.status() != ConnectionStatus::Connected {
            return Err(SessionError::NotConnected);
        }

        // The reply may start arriving before send returns
        let pending = lock(&self.inner.tracker).begin_user_text(text);

        if let Err(e) = negotiator.send_message(text).await {
            warn!("Message not delivered, removing it from the transcript");
            lock(&self.inner.tracker).retract_user_text(pending);
            return Err(e);
        }

        self.inner.events.emit(EventKind::TranscriptUpdated {
            speaker: Speaker::User,
            text: text.to_string(),
        });
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        aggregate(
            *self.inner.transport.borrow(),
            *lock(&self.inner.derivation),
            self.inner.poller.state(),
        )
    }

    pub fn transcript(&self) -> Transcript {
        lock(&self.inner.tracker).transcript().clone()
    }

    pub fn current_job(&self) -> Option<GenerationJob> {
        lock(&self.inner.job).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Drop the current job and invalidate derivation and poll continuations
    fn reset_generation(&self) {
        {
            let mut job = lock(&self.inner.job);
            self.inner.job_generation.fetch_add(1, Ordering::SeqCst);
            *job = None;
        }
        abort_task(&mut lock(&self.inner.tasks).derivation);
        self.inner.poller.stop();
        self.set_derivation(DerivationPhase::Idle);
    }

    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Transcription(text) => {
                if lock(&self.inner.tracker).on_transcription(&text) {
                    self.inner.events.emit(EventKind::TranscriptUpdated {
                        speaker: Speaker::User,
                        text: text.trim().to_string(),
                    });
                }
            }
            TransportEvent::AgentFragment(text) => {
                let update = lock(&self.inner.tracker).on_agent_fragment(&text);
                if update.appended {
                    self.inner.events.emit(EventKind::TranscriptUpdated {
                        speaker: Speaker::Agent,
                        text,
                    });
                }
                if update.concluded {
                    self.inner.events.emit(EventKind::ConversationConcluded {
                        matched: update.matched,
                    });
                    self.schedule_teardown(generation);
                    self.begin_derivation();
                }
            }
            TransportEvent::ChannelClosed => {
                self.teardown(generation, "channel closed").await;
            }
        }
    }

    /// Disconnect after the grace delay so the agent's farewell can play out
    fn schedule_teardown(&self, generation: u64) {
        let delay = self.inner.config.policy.grace_delay();
        let weak = self.weak();
        info!("Disconnecting in {:?}", delay);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(orchestrator) = SessionOrchestrator::from_weak(&weak) {
                orchestrator.teardown(generation, "conversation concluded").await;
            }
        });
        replace_task(&mut lock(&self.inner.tasks).teardown, task);
    }

    async fn teardown(&self, generation: u64, reason: &str) {
        if !self.is_current_session(generation) {
            return;
        }
        let mut negotiator = self.inner.negotiator.lock().await;
        if self.is_current_session(generation) {
            info!("Ending conversation ({})", reason);
            negotiator.disconnect().await;
        }
    }

    fn begin_derivation(&self) {
        let generation = self.inner.job_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.poller.stop();
        self.set_derivation(DerivationPhase::DerivingPrompt);

        let conversation = lock(&self.inner.tracker).transcript().render();
        let weak = self.weak();
        let task = tokio::spawn(async move {
            if let Some(orchestrator) = SessionOrchestrator::from_weak(&weak) {
                orchestrator.derive(generation, conversation).await;
            }
        });
        replace_task(&mut lock(&self.inner.tasks).derivation, task);
    }

    async fn derive(&self, generation: u64, conversation: String) {
        let prompt = match self.inner.prompts.build_prompt(&conversation).await {
            Ok(prompt) => prompt,
            Err(e) => return self.derivation_failed(generation, e),
        };
        if !self.is_current_job(generation) {
            return;
        }
        info!("Derived image prompt ({} chars)", prompt.len());
        self.inner.events.emit(EventKind::PromptDerived {
            prompt: prompt.clone(),
        });
        self.set_derivation(DerivationPhase::SubmittingJob);

        let submission = match self.inner.jobs.submit(&prompt).await {
            Ok(submission) => submission,
            Err(e) => return self.derivation_failed(generation, e),
        };
        let status_url = match submission.status_url.clone().filter(|url| !url.is_empty()) {
            Some(url) => url,
            None => {
                let e = SessionError::Fetch("No metadata URL returned from API".to_string());
                return self.derivation_failed(generation, e);
            }
        };

        let observer = Arc::new(JobObserver {
            inner: self.weak(),
            generation,
        });
        let job = GenerationJob::new(prompt, status_url.clone(), submission);
        let job_id = job.id.clone();

        // Started is announced before the poller can report anything
        let mut slot = lock(&self.inner.job);
        if !self.is_current_job(generation) {
            return;
        }
        *slot = Some(job);
        self.set_derivation(DerivationPhase::Idle);
        info!("Generation job {} started", job_id);
        self.inner.events.emit(EventKind::GenerationStarted {
            job_id,
            status_url: status_url.clone(),
        });
        self.inner
            .poller
            .poll(status_url, self.inner.config.poll, observer);
    }

    fn derivation_failed(&self, generation: u64, err: SessionError) {
        if !self.is_current_job(generation) {
            return;
        }
        error!("Could not start generation: {}", err);
        self.set_derivation(DerivationPhase::Failed);
        self.emit_error(&err);
    }
}

async fn pump(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(orchestrator) = SessionOrchestrator::from_weak(&weak) else {
            return;
        };
        if !orchestrator.is_current_session(generation) {
            return;
        }
        orchestrator.handle_transport_event(generation, event).await;
    }
}

fn spawn_status_forwarder(
    mut transitions: broadcast::Receiver<TransportState>,
    events: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(state) => events.emit(EventKind::StatusChanged {
                    status: state.status,
                    muted: state.muted,
                }),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Status forwarder lagged, {} transitions skipped", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Applies poll results to the job they were started for
struct JobObserver {
    inner: Weak<Inner>,
    generation: u64,
}

impl JobObserver {
    /// Run `update` on the job if it is still current; emit `event` when it changed something
    fn apply<F>(&self, update: F, event: EventKind)
    where
        F: FnOnce(&mut GenerationJob) -> bool,
    {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let changed = {
            let mut slot = lock(&inner.job);
            if inner.job_generation.load(Ordering::SeqCst) != self.generation {
                return;
            }
            match slot.as_mut() {
                Some(job) => update(job),
                None => false,
            }
        };
        if changed {
            inner.events.emit(event);
        } else {
            warn!("Ignoring update for a finished job: {}", event.name());
        }
    }
}

impl GenerationObserver for JobObserver {
    fn on_image_complete(&self, url: &str) {
        self.apply(
            |job| job.complete_image(url),
            EventKind::ImageReady {
                url: url.to_string(),
            },
        );
    }

    fn on_model_complete(&self, url: &str) {
        self.apply(
            |job| job.complete_model(url),
            EventKind::ModelReady {
                url: url.to_string(),
            },
        );
    }

    fn on_overall_complete(&self, document: &StatusDocument) {
        self.apply(
            |job| job.complete(document),
            EventKind::GenerationCompleted {
                document: document.clone(),
            },
        );
    }

    fn on_error(&self, err: &SessionError) {
        self.apply(
            |job| job.fail(err.to_string()),
            EventKind::GenerationFailed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        );
    }
}
