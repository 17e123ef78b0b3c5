use super::policy::ConclusionPolicy;
use super::transcript::{Speaker, Transcript};
use tracing::{debug, info};

/// Outcome of feeding one agent fragment to the tracker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUpdate {
    /// Whether the fragment was new text (not already part of the reply)
    pub appended: bool,

    /// Conclusion phrases found in the cumulative reply
    pub matched: Vec<String>,

    /// True only on the fragment that first crossed the threshold
    pub concluded: bool,
}

/// A typed user line recorded before it was sent
#[derive(Debug)]
pub struct PendingUserText {
    index: usize,
    agent_reply: String,
}

/// Accumulates one session's transcript and watches the agent reply for a farewell
#[derive(Debug, Clone)]
pub struct ConversationTracker {
    policy: ConclusionPolicy,
    transcript: Transcript,
    /// Cumulative agent text since the last user message
    agent_reply: String,
    concluded: bool,
}

impl ConversationTracker {
    pub fn new(policy: ConclusionPolicy) -> Self {
        Self {
            policy,
            transcript: Transcript::new(),
            agent_reply: String::new(),
            concluded: false,
        }
    }

    pub fn policy(&self) -> &ConclusionPolicy {
        &self.policy
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn agent_reply(&self) -> &str {
        &self.agent_reply
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded
    }

    /// Record a speech-to-text result for the user. Blank text is ignored.
    pub fn on_transcription(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.transcript.push(Speaker::User, text);
        true
    }

    /// Record text the user typed and start a fresh agent reply
    ///
    /// Done before the send so an early reply lands after the user line.
    pub fn begin_user_text(&mut self, text: &str) -> PendingUserText {
        let index = self.transcript.len();
        self.transcript.push(Speaker::User, text.trim());
        PendingUserText {
            index,
            agent_reply: std::mem::take(&mut self.agent_reply),
        }
    }

    /// Undo `begin_user_text` for a message that was never delivered
    pub fn retract_user_text(&mut self, pending: PendingUserText) {
        let recorded = self
            .transcript
            .entries()
            .get(pending.index)
            .map_or(false, |entry| entry.speaker == Speaker::User);
        if recorded {
            self.transcript.remove(pending.index);
        }
        if self.agent_reply.is_empty() {
            self.agent_reply = pending.agent_reply;
        }
    }

    pub fn on_agent_fragment(&mut self, fragment: &str) -> AgentUpdate {
        if fragment.trim().is_empty() {
            return AgentUpdate::default();
        }

        // Overlapping fragments repeat text we already hold
        let appended = !self.agent_reply.contains(fragment);
        if appended {
            self.agent_reply.push_str(fragment);
            self.transcript.push(Speaker::Agent, fragment);
        } else {
            debug!("Skipping duplicate agent fragment ({} chars)", fragment.len());
        }

        let matched: Vec<String> = self
            .policy
            .matches(&self.agent_reply)
            .into_iter()
            .map(str::to_string)
            .collect();

        let concluded = !self.concluded && matched.len() >= self.policy.threshold();
        if concluded {
            info!("Conversation concluded (matched phrases: {:?})", matched);
            self.concluded = true;
        }

        AgentUpdate {
            appended,
            matched,
            concluded,
        }
    }

    pub fn reset(&mut self) {
        self.transcript.clear();
        self.agent_reply.clear();
        self.concluded = false;
    }
}

impl Default for ConversationTracker {
    fn default() -> Self {
        Self::new(ConclusionPolicy::default())
    }
}
