use std::time::Duration;

const DEFAULT_PHRASES: [&str; 5] = [
    "Thank you for sharing your dream",
    "gathered enough details",
    "image will appear shortly",
    "create an image",
    "session will end now",
];

/// Heuristic that decides whether an agent reply is a farewell
///
/// A reply concludes the conversation when at least `threshold` of the phrases
/// appear in it, compared case-insensitively. A single match is never enough
/// with the default threshold since short phrases occur in ordinary replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ConclusionPolicy {
    phrases: Vec<String>,
    /// Lowercased copy of `phrases`, same order
    needles: Vec<String>,
    threshold: usize,
    grace_delay: Duration,
}

impl ConclusionPolicy {
    pub fn new(phrases: Vec<String>, threshold: usize, grace_delay: Duration) -> Self {
        let needles = phrases.iter().map(|p| p.to_lowercase()).collect();
        Self {
            phrases,
            needles,
            threshold: threshold.max(1),
            grace_delay,
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// How long to keep the transport open after a conclusion so the final audio can play
    pub fn grace_delay(&self) -> Duration {
        self.grace_delay
    }

    /// Phrases found in `message`, in policy order
    pub fn matches<'a>(&'a self, message: &str) -> Vec<&'a str> {
        let haystack = message.to_lowercase();
        self.needles
            .iter()
            .zip(&self.phrases)
            .filter(|(needle, _)| !needle.is_empty() && haystack.contains(needle.as_str()))
            .map(|(_, phrase)| phrase.as_str())
            .collect()
    }

    pub fn is_conclusion(&self, message: &str) -> bool {
        self.matches(message).len() >= self.threshold
    }
}

impl Default for ConclusionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect(),
            2,
            Duration::from_secs(5),
        )
    }
}
