//! Per-conversation reply mode.
//!
//! Each conversation is either in `Simple` mode (answering a bare greeting)
//! or `Normal` mode. Entries live in process memory, are refreshed on every
//! message and are swept once idle past the TTL.

pub mod prompts;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

pub use prompts::{build_system_prompt, DOCUMENT_INSTRUCTIONS, NORMAL_INSTRUCTIONS, SIMPLE_INSTRUCTIONS};

/// Messages shorter than this (in characters) count as short
const SHORT_MESSAGE_CHARS: usize = 30;

const GREETING_PATTERN: &str = r"^(hi|hello|hey|how are you|what's up|good morning|good afternoon|good evening|hi there|hello there)$";

/// Reply mode of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Simple,
    Normal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Normal => "normal",
        }
    }
}

/// Memory settings handed to the model for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPolicy {
    pub enabled: bool,
    /// Number of semantically recalled messages (0 disables recall)
    pub semantic_limit: usize,
}

impl MemoryPolicy {
    /// No memory for greetings; history without semantic recall otherwise
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Simple => Self {
                enabled: false,
                semantic_limit: 0,
            },
            Mode::Normal => Self {
                enabled: true,
                semantic_limit: 0,
            },
        }
    }
}

/// Timing of the mode tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Idle time after which an entry is swept (default: 1 hour)
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_seconds: u64,

    /// Interval between sweeps (default: 10 minutes)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Delay before a Simple conversation reverts to Normal (default: 1 second)
    #[serde(default = "default_simple_revert")]
    pub simple_revert_millis: u64,
}

fn default_idle_ttl() -> u64 {
    3_600
}

fn default_sweep_interval() -> u64 {
    600
}

fn default_simple_revert() -> u64 {
    1_000
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            idle_ttl_seconds: default_idle_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            simple_revert_millis: default_simple_revert(),
        }
    }
}

/// How a single message was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_greeting: bool,
    pub is_short_non_question: bool,
}

#[derive(Debug, Clone)]
struct ModeEntry {
    mode: Mode,
    last_activity: Instant,
}

/// Tracks the reply mode of every live conversation (cheap to clone)
#[derive(Clone)]
pub struct ConversationModeTracker {
    entries: Arc<RwLock<HashMap<String, ModeEntry>>>,
    greeting: Regex,
    settings: ConversationSettings,
}

impl ConversationModeTracker {
    pub fn new(settings: ConversationSettings) -> anyhow::Result<Self> {
        let greeting = RegexBuilder::new(GREETING_PATTERN)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            greeting,
            settings,
        })
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ModeEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ModeEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Classify raw message text
    pub fn classify(&self, text: &str) -> Classification {
        let text = text.trim();
        Classification {
            is_greeting: self.greeting.is_match(text),
            is_short_non_question: text.chars().count() < SHORT_MESSAGE_CHARS && !text.contains('?'),
        }
    }

    /// Record an inbound message and return the conversation's mode.
    ///
    /// A greeting switches to Simple. A message that is neither a greeting
    /// nor short switches to Normal. A short non-question leaves the mode as
    /// it was.
    pub fn observe(&self, conversation_id: &str, text: &str) -> Mode {
        let class = self.classify(text);
        let now = Instant::now();

        let mut entries = self.write();
        let entry = entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| ModeEntry {
                mode: if class.is_greeting { Mode::Simple } else { Mode::Normal },
                last_activity: now,
            });
        entry.last_activity = now;

        if class.is_greeting {
            entry.mode = Mode::Simple;
        } else if !class.is_short_non_question {
            entry.mode = Mode::Normal;
        }

        debug!(
            conversation_id,
            mode = entry.mode.as_str(),
            greeting = class.is_greeting,
            "Determined mode"
        );
        entry.mode
    }

    /// Current mode without touching activity
    pub fn mode(&self, conversation_id: &str) -> Option<Mode> {
        self.read().get(conversation_id).map(|e| e.mode)
    }

    /// Force a conversation back to Normal if it is still tracked
    pub fn reset(&self, conversation_id: &str) -> bool {
        match self.write().get_mut(conversation_id) {
            Some(entry) => {
                entry.mode = Mode::Normal;
                true
            }
            None => false,
        }
    }

    /// Revert to Normal after the configured delay
    pub fn schedule_revert(&self, conversation_id: &str) -> JoinHandle<()> {
        let tracker = self.clone();
        let conversation_id = conversation_id.to_string();
        let delay = Duration::from_millis(self.settings.simple_revert_millis);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tracker.reset(&conversation_id) {
                debug!(conversation_id = %conversation_id, "Reset conversation mode to normal");
            }
        })
    }

    /// Drop entries idle longer than the TTL as of `now`
    pub fn sweep_at(&self, now: Instant) -> usize {
        let ttl = Duration::from_secs(self.settings.idle_ttl_seconds);
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_activity) <= ttl);
        before - entries.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Run `sweep` periodically until the returned task is aborted
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        let period = Duration::from_secs(self.settings.sweep_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = tracker.sweep();
                if removed > 0 {
                    info!(removed, "Swept idle conversations");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConversationModeTracker {
        ConversationModeTracker::new(ConversationSettings::default()).unwrap()
    }

    #[test]
    fn test_classify() {
        let tracker = tracker();

        let hi = tracker.classify("  Hello There ");
        assert!(hi.is_greeting);
        assert!(hi.is_short_non_question);

        let question = tracker.classify("why?");
        assert!(!question.is_greeting);
        assert!(!question.is_short_non_question);

        assert!(!tracker.classify("hi, can you explain lifetimes in detail").is_greeting);
    }

    #[test]
    fn test_new_conversation_initial_mode() {
        let tracker = tracker();
        assert_eq!(tracker.observe("a", "hi"), Mode::Simple);
        assert_eq!(tracker.observe("b", "ok thanks"), Mode::Normal);
    }

    #[test]
    fn test_sweep_removes_idle_entries() {
        let tracker = tracker();
        tracker.observe("a", "hi");
        tracker.observe("b", "hello");

        assert_eq!(tracker.sweep_at(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(3_601);
        assert_eq!(tracker.sweep_at(later), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_memory_policy() {
        assert!(!MemoryPolicy::for_mode(Mode::Simple).enabled);
        let normal = MemoryPolicy::for_mode(Mode::Normal);
        assert!(normal.enabled);
        assert_eq!(normal.semantic_limit, 0);
    }
}
