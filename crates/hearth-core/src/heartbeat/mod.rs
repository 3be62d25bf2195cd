//! Heartbeat scheduling
//!
//! A one-shot deadline the controller re-arms after every finished turn.
//! When it fires while the controller is idle, the controller runs a
//! check-in turn whose reply is dropped if it contains the skip sentinel.

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::prompt::is_non_english;

/// Longest accepted check-in interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reply meaning "nothing worth saying right now"
pub const SKIP_SENTINEL: &str = "HEARTBEAT_SKIP";

const CHECK_IN_PROMPT: &str = "[Heartbeat check-in] Review the user's memory and conversation context. If there's something relevant to say, say it briefly. If not, respond with exactly 'HEARTBEAT_SKIP'.";

const GREETING_PROMPT: &str = "Hello! Please greet me briefly and let me know you're ready to chat.";

fn with_language(prompt: &str, language: &str) -> String {
    if is_non_english(language) {
        format!("{} Respond in {}.", prompt, language.trim())
    } else {
        prompt.to_string()
    }
}

/// Synthetic user message for a heartbeat turn
pub fn check_in_prompt(language: &str) -> String {
    with_language(CHECK_IN_PROMPT, language)
}

/// Synthetic user message for the first-run greeting
pub fn greeting_prompt(language: &str) -> String {
    with_language(GREETING_PROMPT, language)
}

/// Whether a heartbeat reply declines to interrupt
pub fn is_skip(reply: &str) -> bool {
    reply.contains(SKIP_SENTINEL)
}

/// Re-armable heartbeat deadline
#[derive(Debug, Default)]
pub struct HeartbeatTimer {
    deadline: Option<Instant>,
}

impl HeartbeatTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `interval` from now, replacing any earlier deadline
    ///
    /// Intervals above `MAX_INTERVAL` are clamped to it.
    pub fn arm(&mut self, interval: Duration) {
        if interval > MAX_INTERVAL {
            warn!(?interval, "Heartbeat interval clamped");
        }
        let interval = interval.min(MAX_INTERVAL);
        self.deadline = Instant::now().checked_add(interval);
        debug!(?interval, armed = self.deadline.is_some(), "Heartbeat armed");
    }

    pub fn disarm(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Heartbeat disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the deadline passes; never resolves while unarmed
    ///
    /// Firing consumes the deadline, so each arm yields at most one tick.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}
