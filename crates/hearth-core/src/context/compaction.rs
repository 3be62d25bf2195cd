//! Conversation compaction
//!
//! When the estimated history exceeds 80% of the token budget, everything
//! but the most recent messages is summarized by the backend and replaced
//! with a single summary-role message.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::llm::{ChatBackend, ChatRequest, Message, Role};

use super::tokens::estimate_tokens;

/// Fraction of the budget at which compaction kicks in
pub const COMPACTION_THRESHOLD: f64 = 0.8;

/// Instruction sent alongside the rendered history
pub const SUMMARY_PROMPT: &str = "Summarize this conversation concisely. Capture key topics discussed, decisions made, and important context. Write in third person, past tense. Keep it under 200 words.";

/// Outcome of one compaction event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    pub summary: String,
    /// Messages before compaction
    pub original_count: usize,
    /// Messages after compaction: the summary plus the kept tail
    pub remaining_count: usize,
    /// Token estimate of the summarized segment
    pub compacted_tokens: usize,
}

/// A compacted message list and what was done to produce it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compacted {
    pub result: CompactionResult,
    pub messages: Vec<Message>,
}

/// Token count above which `max_tokens` is considered breached
pub fn threshold(max_tokens: usize) -> usize {
    (max_tokens as f64 * COMPACTION_THRESHOLD) as usize
}

/// Whether `compact` would do anything for these inputs
pub fn needs_compaction(messages: &[Message], max_tokens: usize, keep_recent: usize) -> bool {
    messages.len() > keep_recent + 1 && estimate_tokens(messages) > threshold(max_tokens)
}

/// Render the summarized segment as a flat transcript
fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        match message.role {
            Role::Summary => {
                out.push_str("[Previous summary]: ");
            }
            role => {
                out.push_str(role.as_str());
                out.push_str(": ");
            }
        }
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}

/// Summarize old turns so the history fits under `max_tokens`
///
/// Returns `Ok(None)` when the history is under the threshold or too short
/// to split; the caller's list stays as it is. On failure the caller's
/// list is also untouched, so no history is lost to a failed summary.
pub async fn compact(
    backend: &dyn ChatBackend,
    model: &str,
    messages: &[Message],
    max_tokens: usize,
    keep_recent: usize,
) -> Result<Option<Compacted>> {
    if !needs_compaction(messages, max_tokens, keep_recent) {
        return Ok(None);
    }

    let split = messages.len() - keep_recent;
    let (old, recent) = messages.split_at(split);
    let compacted_tokens = estimate_tokens(old);

    info!(
        model,
        total = messages.len(),
        summarized = old.len(),
        tokens = compacted_tokens,
        "Compacting conversation"
    );

    let request = ChatRequest::new(
        model,
        vec![Message::system(SUMMARY_PROMPT), Message::user(render_transcript(old))],
    );

    let response = backend.chat(request).await.map_err(|e| {
        warn!(error = %e, "Summary request failed");
        Error::CompactionFailed(e.to_string())
    })?;

    let summary = response.message.content.trim().to_string();
    if summary.is_empty() {
        return Err(Error::CompactionFailed(
            "backend returned an empty summary".to_string(),
        ));
    }

    let mut compacted = Vec::with_capacity(1 + recent.len());
    compacted.push(Message::summary(summary.clone()));
    compacted.extend_from_slice(recent);

    Ok(Some(Compacted {
        result: CompactionResult {
            summary,
            original_count: messages.len(),
            remaining_count: compacted.len(),
            compacted_tokens,
        },
        messages: compacted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;

    fn long_history(turns: usize, chars: usize) -> Vec<Message> {
        (0..turns)
            .map(|i| {
                let body = format!("{}{}", i, "x".repeat(chars));
                if i % 2 == 0 {
                    Message::user(body)
                } else {
                    Message::assistant(body)
                }
            })
            .collect()
    }

    #[test]
    fn test_threshold() {
        assert_eq!(threshold(1000), 800);
        assert_eq!(threshold(32768), 26214);
    }

    #[tokio::test]
    async fn test_below_threshold_is_noop() {
        let backend = ScriptedBackend::new();
        let messages = long_history(20, 10);
        let outcome = compact(&backend, "m", &messages, 10_000, 4).await.unwrap();
        assert!(outcome.is_none());
        assert!(backend.chat_requests().is_empty());
    }

    #[tokio::test]
    async fn test_too_few_messages_is_noop() {
        let backend = ScriptedBackend::new();
        let messages = long_history(5, 4000);
        let outcome = compact(&backend, "m", &messages, 100, 4).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_compaction_keeps_recent_tail() {
        let backend = ScriptedBackend::new().with_reply("They discussed many things.");
        let messages = long_history(12, 400);
        let keep_recent = 4;

        let compacted = compact(&backend, "qwen3:8b", &messages, 1000, keep_recent)
            .await
            .unwrap()
            .expect("history over threshold");

        assert_eq!(compacted.messages.len(), 1 + keep_recent);
        assert_eq!(compacted.messages[0], Message::summary("They discussed many things."));
        assert_eq!(&compacted.messages[1..], &messages[messages.len() - keep_recent..]);

        let result = &compacted.result;
        assert_eq!(result.original_count, 12);
        assert_eq!(result.remaining_count, 5);
        assert_eq!(result.compacted_tokens, estimate_tokens(&messages[..8]));
    }

    #[tokio::test]
    async fn test_summary_request_shape() {
        let backend = ScriptedBackend::new().with_reply("summary");
        let mut messages = vec![Message::summary("Earlier summary.")];
        messages.extend(long_history(8, 400));

        compact(&backend, "qwen3:8b", &messages, 500, 2).await.unwrap();

        let requests = backend.chat_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "qwen3:8b");
        assert_eq!(request.messages[0], Message::system(SUMMARY_PROMPT));
        let rendered = &request.messages[1].content;
        assert!(rendered.starts_with("[Previous summary]: Earlier summary.\n"));
        assert!(rendered.contains("\nuser: 0"));
        assert!(rendered.contains("\nassistant: 1"));
    }

    #[tokio::test]
    async fn test_failed_summary_reports_error() {
        let backend = ScriptedBackend::new().with_chat_error("model crashed");
        let messages = long_history(12, 400);
        let err = compact(&backend, "m", &messages, 1000, 4).await.unwrap_err();
        assert!(matches!(err, Error::CompactionFailed(ref msg) if msg.contains("model crashed")));
    }

    #[tokio::test]
    async fn test_empty_summary_is_a_failure() {
        let backend = ScriptedBackend::new().with_reply("   ");
        let messages = long_history(12, 400);
        assert!(compact(&backend, "m", &messages, 1000, 4).await.is_err());
    }
}
