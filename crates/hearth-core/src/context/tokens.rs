//! Approximate token counting

use crate::llm::Message;

/// Characters per token assumed by the estimator
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a message list
///
/// Sums `content.len() / 4` per message. Coarse on purpose: the estimate is
/// deterministic and never decreases as content grows, and makes no claim
/// about any particular tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.content.len() / CHARS_PER_TOKEN)
        .sum()
}
