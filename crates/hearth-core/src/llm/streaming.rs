//! Streaming response support for the Ollama chat API
//!
//! Ollama streams newline-delimited JSON: one object per line, each
//! carrying a content fragment, with the final object marked `done`
//! and carrying the evaluation counts.

use serde::Deserialize;

use super::types::{StreamDelta, Usage};

/// Message fragment inside a chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// One line of an Ollama chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    /// Tokens in the prompt (final chunk only)
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    /// Tokens generated (final chunk only)
    #[serde(default)]
    pub eval_count: Option<u32>,
    /// Error reported mid-stream by the server
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatChunk {
    /// Get the content fragment from this chunk (if any)
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Usage counts, present only when the server reported both
    pub fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (Some(prompt), Some(completion)) => Some(Usage::new(prompt, completion)),
            (Some(prompt), None) => Some(Usage::new(prompt, 0)),
            _ => None,
        }
    }
}

/// Parse one NDJSON line into the deltas it carries
///
/// A final chunk may carry trailing content as well as the done marker,
/// so a single line can yield up to two deltas.
pub fn parse_ndjson_line(line: &str) -> Vec<StreamDelta> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let chunk = match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => chunk,
        Err(e) => return vec![StreamDelta::Error(format!("Failed to parse chunk: {}", e))],
    };

    if let Some(error) = chunk.error {
        return vec![StreamDelta::Error(error)];
    }

    let mut deltas = Vec::new();
    if let Some(content) = chunk.content() {
        deltas.push(StreamDelta::Content(content.to_string()));
    }
    if chunk.done {
        deltas.push(StreamDelta::Done(chunk.usage()));
    }
    deltas
}
