//! Chat types shared by the backend, the session store and the controller

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human input
    User,
    /// Model response
    Assistant,
    /// Instructions and context
    System,
    /// Synthetic summary of older turns, produced by compaction
    Summary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Summary => "summary",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a conversation; immutable once appended to a transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a compaction summary message
    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(Role::Summary, content)
    }
}

/// Token usage reported by the backend for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A request for a chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Model identifier (e.g., "qwen3:8b")
    pub model: String,
    /// Full message history, system prompt first
    pub messages: Vec<Message>,
    /// Context window to request from the backend
    pub context_size: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            context_size: None,
        }
    }

    /// Set the context window size
    pub fn with_context_size(mut self, size: u32) -> Self {
        self.context_size = Some(size);
        self
    }
}

/// Response from a non-streaming chat call
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<Usage>,
}

/// A model installed on the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: u64,
}

/// Unit of progress from a streaming call
///
/// Exactly one of `Done` or `Error` terminates a stream; nothing follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// A content fragment
    Content(String),
    /// Successful end of stream, with usage if the backend reported it
    Done(Option<Usage>),
    /// The stream failed
    Error(String),
}

impl StreamDelta {
    /// Whether this delta closes the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamDelta::Content(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::summary("earlier")).unwrap();
        assert_eq!(json, r#"{"role":"summary","content":"earlier"}"#);
    }

    #[test]
    fn test_role_names_match_serde() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Summary] {
            let json = format!("\"{}\"", role.as_str());
            assert_eq!(serde_json::from_str::<Role>(&json).unwrap(), role);
        }
        assert!(serde_json::from_str::<Role>("\"tool\"").is_err());
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_terminal_deltas() {
        assert!(!StreamDelta::Content("a".into()).is_terminal());
        assert!(StreamDelta::Done(None).is_terminal());
        assert!(StreamDelta::Error("boom".into()).is_terminal());
    }
}
