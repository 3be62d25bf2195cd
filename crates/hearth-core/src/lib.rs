//! Hearth Core Library
//!
//! This crate provides the core functionality for Hearth, including:
//! - Session controller (streaming turns, cancellation, slash commands)
//! - Session storage (append-only JSONL transcripts)
//! - Context management (token estimate, compaction, context ladder)
//! - LLM integration (Ollama API)
//! - Personality files and long-term memory
//! - Heartbeat check-ins

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod heartbeat;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod session;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::controller::{ControllerSettings, Event, SessionController, UiEvent};
    pub use crate::error::{Error, Result};
    pub use crate::llm::{ChatBackend, Message, OllamaClient, Role};
    pub use crate::session::SessionStore;
}
