//! LLM integration - Ollama API
//!
//! This module provides:
//! - The `ChatBackend` trait the session controller drives
//! - Ollama HTTP client for chat completions and model listing
//! - NDJSON streaming response parsing
//! - A scripted backend for tests
//! - The startup availability probe

mod backend;
mod client;
pub mod mock;
mod streaming;
mod types;

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};

pub use backend::{ChatBackend, STREAM_CHANNEL_CAPACITY};
pub use client::{OllamaClient, OllamaClientBuilder};
pub use streaming::{ChatChunk, parse_ndjson_line};
pub use types::{ChatRequest, ChatResponse, Message, ModelInfo, Role, StreamDelta, Usage};

/// Check that the backend answers within `timeout`
///
/// This is the only backend call with a deadline.
pub async fn probe(backend: &dyn ChatBackend, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, backend.is_available()).await {
        Ok(Ok(())) => {
            info!(backend = backend.name(), "Backend available");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(backend = backend.name(), error = %e, "Backend probe failed");
            Err(e)
        }
        Err(_) => {
            warn!(backend = backend.name(), ?timeout, "Backend probe timed out");
            Err(Error::BackendUnavailable {
                endpoint: backend.name().to_string(),
                reason: format!("no response within {}s", timeout.as_secs()),
            })
        }
    }
}
