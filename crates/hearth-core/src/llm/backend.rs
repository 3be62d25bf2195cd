//! Language-model backend abstraction

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::types::{ChatRequest, ChatResponse, ModelInfo, StreamDelta};

/// Capacity of the delta channel between a stream producer and its consumer
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// A chat backend the session controller can drive
///
/// Implementations run the streaming call on their own task and push
/// deltas into the returned channel. Every stream ends with exactly one
/// terminal delta, except when `cancel` fires: then the producer stops
/// and closes the channel without reporting the cancellation as an error.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short name for logs and notices
    fn name(&self) -> &str;

    /// Single-shot, non-streaming completion
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Open a streaming completion
    ///
    /// Returns once the backend has accepted the request; a failure to
    /// connect is reported as an error here rather than as a delta.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamDelta>>;

    /// Models installed on the backend
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Pre-flight reachability check
    async fn is_available(&self) -> Result<()>;
}
