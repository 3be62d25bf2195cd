//! Scripted backend for tests and offline runs
//!
//! Replays queued stream scripts and chat replies in order and records
//! every request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::backend::{ChatBackend, STREAM_CHANNEL_CAPACITY};
use super::types::{ChatRequest, ChatResponse, Message, ModelInfo, StreamDelta, Usage};

/// What a scripted stream does once opened
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Emit these deltas in order, then close the channel
    Deltas(Vec<StreamDelta>),
    /// Emit these deltas, then stay open until cancelled
    HoldUntilCancelled(Vec<StreamDelta>),
    /// Refuse to open the stream
    Refuse(String),
}

impl StreamScript {
    /// A successful reply streamed word by word
    pub fn reply(text: &str, usage: Option<Usage>) -> Self {
        let mut deltas: Vec<StreamDelta> = text
            .split_inclusive(' ')
            .map(|piece| StreamDelta::Content(piece.to_string()))
            .collect();
        deltas.push(StreamDelta::Done(usage));
        StreamScript::Deltas(deltas)
    }
}

/// Which entry point a recorded request went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Stream,
}

/// A request the scripted backend received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub kind: RequestKind,
    pub request: ChatRequest,
}

/// Backend double driven by queued scripts
pub struct ScriptedBackend {
    streams: Mutex<VecDeque<StreamScript>>,
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    models: Vec<ModelInfo>,
    available: bool,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            models: Vec::new(),
            available: true,
        }
    }

    /// Queue a stream script
    pub fn with_stream(self, script: StreamScript) -> Self {
        self.push_stream(script);
        self
    }

    /// Queue a successful non-streaming reply
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.push_reply(Ok(content.into()));
        self
    }

    /// Queue a failing non-streaming call
    pub fn with_chat_error(self, message: impl Into<String>) -> Self {
        self.push_reply(Err(message.into()));
        self
    }

    /// Models reported by `list_models`
    pub fn with_models(mut self, names: &[&str]) -> Self {
        self.models = names
            .iter()
            .map(|name| ModelInfo {
                name: name.to_string(),
                size: 0,
            })
            .collect();
        self
    }

    /// Make `is_available` fail
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn push_stream(&self, script: StreamScript) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(script);
        }
    }

    pub fn push_reply(&self, reply: std::result::Result<String, String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Requests received through `stream_chat`
    pub fn stream_requests(&self) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.kind == RequestKind::Stream)
            .map(|r| r.request)
            .collect()
    }

    /// Requests received through `chat`
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.kind == RequestKind::Chat)
            .map(|r| r.request)
            .collect()
    }

    fn record(&self, kind: RequestKind, request: ChatRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest { kind, request });
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.record(RequestKind::Chat, request);
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err("no scripted reply".to_string()));

        match reply {
            Ok(content) => Ok(ChatResponse {
                message: Message::assistant(content),
                usage: None,
            }),
            Err(message) => Err(Error::Backend(message)),
        }
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamDelta>> {
        self.record(RequestKind::Stream, request);
        let script = self
            .streams
            .lock()
            .ok()
            .and_then(|mut streams| streams.pop_front())
            .unwrap_or_else(|| StreamScript::Refuse("no scripted stream".to_string()));

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        match script {
            StreamScript::Refuse(message) => return Err(Error::Backend(message)),
            StreamScript::Deltas(deltas) => {
                tokio::spawn(async move {
                    for delta in deltas {
                        if cancel.is_cancelled() || tx.send(delta).await.is_err() {
                            return;
                        }
                    }
                });
            }
            StreamScript::HoldUntilCancelled(deltas) => {
                tokio::spawn(async move {
                    for delta in deltas {
                        if tx.send(delta).await.is_err() {
                            return;
                        }
                    }
                    cancel.cancelled().await;
                });
            }
        }
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }

    async fn is_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(Error::BackendUnavailable {
                endpoint: "scripted".to_string(),
                reason: "marked unavailable".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reply_streams_in_order() {
        let backend = ScriptedBackend::new().with_stream(StreamScript::reply("Hello there friend", None));
        let mut rx = backend
            .stream_chat(ChatRequest::new("m", vec![]), CancellationToken::new())
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(delta) = rx.recv().await {
            match delta {
                StreamDelta::Content(piece) => text.push_str(&piece),
                StreamDelta::Done(_) => break,
                StreamDelta::Error(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(text, "Hello there friend");
        assert_eq!(backend.stream_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_until_cancelled_closes_without_terminal() {
        let backend = ScriptedBackend::new().with_stream(StreamScript::HoldUntilCancelled(vec![
            StreamDelta::Content("partial".into()),
        ]));
        let cancel = CancellationToken::new();
        let mut rx = backend
            .stream_chat(ChatRequest::new("m", vec![]), cancel.clone())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(StreamDelta::Content("partial".into())));
        cancel.cancel();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_chat_replies_and_errors() {
        let backend = ScriptedBackend::new().with_reply("summary").with_chat_error("boom");
        let ok = backend.chat(ChatRequest::new("m", vec![])).await.unwrap();
        assert_eq!(ok.message.content, "summary");
        assert!(backend.chat(ChatRequest::new("m", vec![])).await.is_err());
        assert_eq!(backend.chat_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_stream_is_refused() {
        let backend = ScriptedBackend::new();
        let result = backend
            .stream_chat(ChatRequest::new("m", vec![]), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
