//! Ollama HTTP client implementation
//!
//! Provides an async client for the Ollama REST API with:
//! - Chat completions (streaming NDJSON and non-streaming)
//! - Per-request context window (`options.num_ctx`)
//! - Model listing and availability checks
//!
//! No request carries a timeout; a stream runs until the server finishes
//! it or the caller cancels it.

use std::borrow::Cow;

use futures_util::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_BASE_URL;
use crate::error::{Error, Result};

use super::backend::{ChatBackend, STREAM_CHANNEL_CAPACITY};
use super::streaming::{ChatChunk, parse_ndjson_line};
use super::types::{ChatRequest, ChatResponse, Message, ModelInfo, Role, StreamDelta};

/// Prefix used when a compaction summary is sent to the model
const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:\n";

/// Ollama client
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct OllamaClient {
    /// HTTP client for making requests
    http_client: HttpClient,
    /// Base URL of the Ollama server
    base_url: String,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Builder for creating an OllamaClient
#[derive(Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    http_client: Option<HttpClient>,
}

impl OllamaClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL (defaults to the local Ollama port)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use a preconfigured HTTP client
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the OllamaClient
    pub fn build(self) -> Result<OllamaClient> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => HttpClient::builder().build().map_err(Error::Network)?,
        };

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(OllamaClient {
            http_client,
            base_url,
        })
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Cow<'a, str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        match message.role {
            Role::Summary => WireMessage {
                role: "system",
                content: Cow::Owned(format!("{}{}", SUMMARY_PREFIX, message.content)),
            },
            role => WireMessage {
                role: role.as_str(),
                content: Cow::Borrowed(&message.content),
            },
        }
    }
}

#[derive(Serialize)]
struct WireOptions {
    num_ctx: u32,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
}

impl<'a> WireRequest<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream,
            options: request.context_size.map(|num_ctx| WireOptions { num_ctx }),
        }
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    /// Create a client for the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        OllamaClientBuilder::new().base_url(base_url).build()
    }

    /// Create a new builder for OllamaClient
    pub fn builder() -> OllamaClientBuilder {
        OllamaClientBuilder::new()
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            context_size = ?request.context_size,
            stream,
            "Sending chat request"
        );

        let response = self
            .http_client
            .post(&url)
            .json(&WireRequest::new(request, stream))
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }
        Ok(response)
    }

    fn connect_error(&self, e: reqwest::Error) -> Error {
        if e.is_connect() {
            Error::BackendUnavailable {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            }
        } else {
            Error::Network(e)
        }
    }

    /// Handle error responses from the API
    async fn handle_error_response<T>(
        &self,
        status: reqwest::StatusCode,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ChatChunk>(&body)
            .ok()
            .and_then(|chunk| chunk.error)
            .unwrap_or(body);

        match status.as_u16() {
            400 => Err(Error::Backend(format!("Bad request: {}", detail))),
            404 => Err(Error::Backend(format!("Model not found: {}", detail))),
            500..=599 => Err(Error::Backend(format!("Server error ({}): {}", status, detail))),
            _ => Err(Error::Backend(format!("HTTP error {}: {}", status, detail))),
        }
    }
}

/// Split a streaming body into lines
///
/// Bytes are buffered until a full line arrives, so a multibyte character
/// split across network chunks is decoded whole. A line that is not valid
/// UTF-8 is reported as an error.
fn ndjson_lines<S, B, E>(
    chunks: S,
) -> impl futures_core::Stream<Item = std::result::Result<String, String>>
where
    S: futures_core::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        futures_util::pin_mut!(chunks);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend_from_slice(bytes.as_ref());

                    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        yield decode_line(&line[..newline_pos]);
                    }
                }
                Err(e) => {
                    yield Err(e.to_string());
                    break;
                }
            }
        }

        if !buffer.iter().all(u8::is_ascii_whitespace) {
            yield decode_line(&buffer);
        }
    }
}

fn decode_line(line: &[u8]) -> std::result::Result<String, String> {
    String::from_utf8(line.to_vec())
        .map_err(|e| format!("stream line is not valid UTF-8: {}", e))
}

/// Forward parsed deltas to the consumer until a terminal delta or cancellation
async fn pump_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<StreamDelta>,
    cancel: CancellationToken,
) {
    let lines = ndjson_lines(response.bytes_stream());
    futures_util::pin_mut!(lines);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stream cancelled by caller");
                return;
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => {
                for delta in parse_ndjson_line(&line) {
                    let terminal = delta.is_terminal();
                    if tx.send(delta).await.is_err() || terminal {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                // Reads racing a cancellation are expected to fail
                if cancel.is_cancelled() {
                    return;
                }
                warn!(error = %e, "Stream read failed");
                let _ = tx.send(StreamDelta::Error(e)).await;
                return;
            }
            None => {
                if !cancel.is_cancelled() {
                    let _ = tx
                        .send(StreamDelta::Error(
                            "stream ended before completion".to_string(),
                        ))
                        .await;
                }
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let response = self.post_chat(&request, false).await?;
        let chunk: ChatChunk = response.json().await?;

        if let Some(error) = chunk.error {
            return Err(Error::Backend(error));
        }

        let content = chunk
            .message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(ChatResponse {
            message: Message::assistant(content),
            usage: chunk.usage(),
        })
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamDelta>> {
        let response = self.post_chat(&request, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump_stream(response, tx, cancel));
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }

    async fn is_available(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http_client.get(&url).send().await.map_err(|e| {
            Error::BackendUnavailable {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::BackendUnavailable {
                endpoint: self.base_url.clone(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder_defaults() {
        let client = OllamaClient::builder().build().unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_client_debug() {
        let client = OllamaClient::new("http://gpu-box:11434").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("gpu-box"));
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OllamaClient>();
    }

    #[test]
    fn test_wire_request_includes_num_ctx() {
        let request = ChatRequest::new("qwen3:8b", vec![Message::user("Hi")]).with_context_size(8192);
        let json = serde_json::to_value(WireRequest::new(&request, true)).unwrap();
        assert_eq!(json["options"]["num_ctx"], 8192);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_wire_request_omits_options_without_context_size() {
        let request = ChatRequest::new("qwen3:8b", vec![Message::user("Hi")]);
        let json = serde_json::to_value(WireRequest::new(&request, false)).unwrap();
        assert!(json.get("options").is_none());
    }

    fn split_at_byte(body: &[u8], at: usize) -> Vec<std::result::Result<Vec<u8>, std::io::Error>> {
        vec![Ok(body[..at].to_vec()), Ok(body[at..].to_vec())]
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let body = "{\"message\":{\"role\":\"assistant\",\"content\":\"café\"},\"done\":false}\n".as_bytes();
        // Cut between the two bytes of 'é'
        let at = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let lines: Vec<_> = ndjson_lines(futures_util::stream::iter(split_at_byte(body, at)))
            .collect()
            .await;

        assert_eq!(lines.len(), 1);
        let line = lines[0].as_ref().unwrap();
        assert_eq!(
            parse_ndjson_line(line),
            vec![StreamDelta::Content("café".to_string())]
        );
    }

    #[tokio::test]
    async fn test_lines_split_over_chunks_and_trailing_line() {
        let chunks: Vec<std::result::Result<&[u8], std::io::Error>> = vec![
            Ok(&b"{\"done\":fa"[..]),
            Ok(&b"lse}\n{\"done\""[..]),
            Ok(&b":true}"[..]),
        ];
        let lines: Vec<_> = ndjson_lines(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(
            lines,
            vec![
                Ok("{\"done\":false}".to_string()),
                Ok("{\"done\":true}".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_an_error() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(vec![b'{', 0xFF, 0xFE, b'}', b'\n'])];
        let lines: Vec<_> = ndjson_lines(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].as_ref().unwrap_err().contains("not valid UTF-8"));
    }

    #[test]
    fn test_summary_sent_as_labelled_system_message() {
        let summary = Message::summary("The user asked about Rust.");
        let wire = WireMessage::from(&summary);
        assert_eq!(wire.role, "system");
        assert!(wire.content.starts_with(SUMMARY_PREFIX));
        assert!(wire.content.ends_with("The user asked about Rust."));
    }
}
