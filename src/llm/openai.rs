//! `OpenAI`-compatible streaming backend
//!
//! Posts the full log to `{base_url}/chat/completions` with `stream: true` and
//! decodes the server-sent event body into [`ChatDelta`] values.

use super::types::{ChatDelta, ChatRequest, Message, ToolDefinition};
use super::{ChatBackend, DeltaStream, LlmError};
use crate::config::BackendConfig;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DELTA_CHANNEL_CAPACITY: usize = 64;

/// Streaming chat backend speaking the `chat/completions` protocol
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    enabled: bool,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            enabled: config.enabled,
        })
    }
}

#[derive(Serialize)]
struct StreamingRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn enabled(&self) -> bool {
        self.enabled
    }

    async fn stream_chat_completions(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        let body = StreamingRequest {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: true,
        };

        let mut http_request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                LlmError::network(format!("Connection failed: {e}"))
            } else {
                LlmError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            let detail = error_summary(&body).unwrap_or(body);
            return Err(LlmError::from_status(status.as_u16(), &detail));
        }

        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let bytes = response.bytes_stream();
        tokio::spawn(async move { pump_events(bytes, &tx).await });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Decode an event-stream body into `tx` until it ends, fails or the
/// receiver goes away. Dropping `bytes` on return releases the connection.
async fn pump_events<S, B, E>(bytes: S, tx: &mpsc::Sender<Result<ChatDelta, LlmError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            // Receiver dropped: the turn was cancelled
            () = tx.closed() => return,
            chunk = bytes.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(LlmError::network(format!("Stream interrupted: {e}"))))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            if !forward(tx, decode_sse_line(&String::from_utf8_lossy(&line))).await {
                return;
            }
        }
    }

    // Trailing line without a newline terminator
    if !buffer.is_empty() {
        forward(tx, decode_sse_line(&String::from_utf8_lossy(&buffer))).await;
    }
}

/// Send one decoded line on; false once reading should stop
async fn forward(tx: &mpsc::Sender<Result<ChatDelta, LlmError>>, line: SseLine) -> bool {
    let item = match line {
        SseLine::Skip => return true,
        SseLine::Done => return false,
        SseLine::Delta(delta) => Ok(delta),
        SseLine::Error(error) => Err(error),
    };
    let stop = item.is_err();
    tx.send(item).await.is_ok() && !stop
}

/// One decoded line of an event-stream body
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    /// Blank line, comment, non-data field or unparseable payload
    Skip,
    /// End-of-stream sentinel
    Done,
    Delta(ChatDelta),
    /// Error object delivered inside the stream
    Error(LlmError),
}

pub(crate) fn decode_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.trim().strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if payload.is_empty() {
        return SseLine::Skip;
    }
    if payload == "[DONE]" {
        return SseLine::Done;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed stream payload");
            return SseLine::Skip;
        }
    };

    if value.get("error").is_some() {
        let summary = summarize_error(&value).unwrap_or_else(|| payload.to_string());
        return SseLine::Error(LlmError::stream(summary));
    }

    match serde_json::from_value::<ChatDelta>(value) {
        Ok(delta) => SseLine::Delta(delta),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping stream payload with unexpected shape");
            SseLine::Skip
        }
    }
}

fn error_summary(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| summarize_error(&value))
}

fn summarize_error(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(serde_json::Value::as_str)
        .or_else(|| value.get("error").and_then(serde_json::Value::as_str))
        .or_else(|| value.get("message").and_then(serde_json::Value::as_str))?;
    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}
