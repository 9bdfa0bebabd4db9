//! LLM backend abstraction
//!
//! A backend reports whether it is usable and turns a [`ChatRequest`] into a
//! stream of [`ChatDelta`] fragments.

mod error;
mod openai;
mod types;

pub use error::LlmError;
pub use openai::OpenAiBackend;
pub use types::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Finite, ordered sequence of deltas for one backend call
pub type DeltaStream = BoxStream<'static, Result<ChatDelta, LlmError>>;

/// Common interface for chat backends
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Whether the backend is configured and usable
    async fn enabled(&self) -> bool;

    /// Start a streamed completion over the full log
    async fn stream_chat_completions(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError>;
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for Arc<T> {
    async fn enabled(&self) -> bool {
        (**self).enabled().await
    }

    async fn stream_chat_completions(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        (**self).stream_chat_completions(request).await
    }
}

/// Logging wrapper for chat backends
pub struct LoggingBackend {
    inner: Arc<dyn ChatBackend>,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn ChatBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ChatBackend for LoggingBackend {
    async fn enabled(&self) -> bool {
        let enabled = self.inner.enabled().await;
        if !enabled {
            tracing::warn!("Chat backend is not enabled");
        }
        enabled
    }

    async fn stream_chat_completions(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        let start = Instant::now();
        let model = request.model.clone();
        let messages = request.messages.len();
        let tools = request.tools.len();

        match self.inner.stream_chat_completions(request).await {
            Ok(stream) => {
                tracing::info!(
                    model = %model,
                    messages,
                    tools,
                    connect_ms = %start.elapsed().as_millis(),
                    "LLM stream opened"
                );
                let mut deltas = 0usize;
                let logged = stream.inspect(move |item| match item {
                    Ok(_) => {
                        deltas += 1;
                        tracing::trace!(model = %model, deltas, "LLM delta received");
                    }
                    Err(e) => tracing::error!(
                        model = %model,
                        deltas,
                        duration_ms = %start.elapsed().as_millis(),
                        error = %e.message,
                        transient = e.kind.is_transient(),
                        "LLM stream failed"
                    ),
                });
                Ok(logged.boxed())
            }
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
                Err(e)
            }
        }
    }
}
