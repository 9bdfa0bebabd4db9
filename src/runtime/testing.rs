//! Mock implementations for testing
//!
//! These mocks enable end-to-end session tests without real I/O.

use super::{spawn_session, ConversationHandle, SessionConfig};
use crate::llm::{ChatBackend, ChatDelta, ChatRequest, DeltaStream, LlmError, ToolCallDelta};
use crate::tools::ToolRegistry;
use crate::view::ConversationView;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

type Script = Result<Vec<Result<ChatDelta, LlmError>>, LlmError>;

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend that replays queued delta scripts, one per call
pub struct MockBackend {
    enabled: AtomicBool,
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Queue a raw delta script
    pub fn queue_stream(&self, items: Vec<Result<ChatDelta, LlmError>>) {
        self.scripts.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a text reply split into the given fragments
    pub fn queue_text(&self, fragments: &[&str]) {
        self.queue_stream(
            fragments
                .iter()
                .map(|f| Ok(ChatDelta::content(*f)))
                .collect(),
        );
    }

    /// Queue a single tool call whose arguments arrive in one fragment
    pub fn queue_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.queue_stream(vec![
            Ok(ChatDelta::tool_calls(vec![ToolCallDelta::start(0, id, name)])),
            Ok(ChatDelta::tool_calls(vec![ToolCallDelta::arguments(
                0, arguments,
            )])),
        ]);
    }

    /// Queue a failure to open the stream
    pub fn queue_error(&self, error: LlmError) {
        self.scripts.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn stream_chat_completions(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))?;
        Ok(stream::iter(script).boxed())
    }
}

// ============================================================================
// Stalled Backend (for cancellation testing)
// ============================================================================

/// Backend whose stream emits one fragment and then never finishes
pub struct StalledBackend {
    first_fragment: String,
    /// Notified when a stream is opened
    pub stream_started: Arc<Notify>,
}

impl StalledBackend {
    pub fn new(first_fragment: impl Into<String>) -> Self {
        Self {
            first_fragment: first_fragment.into(),
            stream_started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for StalledBackend {
    async fn enabled(&self) -> bool {
        true
    }

    async fn stream_chat_completions(&self, _request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        self.stream_started.notify_one();
        let first = stream::iter(vec![Ok(ChatDelta::content(self.first_fragment.clone()))]);
        Ok(first.chain(stream::pending()).boxed())
    }
}

// ============================================================================
// Test Session
// ============================================================================

/// A running session plus the backend driving it
pub struct TestSession<B: ChatBackend + 'static> {
    pub handle: ConversationHandle,
    pub backend: Arc<B>,
}

impl TestSession<MockBackend> {
    pub fn builder() -> TestSessionBuilder<MockBackend> {
        TestSessionBuilder::new(MockBackend::new())
    }
}

pub struct TestSessionBuilder<B> {
    backend: B,
    config: SessionConfig,
    tools: Option<ToolRegistry>,
}

impl<B: ChatBackend + 'static> TestSessionBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: SessionConfig::new("You are a test assistant.")
                .with_session_id("test-session")
                .with_model("test-model"),
            tools: None,
        }
    }

    pub fn config(mut self, f: impl FnOnce(SessionConfig) -> SessionConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> TestSession<B> {
        let backend = Arc::new(self.backend);
        let tools = self.tools.unwrap_or_else(ToolRegistry::standard);
        let handle = spawn_session(self.config, Arc::clone(&backend), tools);
        TestSession { handle, backend }
    }
}

impl<B: ChatBackend + 'static> TestSession<B> {
    /// Wait until the published view satisfies `predicate`
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&ConversationView) -> bool,
    ) -> bool {
        let mut rx = self.handle.subscribe();
        tokio::time::timeout(timeout, async move {
            loop {
                let done = predicate(&*rx.borrow_and_update());
                if done {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Wait until `count` turns have finished
    pub async fn wait_for_turns(&self, count: u64) -> bool {
        self.wait_for(Duration::from_secs(2), |v| v.completed_turns >= count)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, Role};
    use crate::runtime::SubmitOutcome;
    use crate::state_machine::state::TurnErrorKind;
    use crate::view::TranscriptEntry;
    use serde_json::json;

    fn entry(role: Role, content: &str) -> TranscriptEntry {
        TranscriptEntry {
            role,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_backend_replays_scripts() {
        let mock = MockBackend::new();
        mock.queue_text(&["a", "b"]);
        let request = ChatRequest {
            model: "m".into(),
            messages: Arc::from(vec![Message::system("s")]),
            tools: vec![],
        };

        let stream = mock.stream_chat_completions(&request).await.unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(mock.stream_chat_completions(&request).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    /// A streamed text reply is committed once the stream completes
    #[tokio::test]
    async fn test_happy_path() {
        let session = TestSession::builder().build();
        session
            .backend
            .queue_text(&["This ", "is ", "a CPU panel."]);

        let outcome = session.handle.submit("what is this panel?").await;
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert_eq!(
            view.transcript,
            vec![
                entry(Role::User, "what is this panel?"),
                entry(Role::Assistant, "This is a CPU panel."),
            ]
        );
        assert_eq!(view.live_reply, "");
        assert!(!view.loading);
        assert!(!view.busy);
        assert_eq!(view.state, "committed");
        assert!(view.last_error.is_none());

        let messages = session.handle.messages().await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::system("You are a test assistant."));

        // The request carried the log up to and including the user message
        let requests = session.backend.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].tools[0].function.name, "analyze_dashboard");
    }

    /// Tool call, tool result, then a text reply: four messages after the system prompt
    #[tokio::test]
    async fn test_tool_round_trip() {
        let session = TestSession::builder().build();
        let panel = json!({"title": "CPU", "targets": [{"expr": "cpu_usage"}]});
        session.backend.queue_text(&["Describing the panel."]);
        session
            .backend
            .queue_tool_call("call_1", "analyze_dashboard", "{}");
        session.backend.queue_text(&["It shows ", "CPU usage."]);

        assert_eq!(
            session.handle.context_received(panel.clone()).await,
            SubmitOutcome::Accepted
        );
        assert!(session.wait_for_turns(1).await);

        assert_eq!(
            session.handle.submit("what does it measure?").await,
            SubmitOutcome::Accepted
        );
        assert!(session.wait_for_turns(2).await);

        let messages = session.handle.messages().await.unwrap();
        // system, context turn (user + assistant), then the tool round trip
        assert_eq!(messages.len(), 7);
        let round = &messages[3..];
        assert_eq!(round[0], Message::user("what does it measure?"));
        assert_eq!(round[1].role, Role::Assistant);
        assert_eq!(round[1].content, None);
        assert_eq!(round[1].tool_calls[0].id, "call_1");
        assert_eq!(round[2].role, Role::Tool);
        assert_eq!(round[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(round[2].text(), panel.to_string());
        assert_eq!(round[3], Message::assistant("It shows CPU usage."));

        // The second call in the round saw the tool result
        let requests = session.backend.recorded_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].messages.len(), 6);
        assert_eq!(requests[2].messages[5].role, Role::Tool);
    }

    /// A mid-stream error keeps only the user's message and surfaces the error
    #[tokio::test]
    async fn test_error_isolation() {
        let session = TestSession::builder().build();
        session.backend.queue_stream(vec![
            Ok(ChatDelta::content("Par")),
            Err(LlmError::stream("connection reset")),
        ]);

        session.handle.submit("hello").await;
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert_eq!(view.transcript, vec![entry(Role::User, "hello")]);
        assert!(!view.loading);
        assert_eq!(view.live_reply, "");
        let error = view.last_error.unwrap();
        assert_eq!(error.kind, TurnErrorKind::Stream);
        assert_eq!(error.message, "connection reset");

        // The session recovers on the next submission
        session.backend.queue_text(&["Hi again."]);
        session.handle.submit("retry").await;
        assert!(session.wait_for_turns(2).await);
        let view = session.handle.view();
        assert!(view.last_error.is_none());
        assert_eq!(view.transcript.len(), 3);
    }

    #[tokio::test]
    async fn test_open_error_fails_turn() {
        let session = TestSession::builder().build();
        session.backend.queue_error(LlmError::auth("HTTP 401: bad key"));

        session.handle.submit("hello").await;
        assert!(session.wait_for_turns(1).await);
        assert_eq!(session.handle.view().state, "failed");
        assert_eq!(session.handle.messages().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_submit_is_ignored() {
        let session = TestSession::builder().build();
        assert_eq!(session.handle.submit("").await, SubmitOutcome::Ignored);
        assert_eq!(session.handle.submit("   ").await, SubmitOutcome::Ignored);

        let view = session.handle.view();
        assert_eq!(view.state, "idle");
        assert!(view.transcript.is_empty());
        assert_eq!(session.handle.messages().await.unwrap().len(), 1);
        assert!(session.backend.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_backend_unavailable() {
        let session = TestSession::builder().build();
        session.backend.set_enabled(false);

        assert_eq!(
            session.handle.submit("hello").await,
            SubmitOutcome::Accepted
        );
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert!(view.transcript.is_empty());
        assert!(!view.busy);
        assert_eq!(
            view.last_error.map(|e| e.kind),
            Some(TurnErrorKind::BackendUnavailable)
        );
        assert!(session.backend.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_aborts_turn() {
        let session = TestSession::builder().build();
        session.backend.queue_tool_call("c1", "delete_dashboard", "{}");

        session.handle.submit("clean up").await;
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert_eq!(
            view.last_error.map(|e| e.kind),
            Some(TurnErrorKind::UnknownTool)
        );
        // The tool round was never committed
        let messages = session.handle.messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_empty_registry_sends_no_tools() {
        let session = TestSession::builder().tools(ToolRegistry::empty()).build();
        session
            .backend
            .queue_tool_call("c1", "analyze_dashboard", "{}");

        session.handle.submit("describe").await;
        assert!(session.wait_for_turns(1).await);

        let requests = session.backend.recorded_requests();
        assert!(requests[0].tools.is_empty());
        assert_eq!(
            session.handle.view().last_error.map(|e| e.kind),
            Some(TurnErrorKind::UnknownTool)
        );
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let session = TestSession::builder()
            .config(|c| c.with_max_tool_rounds(2))
            .build();
        session.backend.queue_tool_call("c1", "analyze_dashboard", "{}");
        session.backend.queue_tool_call("c2", "analyze_dashboard", "{}");

        session.handle.submit("loop forever").await;
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert_eq!(
            view.last_error.map(|e| e.kind),
            Some(TurnErrorKind::ToolRoundLimit)
        );
        assert_eq!(session.backend.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_context_is_ignored() {
        let session = TestSession::builder().build();
        session.backend.queue_text(&["A memory panel."]);
        let panel = json!({"title": "Memory"});

        assert_eq!(
            session.handle.context_received(panel.clone()).await,
            SubmitOutcome::Accepted
        );
        assert!(session.wait_for_turns(1).await);
        assert_eq!(
            session.handle.context_received(panel).await,
            SubmitOutcome::Duplicate
        );
        assert_eq!(
            session.handle.context_received(serde_json::Value::Null).await,
            SubmitOutcome::Ignored
        );
        assert_eq!(session.backend.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_initial_context_is_submitted() {
        let panel = json!({"title": "Disk"});
        let mock = MockBackend::new();
        mock.queue_text(&["A disk panel."]);
        let session = TestSessionBuilder::new(mock)
            .config(|c| c.with_initial_context(panel.clone()))
            .build();

        assert!(session.wait_for_turns(1).await);
        let messages = session.handle.messages().await.unwrap();
        assert_eq!(messages[1], Message::user(panel.to_string()));
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_rejected() {
        let session = TestSessionBuilder::new(StalledBackend::new("Thinking")).build();
        let started = Arc::clone(&session.backend.stream_started);

        session.handle.submit("first").await;
        tokio::time::timeout(Duration::from_secs(1), started.notified())
            .await
            .expect("stream should start");

        assert_eq!(session.handle.submit("second").await, SubmitOutcome::Busy);
        let messages = session.handle.messages().await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    /// Cancel stops the stream and discards the partial reply
    #[tokio::test]
    async fn test_cancel_discards_partial_reply() {
        let session = TestSessionBuilder::new(StalledBackend::new("Partial")).build();
        let started = Arc::clone(&session.backend.stream_started);

        session.handle.submit("hello").await;
        tokio::time::timeout(Duration::from_secs(1), started.notified())
            .await
            .expect("stream should start");
        assert!(
            session
                .wait_for(Duration::from_secs(1), |v| v.live_reply == "Partial")
                .await
        );

        session.handle.cancel().await;
        assert!(session.wait_for_turns(1).await);

        let view = session.handle.view();
        assert_eq!(view.state, "idle");
        assert_eq!(view.live_reply, "");
        assert!(!view.loading);
        assert_eq!(view.transcript, vec![entry(Role::User, "hello")]);
    }

    #[tokio::test]
    async fn test_loading_clears_on_first_content() {
        let session = TestSessionBuilder::new(StalledBackend::new("Hi")).build();

        session.handle.submit("hello").await;
        assert!(
            session
                .wait_for(Duration::from_secs(1), |v| v.busy
                    && !v.loading
                    && v.live_reply == "Hi")
                .await
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let session = TestSession::builder().build();
        let mut rx = session.handle.subscribe();
        session.handle.shutdown().await;
        // The view channel closes once the task is gone
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
