//! Runtime for executing conversations
//!
//! Each session is one tokio task that owns the state, the message log and
//! the per-turn accumulators. Callers talk to it through a
//! [`ConversationHandle`] and observe it through [`ConversationView`]
//! snapshots.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;

use crate::llm::{ChatBackend, Message};
use crate::tools::ToolRegistry;
use crate::view::ConversationView;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Everything fixed at session start
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub model: String,
    /// Content of the single system message
    pub system_prompt: String,
    pub max_tool_rounds: u32,
    /// Dashboard/panel context submitted automatically on start
    pub initial_context: Option<Value>,
}

impl SessionConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: system_prompt.into(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            initial_context: None,
        }
    }

    #[cfg(test)]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_initial_context(mut self, context: Value) -> Self {
        self.initial_context = Some(context);
        self
    }
}

/// How the controller answered a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A turn was started
    Accepted,
    /// Blank text or null context; nothing changed
    Ignored,
    /// A turn is already in flight
    Busy,
    /// Context equal to the last accepted one
    Duplicate,
    /// The session has stopped
    Closed,
}

/// Requests from a handle to the controller task
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        text: String,
        ack: oneshot::Sender<SubmitOutcome>,
    },
    ContextReceived {
        context: Value,
        ack: oneshot::Sender<SubmitOutcome>,
    },
    Snapshot {
        ack: oneshot::Sender<Arc<[Message]>>,
    },
    Cancel,
}

/// Handle to interact with a running conversation
pub struct ConversationHandle {
    session_id: String,
    command_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<ConversationView>,
    task: JoinHandle<()>,
}

impl ConversationHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submit user text. Blank text is ignored; a busy session rejects it.
    pub async fn submit(&self, text: impl Into<String>) -> SubmitOutcome {
        let (ack, rx) = oneshot::channel();
        let command = Command::Submit {
            text: text.into(),
            ack,
        };
        self.request(command, rx)
            .await
            .unwrap_or(SubmitOutcome::Closed)
    }

    /// Offer a dashboard/panel context object; it is serialized and submitted
    /// unless it equals the last accepted one.
    pub async fn context_received(&self, context: Value) -> SubmitOutcome {
        let (ack, rx) = oneshot::channel();
        self.request(Command::ContextReceived { context, ack }, rx)
            .await
            .unwrap_or(SubmitOutcome::Closed)
    }

    /// Stop the in-flight turn, if any, discarding its partial reply
    pub async fn cancel(&self) {
        let _ = self.command_tx.send(Command::Cancel).await;
    }

    /// Ordered copy of the full message log, system message included
    pub async fn messages(&self) -> Option<Arc<[Message]>> {
        let (ack, rx) = oneshot::channel();
        self.request(Command::Snapshot { ack }, rx).await
    }

    /// Latest published view
    pub fn view(&self) -> ConversationView {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified after every processed event chain
    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view_rx.clone()
    }

    /// Stop the session and wait for its task; any in-flight turn is abandoned
    pub async fn shutdown(self) {
        let Self { command_tx, task, .. } = self;
        drop(command_tx);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Conversation task ended abnormally");
        }
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Option<T> {
        self.command_tx.send(command).await.ok()?;
        rx.await.ok()
    }
}

/// Start a session task and return its handle
pub fn spawn_session<B>(config: SessionConfig, backend: B, tools: ToolRegistry) -> ConversationHandle
where
    B: ChatBackend + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (view_tx, view_rx) = watch::channel(ConversationView::default());
    let session_id = config.session_id.clone();

    let runtime = ConversationRuntime::new(
        config,
        Arc::new(backend),
        Arc::new(tools),
        command_rx,
        view_tx,
    );
    let task = tokio::spawn(runtime.run());

    ConversationHandle {
        session_id,
        command_tx,
        view_rx,
        task,
    }
}
