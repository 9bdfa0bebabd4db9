//! Effects produced by state transitions

use super::state::TurnError;
use crate::llm::{Message, ToolCall};

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the backend whether it is enabled
    CheckBackend,

    /// Append messages to the log; all or nothing
    Append { messages: Vec<Message> },

    /// Start a streamed backend call over the current log
    RequestCompletion,

    /// Resolve every call via the tool registry (background task)
    ResolveTools { tool_calls: Vec<ToolCall> },

    /// Replace the live partial reply
    SetLiveReply { text: String },

    ClearLiveReply,

    SetLoading(bool),

    RecordError(TurnError),

    ClearError,

    /// Text won over tool calls in the same turn
    WarnAmbiguousTurn { discarded: Vec<ToolCall> },

    /// Stop consuming the active stream or tool resolution
    AbortTurn,

    NotifyTurnDone,
}

impl Effect {
    pub fn append(message: Message) -> Self {
        Effect::Append {
            messages: vec![message],
        }
    }

    pub fn set_live_reply(text: impl Into<String>) -> Self {
        Effect::SetLiveReply { text: text.into() }
    }

    pub fn resolve_tools(tool_calls: Vec<ToolCall>) -> Self {
        Effect::ResolveTools { tool_calls }
    }
}
