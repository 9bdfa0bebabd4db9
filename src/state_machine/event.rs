//! Events that can occur in a conversation

use super::state::TurnError;
use crate::llm::LlmError;
use crate::stream_reducer::ReducedTurn;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserSubmit { text: String },
    Cancel,

    // Backend events
    BackendChecked { available: bool },
    /// Running text buffer after a content fragment
    StreamProgress { buffer: String },
    StreamCompleted { turn: ReducedTurn },
    StreamFailed { error: LlmError },

    // Tool events
    ToolsResolved { results: Vec<ToolResult> },
    ToolResolutionFailed { error: TurnError },

    // Runtime events
    CommitFailed { reason: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserSubmit { .. } => "user_submit",
            Event::Cancel => "cancel",
            Event::BackendChecked { .. } => "backend_checked",
            Event::StreamProgress { .. } => "stream_progress",
            Event::StreamCompleted { .. } => "stream_completed",
            Event::StreamFailed { .. } => "stream_failed",
            Event::ToolsResolved { .. } => "tools_resolved",
            Event::ToolResolutionFailed { .. } => "tool_resolution_failed",
            Event::CommitFailed { .. } => "commit_failed",
        }
    }
}

/// Serialized outcome of one tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
}
