//! Conversation state types

use crate::llm::ToolCall;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Turn errors
// ============================================================================

/// Classification of a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    /// `enabled()` reported false
    BackendUnavailable,
    /// The backend call or its stream failed
    Stream,
    /// The model requested an undeclared tool
    UnknownTool,
    /// Too many consecutive tool-call rounds in one turn
    ToolRoundLimit,
    /// A finalized message could not be appended to the log
    Commit,
}

/// Terminal error of the most recent turn; the observable `lastError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: TurnErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend_unavailable() -> Self {
        Self::new(
            TurnErrorKind::BackendUnavailable,
            "the chat backend is not enabled",
        )
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(TurnErrorKind::Stream, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(TurnErrorKind::UnknownTool, format!("unknown tool: {name}"))
    }

    pub fn tool_round_limit(limit: u32) -> Self {
        Self::new(
            TurnErrorKind::ToolRoundLimit,
            format!("model kept calling tools after {limit} rounds"),
        )
    }

    pub fn commit(reason: impl Into<String>) -> Self {
        Self::new(TurnErrorKind::Commit, reason)
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Conversation controller state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for a submission
    #[default]
    Idle,
    /// Submission accepted, asking the backend whether it is usable
    AwaitingBackendAvailability { text: String },
    /// A backend call is in flight
    Streaming {
        /// 1 for the call answering the user, +1 per tool round
        round: u32,
        /// Whether any non-empty content has arrived in this call
        received_content: bool,
    },
    /// Tool calls from `round` are being resolved
    ResolvingTool { round: u32, tool_calls: Vec<ToolCall> },
    /// Last turn ended with a committed text reply
    Committed,
    /// Last turn failed
    Failed { error: TurnError },
}

impl ConvState {
    /// A turn is in flight; submissions are rejected
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConvState::AwaitingBackendAvailability { .. }
                | ConvState::Streaming { .. }
                | ConvState::ResolvingTool { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::AwaitingBackendAvailability { .. } => "awaiting_backend_availability",
            ConvState::Streaming { .. } => "streaming",
            ConvState::ResolvingTool { .. } => "resolving_tool",
            ConvState::Committed => "committed",
            ConvState::Failed { .. } => "failed",
        }
    }
}

/// Static per-session inputs to the transition function
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub session_id: String,
    pub model: String,
    pub max_tool_rounds: u32,
}

impl ConvContext {
    pub fn new(session_id: impl Into<String>, model: impl Into<String>, max_tool_rounds: u32) -> Self {
        Self {
            session_id: session_id.into(),
            model: model.into(),
            max_tool_rounds,
        }
    }
}
