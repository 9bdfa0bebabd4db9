//! Read-only projection of a session for rendering

use crate::llm::Role;
use crate::message_log::MessageLog;
use crate::state_machine::{ConvState, TurnError};
use serde::Serialize;

/// One displayable committed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

/// Snapshot published to renderers after every processed event chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    /// Committed user and assistant messages with text, in log order
    pub transcript: Vec<TranscriptEntry>,
    /// Partial reply of the in-flight call; empty unless streaming
    pub live_reply: String,
    /// Waiting for the first content of a call
    pub loading: bool,
    /// A turn is in flight and submissions are rejected
    pub busy: bool,
    pub state: String,
    pub last_error: Option<TurnError>,
    /// Turns that reached a terminal state or were cancelled
    pub completed_turns: u64,
}

/// Session fields the projection reads
pub struct ViewSource<'a> {
    pub log: &'a MessageLog,
    pub state: &'a ConvState,
    pub live_reply: &'a str,
    pub loading: bool,
    pub last_error: Option<&'a TurnError>,
    pub completed_turns: u64,
}

pub fn project(source: &ViewSource<'_>) -> ConversationView {
    let transcript = source
        .log
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| !m.text().is_empty())
        .map(|m| TranscriptEntry {
            role: m.role,
            content: m.text().to_string(),
        })
        .collect();

    let live_reply = match source.state {
        ConvState::Streaming { .. } => source.live_reply.to_string(),
        _ => String::new(),
    };

    ConversationView {
        transcript,
        live_reply,
        loading: source.loading,
        busy: source.state.is_busy(),
        state: source.state.name().to_string(),
        last_error: source.last_error.cloned(),
        completed_turns: source.completed_turns,
    }
}
