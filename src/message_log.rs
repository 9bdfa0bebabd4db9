//! Append-only conversation log
//!
//! The log always starts with exactly one system message and only grows. A
//! snapshot is what gets sent to the backend on every call.

use crate::llm::{Message, Role};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Reasons an append is refused
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("system message may only appear first")]
    SystemNotFirst,
    #[error("assistant message has neither content nor tool calls")]
    EmptyAssistant,
    #[error("only tool messages may carry a tool_call_id")]
    UnexpectedToolCallId,
    #[error("only assistant messages may carry tool calls")]
    UnexpectedToolCalls,
    #[error("tool message is missing tool_call_id")]
    MissingToolCallId,
    #[error("tool result '{0}' does not answer a pending call")]
    UnmatchedToolCallId(String),
}

/// Ordered list of messages exchanged with the backend
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    /// Call ids announced by the latest assistant message and not yet answered
    pending_calls: HashSet<String>,
}

impl MessageLog {
    /// Create a log seeded with its single system message
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            pending_calls: HashSet::new(),
        }
    }

    /// Append one message, enforcing the log's structure
    pub fn append(&mut self, message: Message) -> Result<(), LogError> {
        self.check(&message)?;

        match message.role {
            Role::Assistant => {
                self.pending_calls = message.tool_calls.iter().map(|c| c.id.clone()).collect();
            }
            Role::Tool => {
                if let Some(id) = &message.tool_call_id {
                    self.pending_calls.remove(id);
                }
            }
            Role::User | Role::System => self.pending_calls.clear(),
        }

        self.messages.push(message);
        Ok(())
    }

    /// Append several messages; nothing is appended if any one is refused
    pub fn append_all(&mut self, messages: Vec<Message>) -> Result<(), LogError> {
        let mut staged = self.clone();
        for message in messages {
            staged.append(message)?;
        }
        *self = staged;
        Ok(())
    }

    fn check(&self, message: &Message) -> Result<(), LogError> {
        if message.role != Role::Tool && message.tool_call_id.is_some() {
            return Err(LogError::UnexpectedToolCallId);
        }
        if message.role != Role::Assistant && message.has_tool_calls() {
            return Err(LogError::UnexpectedToolCalls);
        }

        match message.role {
            Role::System => Err(LogError::SystemNotFirst),
            Role::User => Ok(()),
            Role::Assistant => {
                if message.text().is_empty() && !message.has_tool_calls() {
                    Err(LogError::EmptyAssistant)
                } else {
                    Ok(())
                }
            }
            Role::Tool => {
                let id = message
                    .tool_call_id
                    .as_deref()
                    .ok_or(LogError::MissingToolCallId)?;
                if self.pending_calls.contains(id) {
                    Ok(())
                } else {
                    Err(LogError::UnmatchedToolCallId(id.to_string()))
                }
            }
        }
    }

    /// Immutable copy of the log for one backend call
    pub fn snapshot(&self) -> Arc<[Message]> {
        Arc::from(self.messages.as_slice())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}
