//! Folds one backend turn's delta stream into a single result
//!
//! A [`StreamReducer`] is created per backend call and consumed by
//! [`StreamReducer::finish`]; nothing carries over between calls.

use crate::llm::{ChatDelta, DeltaFragment, DeltaStream, LlmError, ToolCall, ToolCallDelta};
use futures::StreamExt;

/// A tool call still being assembled from fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingToolCall {
    index: Option<u32>,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Finalized result of one backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Plain reply; may be empty if the backend produced nothing
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedTurn {
    pub outcome: TurnOutcome,
    /// Tool calls dropped because the same turn also produced text
    pub discarded_tool_calls: Vec<ToolCall>,
}

impl ReducedTurn {
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            outcome: TurnOutcome::Text(text.into()),
            discarded_tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            outcome: TurnOutcome::ToolCalls(calls),
            discarded_tool_calls: Vec::new(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        !self.discarded_tool_calls.is_empty()
    }
}

/// Per-call accumulator for content and tool-call fragments
#[derive(Debug, Default)]
pub struct StreamReducer {
    text: String,
    calls: Vec<PendingToolCall>,
}

impl StreamReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta and return the running text buffer
    pub fn push(&mut self, delta: &ChatDelta) -> &str {
        match delta.fragment() {
            DeltaFragment::Empty => {}
            DeltaFragment::Content(content) => self.text.push_str(content),
            DeltaFragment::ToolCalls(fragments) => self.merge_all(fragments),
            DeltaFragment::Mixed {
                content,
                tool_calls,
            } => {
                self.text.push_str(content);
                self.merge_all(tool_calls);
            }
        }
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn merge_all(&mut self, fragments: &[ToolCallDelta]) {
        for fragment in fragments {
            self.merge(fragment);
        }
    }

    fn merge(&mut self, fragment: &ToolCallDelta) {
        let position = self.position_for(fragment);
        let slot = match position {
            Some(pos) => &mut self.calls[pos],
            None => {
                self.calls.push(PendingToolCall {
                    index: fragment.index,
                    ..PendingToolCall::default()
                });
                let last = self.calls.len() - 1;
                &mut self.calls[last]
            }
        };

        if slot.id.is_none() {
            slot.id.clone_from(&fragment.id);
        }
        if let Some(function) = &fragment.function {
            if slot.name.is_none() {
                slot.name.clone_from(&function.name);
            }
            if let Some(arguments) = &function.arguments {
                slot.arguments.push_str(arguments);
            }
        }
    }

    /// Correlate by index, then by id; a bare continuation extends the last call
    fn position_for(&self, fragment: &ToolCallDelta) -> Option<usize> {
        if let Some(index) = fragment.index {
            return self.calls.iter().position(|c| c.index == Some(index));
        }
        if let Some(id) = &fragment.id {
            return self
                .calls
                .iter()
                .position(|c| c.id.as_deref() == Some(id.as_str()));
        }
        self.calls.len().checked_sub(1)
    }

    /// Finalize: text wins over tool calls when it has visible content
    pub fn finish(self) -> ReducedTurn {
        let calls: Vec<ToolCall> = self
            .calls
            .into_iter()
            .enumerate()
            .map(|(n, pending)| {
                ToolCall::new(
                    pending.id.unwrap_or_else(|| format!("call_{n}")),
                    pending.name.unwrap_or_default(),
                    pending.arguments,
                )
            })
            .collect();

        if !self.text.trim().is_empty() || calls.is_empty() {
            ReducedTurn {
                outcome: TurnOutcome::Text(self.text),
                discarded_tool_calls: calls,
            }
        } else {
            ReducedTurn::tool_calls(calls)
        }
    }
}

/// Drive a delta stream to completion.
///
/// `on_text` sees the running buffer after every delta that added content.
/// An error item ends the stream and is returned without a partial result.
pub async fn reduce_stream(
    mut stream: DeltaStream,
    mut on_text: impl FnMut(&str) + Send,
) -> Result<ReducedTurn, LlmError> {
    let mut reducer = StreamReducer::new();
    while let Some(item) = stream.next().await {
        let delta = item?;
        let before = reducer.text().len();
        let text = reducer.push(&delta);
        if text.len() != before {
            on_text(text);
        }
    }
    Ok(reducer.finish())
}
