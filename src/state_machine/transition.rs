//! Pure state transition function

use super::event::ToolResult;
use super::state::TurnError;
use super::{ConvContext, ConvState, Effect, Event};
use crate::llm::{Message, ToolCall};
use crate::stream_reducer::{ReducedTurn, TurnOutcome};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A turn is already in flight (cancel it first)")]
    AgentBusy,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; every side
/// effect is described by the returned [`Effect`] list.
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Submission
        // ============================================================

        (_, Event::UserSubmit { text }) if text.trim().is_empty() => {
            Err(TransitionError::EmptyMessage)
        }

        (ConvState::Idle | ConvState::Committed | ConvState::Failed { .. }, Event::UserSubmit { text }) => {
            Ok(TransitionResult::new(ConvState::AwaitingBackendAvailability { text })
                .with_effect(Effect::ClearError)
                .with_effect(Effect::CheckBackend))
        }

        (
            ConvState::AwaitingBackendAvailability { .. }
            | ConvState::Streaming { .. }
            | ConvState::ResolvingTool { .. },
            Event::UserSubmit { .. },
        ) => Err(TransitionError::AgentBusy),

        // ============================================================
        // Availability check
        // ============================================================

        (ConvState::AwaitingBackendAvailability { .. }, Event::BackendChecked { available: false }) => {
            Ok(fail(TurnError::backend_unavailable()))
        }

        // The user message is committed before the call is issued
        (ConvState::AwaitingBackendAvailability { text }, Event::BackendChecked { available: true }) => {
            Ok(TransitionResult::new(ConvState::Streaming {
                round: 1,
                received_content: false,
            })
            .with_effect(Effect::ClearLiveReply)
            .with_effect(Effect::append(Message::user(text.clone())))
            .with_effect(Effect::SetLoading(true))
            .with_effect(Effect::RequestCompletion))
        }

        // ============================================================
        // Streaming
        // ============================================================

        (
            ConvState::Streaming {
                round,
                received_content,
            },
            Event::StreamProgress { buffer },
        ) => {
            let first_content = !*received_content && !buffer.is_empty();
            let result = TransitionResult::new(ConvState::Streaming {
                round: *round,
                received_content: *received_content || !buffer.is_empty(),
            })
            .with_effect(Effect::set_live_reply(buffer));

            // First byte ends the wait, not the turn
            Ok(if first_content {
                result.with_effect(Effect::SetLoading(false))
            } else {
                result
            })
        }

        (ConvState::Streaming { round, .. }, Event::StreamCompleted { turn }) => {
            Ok(complete_stream(*round, context, turn))
        }

        (ConvState::Streaming { .. }, Event::StreamFailed { error }) => {
            Ok(fail(TurnError::stream(error.message)))
        }

        // ============================================================
        // Tool resolution
        // ============================================================

        (ConvState::ResolvingTool { round, tool_calls }, Event::ToolsResolved { results }) => {
            let messages = tool_round_messages(tool_calls, results)?;
            Ok(TransitionResult::new(ConvState::Streaming {
                round: round + 1,
                received_content: false,
            })
            .with_effect(Effect::Append { messages })
            .with_effect(Effect::SetLoading(true))
            .with_effect(Effect::RequestCompletion))
        }

        (ConvState::ResolvingTool { .. }, Event::ToolResolutionFailed { error }) => Ok(fail(error)),

        // ============================================================
        // Commit failure and cancellation
        // ============================================================

        (_, Event::CommitFailed { reason }) => Ok(fail(TurnError::commit(reason))
            .with_effect(Effect::AbortTurn)),

        (state, Event::Cancel) if state.is_busy() => Ok(TransitionResult::new(ConvState::Idle)
            .with_effects([
                Effect::AbortTurn,
                Effect::ClearLiveReply,
                Effect::SetLoading(false),
                Effect::NotifyTurnDone,
            ])),

        // Nothing in flight: cancel is a no-op
        (state, Event::Cancel) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Everything else is a protocol violation
        // ============================================================

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{} does not accept {}",
            state.name(),
            event.name()
        ))),
    }
}

/// Any failure: drop the live buffer, clear loading, surface the error
fn fail(error: TurnError) -> TransitionResult {
    TransitionResult::new(ConvState::Failed {
        error: error.clone(),
    })
    .with_effects([
        Effect::ClearLiveReply,
        Effect::SetLoading(false),
        Effect::RecordError(error),
        Effect::NotifyTurnDone,
    ])
}

fn complete_stream(round: u32, context: &ConvContext, turn: ReducedTurn) -> TransitionResult {
    let warning = turn.is_ambiguous().then(|| Effect::WarnAmbiguousTurn {
        discarded: turn.discarded_tool_calls,
    });

    let result = match turn.outcome {
        TurnOutcome::Text(text) if text.trim().is_empty() => {
            fail(TurnError::stream("backend returned an empty reply"))
        }
        TurnOutcome::Text(text) => TransitionResult::new(ConvState::Committed).with_effects([
            Effect::append(Message::assistant(text)),
            Effect::ClearLiveReply,
            Effect::SetLoading(false),
            Effect::NotifyTurnDone,
        ]),
        TurnOutcome::ToolCalls(_) if round >= context.max_tool_rounds => {
            fail(TurnError::tool_round_limit(context.max_tool_rounds))
        }
        TurnOutcome::ToolCalls(tool_calls) => TransitionResult::new(ConvState::ResolvingTool {
            round,
            tool_calls: tool_calls.clone(),
        })
        .with_effect(Effect::ClearLiveReply)
        .with_effect(Effect::resolve_tools(tool_calls)),
    };

    match warning {
        Some(warning) => TransitionResult::new(result.new_state)
            .with_effect(warning)
            .with_effects(result.effects),
        None => result,
    }
}

/// Assistant tool-call announcement followed by one result per call, in call order
fn tool_round_messages(
    tool_calls: &[ToolCall],
    mut results: Vec<ToolResult>,
) -> Result<Vec<Message>, TransitionError> {
    let mut messages = Vec::with_capacity(tool_calls.len() + 1);
    messages.push(Message::assistant_tool_calls(tool_calls.to_vec()));

    for call in tool_calls {
        let position = results
            .iter()
            .position(|r| r.tool_call_id == call.id)
            .ok_or_else(|| {
                TransitionError::InvalidTransition(format!("no result for tool call {}", call.id))
            })?;
        let result = results.swap_remove(position);
        messages.push(Message::tool_result(result.tool_call_id, result.content));
    }

    if let Some(extra) = results.first() {
        return Err(TransitionError::InvalidTransition(format!(
            "result for unknown tool call {}",
            extra.tool_call_id
        )));
    }
    Ok(messages)
}
