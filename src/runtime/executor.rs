//! Conversation runtime executor

use super::{Command, SessionConfig, SubmitOutcome};
use crate::llm::{ChatBackend, ChatRequest, ToolCall};
use crate::message_log::MessageLog;
use crate::state_machine::{
    transition, ConvContext, ConvState, Effect, Event, ToolResult, TransitionError, TurnError,
};
use crate::stream_reducer::reduce_stream;
use crate::tools::{ToolContext, ToolRegistry};
use crate::view::{project, ConversationView, ViewSource};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Event produced by background work, tagged with the work that produced it
#[derive(Debug)]
struct TurnEvent {
    stream_id: u64,
    event: Event,
}

/// Single controller task for one conversation session
pub struct ConversationRuntime<B>
where
    B: ChatBackend + 'static,
{
    context: ConvContext,
    state: ConvState,
    log: MessageLog,
    backend: Arc<B>,
    tools: Arc<ToolRegistry>,
    /// Most recent accepted dashboard/panel context
    ambient: Option<Arc<Value>>,
    initial_context: Option<Value>,
    live_reply: String,
    loading: bool,
    last_error: Option<TurnError>,
    completed_turns: u64,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::UnboundedReceiver<TurnEvent>,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    view_tx: watch::Sender<ConversationView>,
    /// Token for the active background work (availability check, stream or tools)
    turn_cancel: Option<CancellationToken>,
    /// Id of the active background work; events with other ids are stale
    stream_id: u64,
}

impl<B> ConversationRuntime<B>
where
    B: ChatBackend + 'static,
{
    pub(crate) fn new(
        config: SessionConfig,
        backend: Arc<B>,
        tools: Arc<ToolRegistry>,
        command_rx: mpsc::Receiver<Command>,
        view_tx: watch::Sender<ConversationView>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            context: ConvContext::new(config.session_id, config.model, config.max_tool_rounds),
            state: ConvState::Idle,
            log: MessageLog::new(config.system_prompt),
            backend,
            tools,
            ambient: None,
            initial_context: config.initial_context,
            live_reply: String::new(),
            loading: false,
            last_error: None,
            completed_turns: 0,
            command_rx,
            event_rx,
            event_tx,
            view_tx,
            turn_cancel: None,
            stream_id: 0,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, "Starting conversation runtime");
        self.publish();

        if let Some(context) = self.initial_context.take() {
            let outcome = self.accept_context(context);
            tracing::debug!(?outcome, "Initial context submitted");
        }

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(TurnEvent { stream_id, event }) = self.event_rx.recv() => {
                    if stream_id != self.stream_id {
                        tracing::debug!(
                            stream_id,
                            current = self.stream_id,
                            event = event.name(),
                            "Dropping stale event"
                        );
                        continue;
                    }
                    if let Err(e) = self.process_event(event) {
                        tracing::warn!(error = %e, state = self.state.name(), "Event rejected");
                    }
                }
            }
        }

        self.abort_turn();
        tracing::info!(session_id = %self.context.session_id, "Conversation runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, ack } => {
                let outcome = self.submit(text);
                let _ = ack.send(outcome);
            }
            Command::ContextReceived { context, ack } => {
                let outcome = self.accept_context(context);
                let _ = ack.send(outcome);
            }
            Command::Snapshot { ack } => {
                let _ = ack.send(self.log.snapshot());
            }
            Command::Cancel => {
                if let Err(e) = self.process_event(Event::Cancel) {
                    tracing::warn!(error = %e, "Cancel rejected");
                }
            }
        }
    }

    fn submit(&mut self, text: String) -> SubmitOutcome {
        match self.process_event(Event::UserSubmit { text }) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(TransitionError::EmptyMessage) => SubmitOutcome::Ignored,
            Err(TransitionError::AgentBusy) => {
                tracing::info!(state = self.state.name(), "Submission rejected while busy");
                SubmitOutcome::Busy
            }
            Err(e @ TransitionError::InvalidTransition(_)) => {
                tracing::warn!(error = %e, "Submission rejected");
                SubmitOutcome::Ignored
            }
        }
    }

    /// Serialize a context object and submit it as a user turn.
    ///
    /// Equal-by-value repeats of the last accepted context are ignored.
    fn accept_context(&mut self, context: Value) -> SubmitOutcome {
        if context.is_null() {
            return SubmitOutcome::Ignored;
        }
        if self.ambient.as_deref() == Some(&context) {
            tracing::debug!("Ignoring repeated context");
            return SubmitOutcome::Duplicate;
        }

        let outcome = self.submit(context.to_string());
        if outcome == SubmitOutcome::Accepted {
            self.ambient = Some(Arc::new(context));
        }
        outcome
    }

    /// Run an event and everything it generates through the state machine.
    ///
    /// Only a rejection of the initial event is returned; rejections of
    /// generated events are logged.
    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let mut pending = VecDeque::from([event]);
        let mut initial = true;

        while let Some(event) = pending.pop_front() {
            let event_name = event.name();
            let result = match transition(&self.state, &self.context, event) {
                Ok(result) => result,
                Err(e) if initial => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, event = event_name, "Generated event rejected");
                    continue;
                }
            };
            initial = false;

            tracing::debug!(
                session_id = %self.context.session_id,
                from = self.state.name(),
                to = result.new_state.name(),
                event = event_name,
                "State transition"
            );
            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect) {
                    // A failed commit supersedes the rest of this transition
                    let halt = matches!(generated, Event::CommitFailed { .. });
                    pending.push_back(generated);
                    if halt {
                        break;
                    }
                }
            }
        }

        self.publish();
        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::CheckBackend => {
                self.spawn_check_backend();
                None
            }

            Effect::Append { messages } => match self.log.append_all(messages) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to append to message log");
                    Some(Event::CommitFailed {
                        reason: e.to_string(),
                    })
                }
            },

            Effect::RequestCompletion => {
                self.spawn_completion();
                None
            }

            Effect::ResolveTools { tool_calls } => {
                self.spawn_tool_resolution(tool_calls);
                None
            }

            Effect::SetLiveReply { text } => {
                self.live_reply = text;
                None
            }

            Effect::ClearLiveReply => {
                self.live_reply.clear();
                None
            }

            Effect::SetLoading(loading) => {
                self.loading = loading;
                None
            }

            Effect::RecordError(error) => {
                tracing::warn!(
                    session_id = %self.context.session_id,
                    kind = ?error.kind,
                    error = %error.message,
                    "Turn failed"
                );
                self.last_error = Some(error);
                None
            }

            Effect::ClearError => {
                self.last_error = None;
                None
            }

            Effect::WarnAmbiguousTurn { discarded } => {
                let names: Vec<&str> = discarded.iter().map(ToolCall::name).collect();
                tracing::warn!(
                    session_id = %self.context.session_id,
                    discarded = ?names,
                    "Turn produced text and tool calls; keeping the text"
                );
                None
            }

            Effect::AbortTurn => {
                self.abort_turn();
                None
            }

            Effect::NotifyTurnDone => {
                self.completed_turns += 1;
                tracing::info!(
                    session_id = %self.context.session_id,
                    state = self.state.name(),
                    messages = self.log.len(),
                    "Turn finished"
                );
                None
            }
        }
    }

    /// Start new background work: cancel the previous one and issue a fresh id
    fn begin_work(&mut self) -> (u64, CancellationToken) {
        self.abort_turn();
        let token = CancellationToken::new();
        self.turn_cancel = Some(token.clone());
        (self.stream_id, token)
    }

    fn abort_turn(&mut self) {
        if let Some(token) = self.turn_cancel.take() {
            token.cancel();
        }
        self.stream_id += 1;
    }

    fn spawn_check_backend(&mut self) {
        let (stream_id, cancel) = self.begin_work();
        let backend = Arc::clone(&self.backend);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                available = backend.enabled() => {
                    let event = Event::BackendChecked { available };
                    let _ = event_tx.send(TurnEvent { stream_id, event });
                }
            }
        });
    }

    fn spawn_completion(&mut self) {
        let (stream_id, cancel) = self.begin_work();
        let backend = Arc::clone(&self.backend);
        let event_tx = self.event_tx.clone();
        let round = match &self.state {
            ConvState::Streaming { round, .. } => *round,
            _ => 0,
        };
        let request = ChatRequest {
            model: self.context.model.clone(),
            messages: self.log.snapshot(),
            tools: self.tools.list().to_vec(),
        };

        tracing::info!(
            session_id = %self.context.session_id,
            stream_id,
            round,
            messages = request.messages.len(),
            "Requesting completion"
        );

        tokio::spawn(async move {
            let progress_tx = event_tx.clone();
            let on_text = move |buffer: &str| {
                let event = Event::StreamProgress {
                    buffer: buffer.to_string(),
                };
                let _ = progress_tx.send(TurnEvent { stream_id, event });
            };

            // Dropping the stream on cancel stops consumption
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(stream_id, "Completion cancelled");
                    return;
                }
                event = stream_completion(backend.as_ref(), &request, on_text) => event,
            };
            let _ = event_tx.send(TurnEvent { stream_id, event });
        });
    }

    fn spawn_tool_resolution(&mut self, tool_calls: Vec<ToolCall>) {
        let (stream_id, cancel) = self.begin_work();
        let tools = Arc::clone(&self.tools);
        let event_tx = self.event_tx.clone();
        let ctx = ToolContext::new(cancel.clone(), self.ambient.clone());

        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(stream_id, "Tool resolution cancelled");
                    return;
                }
                event = resolve_tools(&tools, tool_calls, &ctx) => event,
            };
            let _ = event_tx.send(TurnEvent { stream_id, event });
        });
    }

    fn publish(&self) {
        let view = project(&ViewSource {
            log: &self.log,
            state: &self.state,
            live_reply: &self.live_reply,
            loading: self.loading,
            last_error: self.last_error.as_ref(),
            completed_turns: self.completed_turns,
        });
        self.view_tx.send_replace(view);
    }
}

/// One backend call folded to a terminal event
async fn stream_completion<B>(
    backend: &B,
    request: &ChatRequest,
    on_text: impl FnMut(&str) + Send,
) -> Event
where
    B: ChatBackend + ?Sized,
{
    let stream = match backend.stream_chat_completions(request).await {
        Ok(stream) => stream,
        Err(error) => return Event::StreamFailed { error },
    };
    match reduce_stream(stream, on_text).await {
        Ok(turn) => Event::StreamCompleted { turn },
        Err(error) => Event::StreamFailed { error },
    }
}

/// Resolve every call of one round; an undeclared name fails the whole round
/// before any tool runs
async fn resolve_tools(
    registry: &ToolRegistry,
    tool_calls: Vec<ToolCall>,
    ctx: &ToolContext,
) -> Event {
    let mut resolved = Vec::with_capacity(tool_calls.len());
    for call in tool_calls {
        match registry.resolve(call.name()) {
            Ok(tool) => resolved.push((call, tool)),
            Err(e) => {
                return Event::ToolResolutionFailed {
                    error: TurnError::unknown_tool(&e.name),
                }
            }
        }
    }

    let mut results = Vec::with_capacity(resolved.len());
    for (call, tool) in resolved {
        tracing::info!(tool = %call.name(), tool_call_id = %call.id, "Running tool");
        let output = tool.run(call.parsed_arguments(), ctx.clone()).await;
        if !output.success {
            tracing::warn!(tool = %call.name(), output = %output.output, "Tool reported failure");
        }
        results.push(ToolResult {
            tool_call_id: call.id,
            content: output.into_content(),
        });
    }
    Event::ToolsResolved { results }
}
