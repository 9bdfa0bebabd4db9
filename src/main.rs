//! Panel Assistant - streaming chat about Grafana dashboard panels
//!
//! A terminal driver around a conversation state machine that talks to an
//! `OpenAI`-compatible backend and can hand the current panel JSON to the
//! model through a tool call.

mod config;
mod llm;
mod message_log;
mod runtime;
mod state_machine;
mod stream_reducer;
mod system_prompt;
mod tools;
mod view;

use config::{load_context, AssistantConfig};
use llm::{LoggingBackend, OpenAiBackend, Role};
use runtime::{spawn_session, SubmitOutcome};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tools::ToolRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use view::ConversationView;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout is reserved for the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panel_assistant=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = AssistantConfig::from_env()?;
    config.validate()?;

    let mut session_config = config.session_config();
    if let Some(path) = &config.context_path {
        tracing::info!(path = %path.display(), "Loading panel context");
        session_config = session_config.with_initial_context(load_context(path)?);
    }

    let backend = LoggingBackend::new(Arc::new(OpenAiBackend::new(&config.backend)?));
    if !config.backend.enabled {
        tracing::warn!("Backend disabled. Set PANEL_ASSISTANT_ENABLED=true to chat.");
    }

    let handle = spawn_session(session_config, backend, ToolRegistry::standard());
    tracing::info!(
        session_id = %handle.session_id(),
        model = %config.model,
        base_url = %config.backend.base_url,
        max_tool_rounds = config.max_tool_rounds,
        "Starting session"
    );
    let renderer = tokio::spawn(render(handle.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let outcome = match Input::parse(&line) {
                    Input::Context(path) => match load_context(Path::new(path)) {
                        Ok(context) => handle.context_received(context).await,
                        Err(e) => {
                            eprintln!("{e}");
                            continue;
                        }
                    },
                    Input::Messages => {
                        let Some(messages) = handle.messages().await else { break };
                        println!("{}", serde_json::to_string_pretty(&*messages)?);
                        continue;
                    }
                    Input::Text(text) => handle.submit(text).await,
                };
                match outcome {
                    SubmitOutcome::Busy => eprintln!("(still answering; press Ctrl-C to cancel)"),
                    SubmitOutcome::Duplicate => eprintln!("(context unchanged)"),
                    SubmitOutcome::Closed => break,
                    SubmitOutcome::Accepted | SubmitOutcome::Ignored => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if handle.view().busy {
                    handle.cancel().await;
                } else {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    renderer.await?;
    Ok(())
}

/// One line of terminal input
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    /// `/context <path>`: submit a dashboard/panel JSON file
    Context(&'a str),
    /// `/messages`: dump the message log
    Messages,
    Text(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed == "/messages" {
            return Self::Messages;
        }
        match trimmed.strip_prefix("/context ") {
            Some(path) if !path.trim().is_empty() => Self::Context(path.trim()),
            _ => Self::Text(line),
        }
    }
}

/// Print live reply growth and turn results until the session stops
async fn render(rx: tokio::sync::watch::Receiver<ConversationView>) {
    let mut views = WatchStream::new(rx);
    let mut renderer = Renderer::default();
    let mut stdout = std::io::stdout();

    while let Some(view) = views.next().await {
        if let Err(e) = renderer.update(&mut stdout, &view) {
            tracing::warn!(error = %e, "Failed to write transcript");
            break;
        }
    }
}

/// Turns a sequence of (possibly coalesced) views into incremental output
#[derive(Debug, Default)]
struct Renderer {
    /// Live reply text already written for the current turn
    printed: String,
    completed_turns: u64,
    /// Transcript length when the previous turn completed
    transcript_len: usize,
}

impl Renderer {
    fn update(&mut self, out: &mut impl Write, view: &ConversationView) -> std::io::Result<()> {
        if let Some(fresh) = view.live_reply.strip_prefix(self.printed.as_str()) {
            if !fresh.is_empty() {
                write!(out, "{fresh}")?;
                self.printed.clone_from(&view.live_reply);
            }
        }

        if view.completed_turns > self.completed_turns {
            self.completed_turns = view.completed_turns;
            self.finish_turn(out, view)?;
        }
        out.flush()
    }

    fn finish_turn(&mut self, out: &mut impl Write, view: &ConversationView) -> std::io::Result<()> {
        // Only a reply committed by this turn; coalesced snapshots may skip its tail
        let grew = view.transcript.len() > self.transcript_len;
        if let Some(reply) = view
            .transcript
            .last()
            .filter(|entry| grew && entry.role == Role::Assistant && view.last_error.is_none())
        {
            if let Some(rest) = reply.content.strip_prefix(self.printed.as_str()) {
                write!(out, "{rest}")?;
            }
        }
        self.transcript_len = view.transcript.len();
        self.printed.clear();

        writeln!(out)?;
        if let Some(error) = &view.last_error {
            writeln!(out, "error: {error}")?;
        }
        Ok(())
    }
}
