//! The session orchestrator: one conversation, one turn at a time.
//!
//! ```text
//! AwaitingInput ──/cmd──▶ command handler ───────────────────────▶ AwaitingInput
//!       │
//!       └─text─▶ CallingBackend ─▶ ParsingTools ─┬─none─▶ DisplayingReply ─▶ AwaitingInput
//!                      ▲                         │
//!                      └──── follow-up ◀─ ExecutingTools
//!                                                │
//!                                  requires_restart ─▶ RestartPending ─▶ new instance
//! ```
//!
//! [`Orchestrator::step`] consumes the orchestrator and hands back the one to
//! use next. After a hot reload that is a freshly built instance carrying the
//! migrated session; the old one is dropped.

pub mod commands;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use twin_core::error::{Error, ProviderError};
use twin_core::event::{DomainEvent, EventBus};
use twin_core::memory::LoggedSession;
use twin_core::message::{Message, Role};
use twin_core::provider::{GenerationOptions, ProviderRequest};
use twin_core::session::{Mode, SessionState};
use twin_core::tool::{ToolCall, ToolResult};

use crate::cancel::{ArmedCall, KeyListener};
use crate::context::{CompactionPolicy, MessageBuffer};
use crate::parser::{self, ParseOutcome};
use crate::prompt::{self, PromptInputs};
use crate::reload::{Runtime, RuntimeFactory, SessionSnapshot, migrate};

pub use commands::Command;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];
const PLANNING_LINE_CHARS: usize = 200;

/// Where the state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingInput,
    CallingBackend,
    ParsingTools,
    ExecutingTools,
    DisplayingReply,
    RestartPending,
    SavingAndExit,
}

/// Which part of a turn went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Parse,
    Tool,
    Backend,
    Reload,
    Command,
    Persist,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse",
            Self::Tool => "tool",
            Self::Backend => "backend",
            Self::Reload => "reload",
            Self::Command => "command",
            Self::Persist => "persist",
        })
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReport {
    pub call: ToolCall,
    pub result: ToolResult,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadNotice {
    Completed { tools: usize },
    /// The old instance is still running
    Failed(String),
}

/// A completed chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Final reply with tool calls stripped
    pub text: String,
    pub tools: Vec<ToolReport>,
    pub warnings: Vec<String>,
    pub reload: Option<ReloadNotice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Blank input
    Ignored,
    Reply(Reply),
    /// Output of a slash command
    Command(String),
    Failed { stage: FailureStage, message: String },
    /// The operator interrupted the backend call
    Cancelled,
    /// The session was saved and should end
    Exit(String),
}

pub struct Orchestrator {
    state: SessionState,
    buffer: MessageBuffer,
    generation: GenerationOptions,
    runtime: Runtime,
    factory: Arc<dyn RuntimeFactory>,
    events: Arc<EventBus>,
    listener: Option<Arc<KeyListener>>,
    cwd: PathBuf,
    previous: Vec<LoggedSession>,
    phase: SessionPhase,
}

impl Orchestrator {
    /// A new session using the runtime's configured defaults. Call
    /// [`start`](Self::start) before the first step.
    pub fn new(runtime: Runtime, factory: Arc<dyn RuntimeFactory>, cwd: impl Into<PathBuf>) -> Self {
        let config = Arc::clone(&runtime.config);
        let agent = runtime.agents.get_or_fallback(&config.default_agent).name;
        Self {
            state: SessionState::new(config.default_mode, agent, config.default_model.clone()),
            buffer: MessageBuffer::default(),
            generation: config.generation.to_options(),
            runtime,
            factory,
            events: Arc::new(EventBus::default()),
            listener: None,
            cwd: cwd.into(),
            previous: Vec::new(),
            phase: SessionPhase::Idle,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.state.mode = mode;
        self
    }

    /// Unknown agent names fall back to the built-in assistant.
    pub fn with_agent(mut self, name: &str) -> Self {
        self.state.agent = self.runtime.agents.get_or_fallback(name).name;
        self
    }

    /// Accepts aliases from `[model_aliases]`.
    pub fn with_model(mut self, name: &str) -> Self {
        self.state.model = self.runtime.config.resolve_model(name);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_key_listener(mut self, listener: Arc<KeyListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Load previous-session context and build the static prefix.
    pub async fn start(mut self) -> Self {
        let count = self.runtime.config.context.previous_sessions;
        self.previous = match self.runtime.context_store.recent(&self.cwd, count).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "Could not read previous context");
                Vec::new()
            }
        };
        self.buffer.reset(self.static_prefix());
        self.phase = SessionPhase::AwaitingInput;

        info!(
            session = %self.state.session_id,
            mode = %self.state.mode,
            agent = %self.state.agent,
            model = %self.state.model,
            previous = self.previous.len(),
            "Session started"
        );
        self
    }

    /// Rebuild an orchestrator from a snapshot on a (possibly new) runtime.
    ///
    /// The static prefix is regenerated so it documents the runtime's tools.
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        runtime: Runtime,
        factory: Arc<dyn RuntimeFactory>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        let mut orchestrator = Self {
            state: snapshot.state,
            buffer: snapshot.buffer,
            generation: snapshot.generation,
            runtime,
            factory,
            events: Arc::new(EventBus::default()),
            listener: None,
            cwd: cwd.into(),
            previous: Vec::new(),
            phase: SessionPhase::AwaitingInput,
        };
        orchestrator.refresh_static();
        orchestrator
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn generation(&self) -> &GenerationOptions {
        &self.generation
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.state.clone(), self.generation.clone(), self.buffer.clone())
    }

    fn static_prefix(&self) -> Vec<Message> {
        let agent = self.runtime.agents.get_or_fallback(&self.state.agent);
        let tools = self.runtime.tools.list();
        prompt::static_messages(
            &PromptInputs {
                agent: &agent,
                mode: self.state.mode,
                tools: &tools,
                previous: &self.previous,
            },
            &self.cwd,
        )
    }

    fn refresh_static(&mut self) {
        let prefix = self.static_prefix();
        self.buffer.replace_static(prefix);
    }

    /// Handle one line of operator input.
    pub async fn step(mut self, input: &str) -> (Self, TurnOutcome) {
        let input = input.trim();
        if input.is_empty() {
            return (self, TurnOutcome::Ignored);
        }
        if let Some(command) = Command::parse(input) {
            debug!(?command, "Slash command");
            let (mut next, outcome) = self.run_command(command).await;
            if next.phase != SessionPhase::SavingAndExit {
                next.phase = SessionPhase::AwaitingInput;
            }
            return (next, outcome);
        }
        self.phase = SessionPhase::AwaitingInput;
        self.chat(input).await
    }

    async fn chat(mut self, input: &str) -> (Self, TurnOutcome) {
        self.maybe_switch_agent(input);
        self.compact();

        let user = self.user_message(input);
        let mut request = self.buffer.messages();
        request.push(user.clone());

        let first = match self.call_backend(request).await {
            Ok(reply) => reply,
            Err(e) => return self.interrupted(e),
        };
        self.note_input(input);

        self.phase = SessionPhase::ParsingTools;
        let mut parsed = self.parse_reply(&first.content);
        let mut warnings = parsed.warnings.clone();

        if !parsed.has_calls() {
            self.note_reply(&first.content);
            self.phase = SessionPhase::DisplayingReply;
            let text = parser::strip_tool_calls(&first.content);
            self.buffer.append_turn(user, first);
            self.phase = SessionPhase::AwaitingInput;
            return (
                self,
                TurnOutcome::Reply(Reply {
                    text,
                    tools: Vec::new(),
                    warnings,
                    reload: None,
                }),
            );
        }

        let max_rounds = self.runtime.config.agent.max_tool_rounds.max(1);
        let mut reports: Vec<ToolReport> = Vec::new();
        let mut pending = user;
        let mut latest = first;
        let mut round = 0;

        let ending = loop {
            round += 1;
            let executed = self.execute_tools(&parsed.calls).await;
            let results = Message::user(followup_message(&executed));
            reports.extend(executed);

            // Commit the exchange that produced these calls
            let asked = std::mem::replace(&mut pending, results);
            self.buffer.append_turn(asked, latest);

            let mut request = self.buffer.static_messages().to_vec();
            request.push(pending.clone());
            let next = match self.call_backend(request).await {
                Ok(next) => next,
                Err(e) => break Err(e),
            };

            self.phase = SessionPhase::ParsingTools;
            parsed = self.parse_reply(&next.content);
            warnings.extend(parsed.warnings.iter().cloned());
            if !parsed.has_calls() {
                break Ok(next);
            }
            if round >= max_rounds {
                let skipped = parsed.calls.len();
                warn!(rounds = round, skipped, "Tool round limit reached");
                warnings.push(format!(
                    "Stopped after {max_rounds} tool rounds; {skipped} further call(s) not executed"
                ));
                break Ok(next);
            }
            latest = next;
        };

        let ending = match ending {
            Ok(reply) => {
                self.note_reply(&reply.content);
                self.buffer.append_turn(pending, reply.clone());
                Ok(reply)
            }
            Err(e) => {
                self.buffer
                    .append_turn(pending, Message::assistant(format!("[no reply: {e}]")));
                Err(e)
            }
        };

        let mut this = self;
        let mut reload = None;
        if reports.iter().any(|r| r.result.metadata.requires_restart) {
            let (next, notice) = this.hot_reload().await;
            this = next;
            reload = Some(notice);
        }

        match ending {
            Ok(reply) => {
                this.phase = SessionPhase::DisplayingReply;
                let text = parser::strip_tool_calls(&reply.content);
                this.phase = SessionPhase::AwaitingInput;
                (
                    this,
                    TurnOutcome::Reply(Reply {
                        text,
                        tools: reports,
                        warnings,
                        reload,
                    }),
                )
            }
            Err(e) => this.interrupted(e),
        }
    }

    fn interrupted(mut self, err: ProviderError) -> (Self, TurnOutcome) {
        self.phase = SessionPhase::AwaitingInput;
        if err.is_cancelled() {
            info!(session = %self.state.session_id, "Backend call cancelled");
            return (self, TurnOutcome::Cancelled);
        }
        (
            self,
            TurnOutcome::Failed {
                stage: FailureStage::Backend,
                message: err.to_string(),
            },
        )
    }

    fn parse_reply(&self, reply: &str) -> ParseOutcome {
        let parsed = parser::parse(reply);
        for warning in &parsed.warnings {
            self.events.publish(DomainEvent::ParseWarning {
                message: warning.clone(),
                timestamp: Utc::now(),
            });
        }
        parsed
    }

    async fn call_backend(&mut self, messages: Vec<Message>) -> Result<Message, ProviderError> {
        self.phase = SessionPhase::CallingBackend;
        let request = ProviderRequest {
            model: self.state.model.clone(),
            messages,
            options: self.generation.clone(),
        };
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling backend"
        );

        let armed = self.listener.as_ref().map(|l| l.arm());
        let token = armed.as_ref().map(ArmedCall::token).unwrap_or_else(CancellationToken::new);
        let started = Instant::now();
        let result = self.runtime.provider.complete_cancellable(request, token).await;
        drop(armed);
        let latency = started.elapsed();

        match result {
            Ok(response) => {
                let metrics = &mut self.state.metrics;
                metrics.query_count += 1;
                metrics.total_latency_secs += latency.as_secs_f64();
                self.events.publish(DomainEvent::ResponseGenerated {
                    session_id: self.state.session_id.clone(),
                    model: response.model,
                    latency_ms: latency.as_millis() as u64,
                    timestamp: Utc::now(),
                });
                let mut message = response.message;
                message.role = Role::Assistant;
                Ok(message)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(error = %e, "Backend call failed");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: "backend".into(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Run calls one after another, in order.
    async fn execute_tools(&mut self, calls: &[ToolCall]) -> Vec<ToolReport> {
        self.phase = SessionPhase::ExecutingTools;
        let mut reports = Vec::with_capacity(calls.len());

        for call in calls {
            self.events.publish(DomainEvent::ToolStarted {
                tool_name: call.tool_name.clone(),
                args_preview: args_preview(call),
                timestamp: Utc::now(),
            });
            info!(tool = %call.tool_name, "Executing tool");

            let started = Instant::now();
            let result = self.runtime.tools.execute(call).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            self.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.tool_name.clone(),
                success: result.success,
                duration_ms,
                timestamp: Utc::now(),
            });
            if !result.success {
                debug!(tool = %call.tool_name, error = ?result.error, "Tool reported failure");
            }
            if let Some(path) = &result.metadata.file_path {
                self.state.session_data.note_file(path);
            }

            reports.push(ToolReport {
                call: call.clone(),
                result,
                duration_ms,
            });
        }
        reports
    }

    fn compact(&mut self) {
        let policy = CompactionPolicy::from_config(&self.runtime.config.context, self.generation.num_ctx);
        if let Some(report) = self.buffer.maybe_compact(&policy) {
            info!(
                folded = report.messages_folded,
                before = report.chars_before,
                after = report.chars_after,
                "Conversation compacted"
            );
            self.events.publish(DomainEvent::ContextCompacted {
                messages_folded: report.messages_folded,
                chars_before: report.chars_before,
                chars_after: report.chars_after,
                timestamp: Utc::now(),
            });
        }
    }

    fn maybe_switch_agent(&mut self, input: &str) {
        if !self.runtime.config.auto_select_agent {
            return;
        }
        let Some(best) = self.runtime.agents.best_match(input) else {
            return;
        };
        if best.name != self.state.agent {
            info!(from = %self.state.agent, to = %best.name, "Auto-selected agent");
            self.state.agent = best.name;
            self.refresh_static();
        }
    }

    /// The user turn, with any image files named in the input attached.
    fn user_message(&self, input: &str) -> Message {
        let images: Vec<PathBuf> = input
            .split_whitespace()
            .map(|t| t.trim_matches(|c| c == '"' || c == '\'' || c == ',' || c == '`'))
            .filter(|t| {
                Path::new(t)
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .map(|t| self.cwd.join(t))
            .filter(|p| p.is_file())
            .collect();

        if !images.is_empty() {
            debug!(count = images.len(), "Attaching images");
        }
        Message::user(input).with_images(images)
    }

    fn note_input(&mut self, input: &str) {
        let line: String = input.lines().next().unwrap_or_default().chars().take(PLANNING_LINE_CHARS).collect();
        let planning = &mut self.state.session_data.planning_discussion;
        planning.push_str(&line);
        planning.push('\n');
    }

    fn note_reply(&mut self, reply: &str) {
        let data = &mut self.state.session_data;
        for line in reply.lines() {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let lower = line.to_ascii_lowercase();
            let target = if lower.starts_with("decision:") {
                Some((&mut data.decisions, "decision:".len()))
            } else if lower.starts_with("next steps:") {
                Some((&mut data.next_steps, "next steps:".len()))
            } else if lower.starts_with("next step:") {
                Some((&mut data.next_steps, "next step:".len()))
            } else {
                None
            };
            if let Some((list, skip)) = target {
                let item = line[skip..].trim().to_string();
                if !item.is_empty() && !list.contains(&item) {
                    list.push(item);
                }
            }
        }
    }

    /// Write the session to the context log and the snapshot store.
    pub async fn save(&mut self) -> Result<String, Error> {
        let record = self.state.to_record(self.buffer.running_summary());
        self.runtime.context_store.append(&self.cwd, &record).await?;
        let snapshot = self.snapshot().to_value()?;
        self.runtime
            .snapshots
            .save(&self.state.session_id, &snapshot)
            .await?;

        info!(session = %self.state.session_id, "Session saved");
        self.events.publish(DomainEvent::SessionSaved {
            session_id: self.state.session_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(format!("Session {} saved", self.state.session_id))
    }

    /// Persist, rebuild subsystems, and continue in a new instance.
    ///
    /// On any failure the current instance is returned unchanged apart from
    /// what persisting wrote.
    pub async fn hot_reload(mut self) -> (Self, ReloadNotice) {
        self.phase = SessionPhase::RestartPending;
        info!(session = %self.state.session_id, "Hot reload requested");

        if let Err(e) = self.save().await {
            return self.reload_failed(format!("Failed to persist session before reload: {e}"));
        }
        let runtime = match self.factory.build().await {
            Ok(runtime) => runtime,
            Err(e) => return self.reload_failed(e.to_string()),
        };
        let snapshot = match self.snapshot().to_value().and_then(migrate) {
            Ok(snapshot) => snapshot,
            Err(e) => return self.reload_failed(e.to_string()),
        };

        let tools = runtime.tools.len();
        let mut next = Self::from_snapshot(snapshot, runtime, Arc::clone(&self.factory), self.cwd.clone());
        next.events = Arc::clone(&self.events);
        next.listener = self.listener.clone();
        next.previous = std::mem::take(&mut self.previous);
        next.refresh_static();

        info!(session = %next.state.session_id, tools, "Hot reload complete");
        next.events.publish(DomainEvent::ReloadCompleted {
            session_id: next.state.session_id.clone(),
            tools,
            timestamp: Utc::now(),
        });
        (next, ReloadNotice::Completed { tools })
    }

    fn reload_failed(mut self, message: String) -> (Self, ReloadNotice) {
        warn!(error = %message, "Hot reload failed; continuing with current instance");
        self.events.publish(DomainEvent::ErrorOccurred {
            context: "reload".into(),
            error_message: message.clone(),
            timestamp: Utc::now(),
        });
        self.phase = SessionPhase::AwaitingInput;
        (self, ReloadNotice::Failed(message))
    }
}

fn args_preview(call: &ToolCall) -> String {
    let joined = call
        .args
        .iter()
        .map(|(k, v)| match v.as_str() {
            Some(s) => format!("{k}={s}"),
            None => format!("{k}={v}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut preview: String = joined.chars().take(120).collect();
    if joined.chars().count() > 120 {
        preview.push_str("...");
    }
    preview
}

/// `TOOL_RESULT: success|error` / `OUTPUT: <text>`
pub fn format_result(result: &ToolResult) -> String {
    let status = if result.success { "success" } else { "error" };
    format!("TOOL_RESULT: {status}\nOUTPUT: {}", result.text())
}

/// The User message that feeds tool results back to the model.
pub fn followup_message(reports: &[ToolReport]) -> String {
    let blocks: Vec<String> = reports.iter().map(|r| format_result(&r.result)).collect();
    format!(
        "Here are the tool results:\n\n{}\n\nPlease continue your response based on these results.",
        blocks.join("\n\n")
    )
}

#[cfg(test)]
mod tests;
