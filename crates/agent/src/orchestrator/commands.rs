//! Slash commands.
//!
//! Commands never send chat to the backend. `/model` may ask it for the
//! installed model list.

use chrono::Local;
use std::fmt::Write as _;
use tracing::{info, warn};
use twin_core::session::Mode;

use super::{FailureStage, Orchestrator, ReloadNotice, SessionPhase, TurnOutcome};
use crate::context::estimate_tokens;
use crate::reload::migrate;

pub const HELP: &str = "Commands:
  /help                 Show this help
  /mode work|personal   Switch mode
  /agent [name]         Switch agent, or list agents
  /model [name|alias]   Switch model, or list installed models
  /ctx <tokens>         Set the context window
  /temp <0.0-2.0>       Set the temperature
  /top_p <0.0-1.0>      Set nucleus sampling
  /status               Show session status
  /context              Summarize previous sessions in this directory
  /save                 Save the session
  /sessions             List saved sessions
  /show <id>            Show a saved session
  /delete <id>          Delete a saved session
  /resume <id>          Continue a saved session
  /clear                Forget the conversation so far
  /reload               Rebuild tools and configuration
  /exit, /quit, /bye    Save and leave";

const SHOW_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Mode(Option<String>),
    Agent(Option<String>),
    Model(Option<String>),
    Ctx(Option<String>),
    Temp(Option<String>),
    TopP(Option<String>),
    Status,
    Context,
    Save,
    Sessions,
    Show(Option<String>),
    Delete(Option<String>),
    Resume(Option<String>),
    Clear,
    Reload,
    Exit,
    Unknown(String),
}

impl Command {
    /// `None` unless `input` starts with `/`.
    pub fn parse(input: &str) -> Option<Self> {
        let rest = input.trim().strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from);

        Some(match name.as_str() {
            "help" | "?" => Self::Help,
            "mode" => Self::Mode(arg),
            "agent" => Self::Agent(arg),
            "model" => Self::Model(arg),
            "ctx" => Self::Ctx(arg),
            "temp" => Self::Temp(arg),
            "top_p" => Self::TopP(arg),
            "status" => Self::Status,
            "context" => Self::Context,
            "save" => Self::Save,
            "sessions" => Self::Sessions,
            "show" => Self::Show(arg),
            "delete" => Self::Delete(arg),
            "resume" => Self::Resume(arg),
            "clear" => Self::Clear,
            "reload" => Self::Reload,
            "exit" | "quit" | "bye" => Self::Exit,
            _ => Self::Unknown(name),
        })
    }
}

fn failed(stage: FailureStage, message: impl Into<String>) -> TurnOutcome {
    TurnOutcome::Failed {
        stage,
        message: message.into(),
    }
}

fn usage(text: &str) -> TurnOutcome {
    failed(FailureStage::Command, format!("Usage: {text}"))
}

fn same_model(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed.strip_suffix(":latest") == Some(wanted)
        || wanted.strip_suffix(":latest") == Some(installed)
}

fn excerpt(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    let mut out: String = flat.chars().take(max).collect();
    if flat.chars().count() > max {
        out.push_str("...");
    }
    out
}

impl Orchestrator {
    pub(crate) async fn run_command(mut self, command: Command) -> (Self, TurnOutcome) {
        let outcome = match command {
            Command::Help => TurnOutcome::Command(HELP.into()),
            Command::Mode(arg) => self.set_mode(arg),
            Command::Agent(arg) => self.set_agent(arg),
            Command::Model(arg) => self.set_model(arg).await,
            Command::Ctx(arg) => self.set_ctx(arg),
            Command::Temp(arg) => self.set_temperature(arg),
            Command::TopP(arg) => self.set_top_p(arg),
            Command::Status => TurnOutcome::Command(self.status()),
            Command::Context => match self.runtime.context_store.summary(&self.cwd).await {
                Ok(summary) => TurnOutcome::Command(summary),
                Err(e) => failed(FailureStage::Persist, e.to_string()),
            },
            Command::Save => match self.save().await {
                Ok(message) => TurnOutcome::Command(message),
                Err(e) => failed(FailureStage::Persist, e.to_string()),
            },
            Command::Sessions => self.list_sessions().await,
            Command::Show(arg) => self.show_session(arg).await,
            Command::Delete(arg) => self.delete_session(arg).await,
            Command::Resume(Some(id)) => match self.resume(&id).await {
                Ok(message) => TurnOutcome::Command(message),
                Err(outcome) => outcome,
            },
            Command::Resume(None) => usage("/resume <session id>"),
            Command::Clear => {
                self.buffer.clear_history();
                TurnOutcome::Command("Conversation history cleared".into())
            }
            Command::Reload => {
                let (next, notice) = self.hot_reload().await;
                let outcome = match notice {
                    ReloadNotice::Completed { tools } => {
                        TurnOutcome::Command(format!("Reloaded: {tools} tools available"))
                    }
                    ReloadNotice::Failed(message) => failed(FailureStage::Reload, message),
                };
                return (next, outcome);
            }
            Command::Exit => {
                self.phase = SessionPhase::SavingAndExit;
                match self.save().await {
                    Ok(message) => TurnOutcome::Exit(format!("{message}. Goodbye!")),
                    Err(e) => {
                        warn!(error = %e, "Failed to save on exit");
                        TurnOutcome::Exit(format!("Failed to save session: {e}. Goodbye!"))
                    }
                }
            }
            Command::Unknown(name) => failed(
                FailureStage::Command,
                format!("Unknown command: /{name}. Type /help for available commands"),
            ),
        };
        (self, outcome)
    }

    fn set_mode(&mut self, arg: Option<String>) -> TurnOutcome {
        let Some(arg) = arg else {
            return TurnOutcome::Command(format!(
                "Current mode: {}. Usage: /mode work|personal",
                self.state.mode
            ));
        };
        match arg.parse::<Mode>() {
            Ok(mode) => {
                self.state.mode = mode;
                self.refresh_static();
                info!(mode = %mode, "Mode switched");
                TurnOutcome::Command(format!("Switched to {} MODE", mode.as_str().to_uppercase()))
            }
            Err(e) => failed(FailureStage::Command, e),
        }
    }

    fn agent_names(&self) -> Vec<String> {
        let mut names = self.runtime.agents.names();
        if !names.iter().any(|n| n == "assistant") {
            names.push("assistant".into());
        }
        names
    }

    fn set_agent(&mut self, arg: Option<String>) -> TurnOutcome {
        let Some(name) = arg else {
            let mut out = format!("Current agent: {}\nAvailable agents:", self.state.agent);
            for name in self.agent_names() {
                let marker = if name == self.state.agent { "*" } else { " " };
                let _ = write!(out, "\n {marker} {name}");
            }
            return TurnOutcome::Command(out);
        };
        match self.runtime.agents.get(&name) {
            Some(agent) => {
                self.state.agent = agent.name;
                self.refresh_static();
                info!(agent = %self.state.agent, "Agent switched");
                TurnOutcome::Command(format!("Switched to agent: {}", self.state.agent))
            }
            None => failed(
                FailureStage::Command,
                format!(
                    "Agent '{name}' not found. Available: {}",
                    self.agent_names().join(", ")
                ),
            ),
        }
    }

    async fn set_model(&mut self, arg: Option<String>) -> TurnOutcome {
        let installed = self.runtime.provider.list_models().await;

        let Some(name) = arg else {
            let mut out = format!("Current model: {}", self.state.model);
            match installed {
                Ok(models) if !models.is_empty() => {
                    out.push_str("\nInstalled models:");
                    for model in models {
                        let marker = if same_model(&model, &self.state.model) { "*" } else { " " };
                        let _ = write!(out, "\n {marker} {model}");
                    }
                }
                Ok(_) => out.push_str("\nNo installed models reported"),
                Err(e) => {
                    let _ = write!(out, "\nCould not list models: {e}");
                }
            }
            let aliases = &self.runtime.config.model_aliases;
            if !aliases.is_empty() {
                out.push_str("\nAliases:");
                for (alias, model) in aliases {
                    let _ = write!(out, "\n   {alias} -> {model}");
                }
            }
            return TurnOutcome::Command(out);
        };

        let resolved = self.runtime.config.resolve_model(&name);
        let note = match installed {
            Ok(models) if !models.is_empty() && !models.iter().any(|m| same_model(m, &resolved)) => {
                return failed(
                    FailureStage::Command,
                    format!(
                        "Model '{resolved}' is not installed. Installed: {}",
                        models.join(", ")
                    ),
                );
            }
            Ok(_) => String::new(),
            Err(e) => {
                warn!(error = %e, "Could not verify model");
                format!(" (not verified: {e})")
            }
        };
        self.state.model = resolved;
        info!(model = %self.state.model, "Model switched");
        TurnOutcome::Command(format!("Switched to model: {}{note}", self.state.model))
    }

    fn set_ctx(&mut self, arg: Option<String>) -> TurnOutcome {
        match arg.as_deref().map(str::parse::<u32>) {
            Some(Ok(tokens)) if tokens > 0 => {
                self.generation.num_ctx = tokens;
                TurnOutcome::Command(format!("Context window set to {tokens} tokens"))
            }
            _ => usage("/ctx <tokens> (a positive integer)"),
        }
    }

    fn set_temperature(&mut self, arg: Option<String>) -> TurnOutcome {
        match arg.as_deref().map(str::parse::<f32>) {
            Some(Ok(t)) if (0.0..=2.0).contains(&t) => {
                self.generation.temperature = t;
                TurnOutcome::Command(format!("Temperature set to {t}"))
            }
            _ => usage("/temp <0.0-2.0>"),
        }
    }

    fn set_top_p(&mut self, arg: Option<String>) -> TurnOutcome {
        match arg.as_deref().map(str::parse::<f32>) {
            Some(Ok(p)) if p > 0.0 && p <= 1.0 => {
                self.generation.top_p = p;
                TurnOutcome::Command(format!("top_p set to {p}"))
            }
            _ => usage("/top_p <0.0-1.0>"),
        }
    }

    fn status(&self) -> String {
        let metrics = &self.state.metrics;
        let elapsed = chrono::Utc::now() - metrics.start_time;
        [
            format!("Session: {}", self.state.session_id),
            format!("Mode: {}", self.state.mode.as_str().to_uppercase()),
            format!("Agent: {}", self.state.agent),
            format!("Model: {}", self.state.model),
            format!(
                "Generation: temperature {}, top_p {}, num_ctx {}, keep_alive {}",
                self.generation.temperature,
                self.generation.top_p,
                self.generation.num_ctx,
                self.generation.keep_alive
            ),
            format!(
                "Queries: {} (avg {:.2}s)",
                metrics.query_count,
                metrics.average_latency_secs()
            ),
            format!("Uptime: {}m", elapsed.num_minutes()),
            format!(
                "Buffer: {} chars, ~{} tokens ({} static, {} dynamic messages{})",
                self.buffer.size(),
                estimate_tokens(self.buffer.size(), self.runtime.config.context.chars_per_token),
                self.buffer.static_messages().len(),
                self.buffer.dynamic().len(),
                if self.buffer.running_summary().is_empty() { "" } else { ", summarized" }
            ),
            format!("Tools: {}", self.runtime.tools.names().join(", ")),
            format!("Files discussed: {}", self.state.session_data.files_discussed.len()),
        ]
        .join("\n")
    }

    async fn list_sessions(&self) -> TurnOutcome {
        let sessions = match self.runtime.snapshots.list().await {
            Ok(sessions) => sessions,
            Err(e) => return failed(FailureStage::Persist, e.to_string()),
        };
        if sessions.is_empty() {
            return TurnOutcome::Command("No saved sessions".into());
        }
        let mut out = String::from("Saved sessions:");
        for s in sessions {
            let marker = if s.session_id == self.state.session_id { "*" } else { " " };
            let _ = write!(
                out,
                "\n {marker} {}  {}  {}  {}  {} messages",
                s.session_id,
                s.saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                s.model,
                s.agent,
                s.messages
            );
        }
        TurnOutcome::Command(out)
    }

    async fn show_session(&self, arg: Option<String>) -> TurnOutcome {
        let Some(id) = arg else {
            return usage("/show <session id>");
        };
        let snapshot = match self.runtime.snapshots.load(&id).await {
            Ok(value) => match migrate(value) {
                Ok(snapshot) => snapshot,
                Err(e) => return failed(FailureStage::Persist, e.to_string()),
            },
            Err(e) => return failed(FailureStage::Persist, e.to_string()),
        };

        let mut out = format!(
            "Session {}\nSaved: {}\nMode: {}\nAgent: {}\nModel: {}\nMessages: {}",
            snapshot.state.session_id,
            snapshot.saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            snapshot.state.mode,
            snapshot.state.agent,
            snapshot.state.model,
            snapshot.buffer.dynamic().len()
        );
        if !snapshot.buffer.running_summary().is_empty() {
            let _ = write!(out, "\n\nSummary:\n{}", snapshot.buffer.running_summary());
        }
        if !snapshot.buffer.dynamic().is_empty() {
            out.push('\n');
            for message in snapshot.buffer.dynamic() {
                let _ = write!(
                    out,
                    "\n[{}] {}",
                    message.role.as_str(),
                    excerpt(&message.content, SHOW_EXCERPT_CHARS)
                );
            }
        }
        TurnOutcome::Command(out)
    }

    async fn delete_session(&self, arg: Option<String>) -> TurnOutcome {
        let Some(id) = arg else {
            return usage("/delete <session id>");
        };
        if id == self.state.session_id {
            return failed(FailureStage::Command, "Cannot delete the active session");
        }
        match self.runtime.snapshots.delete(&id).await {
            Ok(()) => TurnOutcome::Command(format!("Deleted session {id}")),
            Err(e) => failed(FailureStage::Persist, e.to_string()),
        }
    }

    /// Continue a saved session in place of the current one.
    pub async fn resume(&mut self, session_id: &str) -> Result<String, TurnOutcome> {
        let value = self
            .runtime
            .snapshots
            .load(session_id)
            .await
            .map_err(|e| failed(FailureStage::Persist, e.to_string()))?;
        let snapshot = migrate(value).map_err(|e| failed(FailureStage::Persist, e.to_string()))?;

        self.state = snapshot.state;
        self.generation = snapshot.generation;
        self.buffer = snapshot.buffer;
        self.refresh_static();

        info!(session = %self.state.session_id, "Session resumed");
        Ok(format!(
            "Resumed session {} ({} messages)",
            self.state.session_id,
            self.buffer.dynamic().len()
        ))
    }
}
