//! `twin chat`: Interactive or single-message session.

use std::io::Write;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use twin_agent::reload::RuntimeFactory;
use twin_agent::{KeyListener, Orchestrator, ReloadNotice, StandardRuntime, TurnOutcome};
use twin_core::event::{DomainEvent, EventBus};
use twin_core::session::Mode;

pub struct ChatOptions {
    pub model: Option<String>,
    pub mode: Option<Mode>,
    pub agent: Option<String>,
    pub resume: Option<String>,
    pub message: Option<String>,
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let factory = Arc::new(StandardRuntime::new(None).with_model(options.model.clone()));
    let runtime = factory
        .build()
        .await
        .map_err(|e| format!("Failed to start: {e}"))?;
    let cwd = std::env::current_dir()?;
    let events = Arc::new(EventBus::default());

    let mut session = Orchestrator::new(runtime, factory, &cwd).with_events(Arc::clone(&events));
    if let Some(mode) = options.mode {
        session = session.with_mode(mode);
    }
    if let Some(agent) = &options.agent {
        session = session.with_agent(agent);
    }
    let mut session = session.start().await;

    if let Some(id) = &options.resume {
        match session.resume(id).await {
            Ok(message) => println!("  {message}"),
            Err(outcome) => {
                if let Some(text) = render(&outcome) {
                    eprintln!("{text}");
                }
            }
        }
    }

    tokio::spawn(show_progress(events.subscribe()));

    if let Some(message) = options.message {
        let (mut session, outcome) = session.step(&message).await;
        if let Some(text) = render(&outcome) {
            println!("{text}");
        }
        if !matches!(outcome, TurnOutcome::Exit(_)) {
            if let Err(e) = session.save().await {
                warn!(error = %e, "Failed to save session");
            }
        }
        return Ok(());
    }

    interactive(session).await
}

async fn interactive(session: Orchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, mut idle) = KeyListener::spawn();
    let mut session = session.with_key_listener(listener);
    let mut lines = read_lines();

    let state = session.state();
    println!();
    println!("  twin: planning session {}", state.session_id);
    println!();
    println!("  Mode:    {}", state.mode.as_str().to_uppercase());
    println!("  Agent:   {}", state.agent);
    println!("  Model:   {}", state.model);
    println!("  Tools:   {}", session.runtime().tools.names().join(", "));
    println!();
    println!("  Type /help for commands. Ctrl+C interrupts a reply; at the prompt it saves and exits.");
    println!();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => line,
            _ = idle.recv() => None,
        };
        let Some(line) = line else {
            // End of input or Ctrl+C at the prompt
            println!();
            let (_, outcome) = session.step("/exit").await;
            if let Some(text) = render(&outcome) {
                println!("{text}");
            }
            break;
        };

        let (next, outcome) = session.step(&line).await;
        session = next;
        if let Some(text) = render(&outcome) {
            println!("{text}");
            println!();
        }
        if matches!(outcome, TurnOutcome::Exit(_)) {
            break;
        }
    }

    Ok(())
}

/// Stdin lines, delivered over a channel so the prompt can also wait on
/// interrupts.
fn read_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            }
        }
    });
    rx
}

async fn show_progress(mut events: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    eprintln!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress display fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn progress_line(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::ToolStarted {
            tool_name,
            args_preview,
            ..
        } => Some(format!("  [tool] {tool_name}({args_preview})")),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            Some(format!("  [tool] {tool_name} {status} in {duration_ms}ms"))
        }
        DomainEvent::ContextCompacted {
            messages_folded,
            chars_before,
            chars_after,
            ..
        } => Some(format!(
            "  [context] folded {messages_folded} messages ({chars_before} -> {chars_after} chars)"
        )),
        _ => None,
    }
}

fn render(outcome: &TurnOutcome) -> Option<String> {
    match outcome {
        TurnOutcome::Ignored => None,
        TurnOutcome::Reply(reply) => {
            let mut out: Vec<String> = reply
                .warnings
                .iter()
                .map(|w| format!("  [warning] {w}"))
                .collect();
            match &reply.reload {
                Some(ReloadNotice::Completed { tools }) => {
                    out.push(format!("  [reload] twin reloaded with {tools} tools"));
                }
                Some(ReloadNotice::Failed(message)) => {
                    out.push(format!("  [reload] failed, continuing as before: {message}"));
                }
                None => {}
            }
            if !reply.text.is_empty() {
                out.push(String::new());
                out.extend(reply.text.lines().map(|line| format!("  Twin > {line}")));
            }
            Some(out.join("\n"))
        }
        TurnOutcome::Command(text) => Some(
            text.lines()
                .map(|line| format!("  {line}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        TurnOutcome::Failed { stage, message } => Some(format!("  [{stage} error] {message}")),
        TurnOutcome::Cancelled => Some(
            "  [interrupted] reply cancelled; nothing was added\n  Press Ctrl+C again to save and exit, or type a new message."
                .into(),
        ),
        TurnOutcome::Exit(message) => Some(format!("  {message}")),
    }
}
