use super::*;
use std::time::Duration;
use twin_core::tool::ToolRegistry;
use twin_memory::ContextLog;
use twin_tools::improve_self::ImproveSelfTool;
use twin_tools::read::ReadTool;

use crate::cancel::KeyListener;
use crate::test_helpers::{
    FakeCommitter, FixedFactory, Scripted, SequentialMockProvider, test_config, test_runtime,
};

fn registry(dir: &Path) -> ToolRegistry {
    twin_tools::default_registry(&test_config(dir), FakeCommitter::new(dir))
}

async fn session(
    dir: &Path,
    provider: &Arc<SequentialMockProvider>,
    tools: ToolRegistry,
) -> (Orchestrator, Arc<FixedFactory>) {
    let runtime = test_runtime(dir, provider.clone(), tools);
    let factory = Arc::new(FixedFactory::new(runtime.clone()));
    let orchestrator = Orchestrator::new(runtime, factory.clone(), dir).start().await;
    (orchestrator, factory)
}

fn reply(outcome: TurnOutcome) -> Reply {
    match outcome {
        TurnOutcome::Reply(reply) => reply,
        other => panic!("expected a reply, got {other:?}"),
    }
}

fn command_output(outcome: TurnOutcome) -> String {
    match outcome {
        TurnOutcome::Command(text) => text,
        other => panic!("expected command output, got {other:?}"),
    }
}

fn failure(outcome: TurnOutcome) -> (FailureStage, String) {
    match outcome {
        TurnOutcome::Failed { stage, message } => (stage, message),
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_reply_is_committed_as_one_turn() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["Hello!\nNext step: pick a cache"]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    assert_eq!(orch.phase(), SessionPhase::AwaitingInput);

    let (orch, outcome) = orch.step("hi there").await;
    let reply = reply(outcome);
    assert_eq!(reply.text, "Hello!\nNext step: pick a cache");
    assert!(reply.tools.is_empty());

    let dynamic = orch.buffer().dynamic();
    assert_eq!(dynamic.len(), 2);
    assert_eq!(dynamic[0], Message::user("hi there"));
    assert_eq!(dynamic[1].role, Role::Assistant);

    let request = &provider.requests()[0];
    assert_eq!(request.messages.len(), orch.buffer().static_messages().len() + 1);
    assert_eq!(request.messages.last().unwrap().content, "hi there");

    let state = orch.state();
    assert_eq!(state.metrics.query_count, 1);
    assert_eq!(state.session_data.next_steps, vec!["pick a cache"]);
    assert!(state.session_data.planning_discussion.starts_with("hi there"));
}

#[tokio::test]
async fn legacy_write_runs_and_feeds_results_back() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out/hello.txt");
    let first = format!(
        "Writing it now.\n\nTOOL_CALL: write\nARGS: {{\"file_path\": \"{}\", \"content\": \"hi\"}}",
        target.display()
    );
    let provider = Arc::new(SequentialMockProvider::replies(&[
        &first,
        "Done.\nDecision: keep files small",
    ]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let mut events = orch.events().subscribe();

    let (orch, outcome) = orch.step("write hi to a file").await;
    let reply = reply(outcome);
    assert_eq!(reply.text, "Done.\nDecision: keep files small");
    assert_eq!(reply.tools.len(), 1);
    assert!(reply.tools[0].result.success);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi");

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let followup = &requests[1].messages;
    assert_eq!(followup.len(), orch.buffer().static_messages().len() + 1);
    let results = &followup.last().unwrap().content;
    assert!(results.starts_with("Here are the tool results:\n\nTOOL_RESULT: success\nOUTPUT: "));
    assert!(results.contains(&target.display().to_string()));
    assert!(results.ends_with("Please continue your response based on these results."));

    let dynamic = orch.buffer().dynamic();
    assert_eq!(dynamic.len(), 4);
    assert_eq!(dynamic[0].content, "write hi to a file");
    assert_eq!(dynamic[1].content, first);
    assert_eq!(&dynamic[2].content, results);

    let data = &orch.state().session_data;
    assert_eq!(data.decisions, vec!["keep files small"]);
    assert!(data.files_discussed.iter().any(|f| f.contains("hello.txt")));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e.as_ref(), DomainEvent::ToolStarted { tool_name, .. } if tool_name == "write")));
    assert!(seen.iter().any(|e| matches!(e.as_ref(), DomainEvent::ToolExecuted { success: true, .. })));
}

#[tokio::test]
async fn failed_tool_is_reported_as_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        "```json\n{\"tool_calls\": [{\"name\": \"teleport\", \"args\": {}}]}\n```",
        "That tool does not exist.",
    ]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let (_, outcome) = orch.step("go").await;
    let reply = reply(outcome);
    assert!(!reply.tools[0].result.success);
    let requests = provider.requests();
    let results = &requests[1].messages.last().unwrap().content;
    assert!(results.contains("TOOL_RESULT: error\nOUTPUT: Unknown tool: teleport"));
}

#[tokio::test]
async fn backend_failure_leaves_buffer_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![Scripted::Fail(
        ProviderError::Unavailable("connection refused".into()),
    )]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let before = orch.buffer().clone();

    let (orch, outcome) = orch.step("hello").await;
    let (stage, message) = failure(outcome);
    assert_eq!(stage, FailureStage::Backend);
    assert!(message.contains("connection refused"));
    assert_eq!(orch.buffer(), &before);
    assert_eq!(orch.state().metrics.query_count, 0);
    assert_eq!(orch.phase(), SessionPhase::AwaitingInput);
}

#[tokio::test]
async fn interrupt_cancels_call_and_keeps_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![Scripted::Hang]));
    let (listener, mut idle) = KeyListener::channel();
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let orch = orch.with_key_listener(listener.clone());
    let before = orch.buffer().clone();

    let trigger = listener.clone();
    tokio::spawn(async move {
        while !trigger.is_armed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.interrupt();
    });

    let (orch, outcome) = orch.step("a very long question").await;
    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(orch.buffer(), &before);
    assert!(!listener.is_armed());
    assert!(idle.try_recv().is_err());
}

#[tokio::test]
async fn tool_rounds_are_capped() {
    let dir = tempfile::tempdir().unwrap();
    let call = "```json\n{\"tool_calls\": [{\"name\": \"glob\", \"args\": {\"pattern\": \"*.nothing-matches\"}}]}\n```";
    let provider = Arc::new(SequentialMockProvider::replies(&[call, call, call]));
    let mut runtime = test_runtime(dir.path(), provider.clone(), registry(dir.path()));
    let mut config = test_config(dir.path());
    config.agent.max_tool_rounds = 2;
    runtime.config = Arc::new(config);
    let factory = Arc::new(FixedFactory::new(runtime.clone()));
    let orch = Orchestrator::new(runtime, factory, dir.path()).start().await;

    let (orch, outcome) = orch.step("loop forever").await;
    let reply = reply(outcome);
    assert_eq!(reply.tools.len(), 2);
    assert!(reply.warnings.iter().any(|w| w.starts_with("Stopped after 2 tool rounds")));
    assert_eq!(provider.call_count(), 3);
    assert_eq!(orch.buffer().dynamic().len(), 6);
}

fn improve_self_registry(dir: &Path) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(ImproveSelfTool::new(FakeCommitter::new(dir))));
    tools
}

const IMPROVE_CALL: &str = "Improving myself.\n```json\n{\"tool_calls\": [{\"name\": \"improve_self\", \"args\": {\"description\": \"Add notes\", \"reasoning\": \"Testing reloads\", \"files\": {\"notes.txt\": \"remember\"}}}]}\n```";

#[tokio::test]
async fn self_improvement_hot_reloads_into_new_instance() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[IMPROVE_CALL, "Applied the change."]));
    let old_runtime = test_runtime(dir.path(), provider.clone(), improve_self_registry(dir.path()));

    let mut new_tools = improve_self_registry(dir.path());
    new_tools.register(Box::new(ReadTool::default()));
    let factory = Arc::new(FixedFactory::new(test_runtime(
        dir.path(),
        provider.clone(),
        new_tools,
    )));
    let orch = Orchestrator::new(old_runtime, factory.clone(), dir.path()).start().await;
    let session_id = orch.state().session_id.clone();
    assert!(!orch.buffer().static_messages()[0].content.contains("**read("));

    let (orch, outcome) = orch.step("improve yourself").await;
    let reply = reply(outcome);
    assert_eq!(reply.text, "Applied the change.");
    assert_eq!(reply.reload, Some(ReloadNotice::Completed { tools: 2 }));
    assert!(reply.tools[0].result.metadata.requires_restart);
    assert_eq!(factory.builds(), 1);
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "remember");

    // Same session, new subsystems
    assert_eq!(orch.state().session_id, session_id);
    assert_eq!(orch.runtime().tools.len(), 2);
    assert_eq!(orch.buffer().dynamic().len(), 4);
    assert!(orch.buffer().static_messages()[0].content.contains("**read("));
    assert_eq!(orch.phase(), SessionPhase::AwaitingInput);

    // Persisted before the swap
    assert!(dir.path().join(format!("sessions/{session_id}.json")).exists());
    let log = ContextLog::new(dir.path().join("context"));
    assert!(log.path_for(dir.path()).exists());
}

#[tokio::test]
async fn failed_rebuild_keeps_old_instance() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[IMPROVE_CALL, "Applied."]));
    let runtime = test_runtime(dir.path(), provider.clone(), improve_self_registry(dir.path()));
    let factory = Arc::new(FixedFactory::failing(runtime.clone()));
    let orch = Orchestrator::new(runtime, factory.clone(), dir.path()).start().await;

    let (orch, outcome) = orch.step("improve yourself").await;
    let reply = reply(outcome);
    match reply.reload {
        Some(ReloadNotice::Failed(message)) => assert!(message.contains("config file is invalid")),
        other => panic!("expected failed reload, got {other:?}"),
    }
    assert_eq!(orch.runtime().tools.len(), 1);
    assert_eq!(orch.buffer().dynamic().len(), 4);

    // The session is still usable
    let (_, outcome) = orch.step("/status").await;
    assert!(command_output(outcome).contains("Tools: improve_self"));
}

#[tokio::test]
async fn image_paths_are_attached() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("diagram.PNG");
    std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["A diagram."]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let input = format!("what is in {} and missing.png?", image.display());
    let _ = orch.step(&input).await;
    let sent = provider.requests()[0].messages.last().unwrap().clone();
    assert_eq!(sent.images, vec![image]);
}

#[tokio::test]
async fn commands_never_call_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let (orch, outcome) = orch.step("/status").await;
    let status = command_output(outcome);
    assert!(status.contains(&format!("Session: {}", orch.state().session_id)));
    let chars = orch.buffer().size();
    let cpt = orch.runtime().config.context.chars_per_token;
    let tokens = crate::context::estimate_tokens(chars, cpt);
    assert!(tokens > 0);
    assert!(status.contains(&format!("Buffer: {chars} chars, ~{tokens} tokens (")));

    let (orch, outcome) = orch.step("/help").await;
    assert!(command_output(outcome).contains("/resume <id>"));

    let (orch, outcome) = orch.step("/frobnicate").await;
    let (stage, message) = failure(outcome);
    assert_eq!(stage, FailureStage::Command);
    assert!(message.contains("/help"));

    let (_, outcome) = orch.step("   ").await;
    assert_eq!(outcome, TurnOutcome::Ignored);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn mode_and_agent_rebuild_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let orch = orch.with_mode(Mode::Personal);

    let (orch, outcome) = orch.step("/mode work").await;
    assert_eq!(command_output(outcome), "Switched to WORK MODE");
    assert!(orch.buffer().static_messages()[0].content.contains("Current Mode: WORK MODE"));

    let (orch, outcome) = orch.step("/mode holiday").await;
    assert_eq!(failure(outcome).0, FailureStage::Command);

    let (orch, outcome) = orch.step("/agent technical-lead").await;
    assert_eq!(command_output(outcome), "Switched to agent: technical-lead");
    assert!(orch.buffer().static_messages()[0].content.starts_with("You are a technical lead."));

    let (orch, outcome) = orch.step("/agent ghost").await;
    let (_, message) = failure(outcome);
    assert!(message.contains("Available: technical-lead, assistant"));

    let (_, outcome) = orch.step("/agent").await;
    assert!(command_output(outcome).contains("* technical-lead"));
}

#[tokio::test]
async fn model_switch_is_validated_against_backend() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        SequentialMockProvider::replies(&[]).with_models(&["qwen2.5-coder:7b", "llama3:latest"]),
    );
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let (orch, outcome) = orch.step("/model llama3").await;
    assert_eq!(command_output(outcome), "Switched to model: llama3");
    assert_eq!(orch.state().model, "llama3");

    let (orch, outcome) = orch.step("/model smart").await;
    let (_, message) = failure(outcome);
    assert!(message.contains("qwen2.5-coder:32b"));
    assert_eq!(orch.state().model, "llama3");

    let (orch, outcome) = orch.step("/model fast").await;
    command_output(outcome);
    assert_eq!(orch.state().model, "qwen2.5-coder:7b");

    let (_, outcome) = orch.step("/model").await;
    let listing = command_output(outcome);
    assert!(listing.contains("* qwen2.5-coder:7b"));
    assert!(listing.contains("fast -> qwen2.5-coder:7b"));
}

#[tokio::test]
async fn generation_options_are_tunable() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["ok"]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let (orch, _) = orch.step("/ctx 4096").await;
    let (orch, _) = orch.step("/temp 0.2").await;
    let (orch, _) = orch.step("/top_p 0.5").await;
    let (orch, outcome) = orch.step("/temp 3").await;
    assert_eq!(failure(outcome).0, FailureStage::Command);
    let (orch, outcome) = orch.step("/ctx zero").await;
    assert_eq!(failure(outcome).0, FailureStage::Command);

    let _ = orch.step("hello").await;
    let options = &provider.requests()[0].options;
    assert_eq!(options.num_ctx, 4096);
    assert!((options.temperature - 0.2).abs() < f32::EPSILON);
    assert!((options.top_p - 0.5).abs() < f32::EPSILON);
}

#[tokio::test]
async fn save_list_show_resume_delete() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["Hi there."]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let id = orch.state().session_id.clone();

    let (orch, _) = orch.step("hello").await;
    let (orch, outcome) = orch.step("/save").await;
    assert_eq!(command_output(outcome), format!("Session {id} saved"));

    let (orch, outcome) = orch.step("/sessions").await;
    assert!(command_output(outcome).contains(&format!("* {id}")));

    let (orch, outcome) = orch.step(&format!("/show {id}")).await;
    let shown = command_output(outcome);
    assert!(shown.contains("[user] hello"));
    assert!(shown.contains("[assistant] Hi there."));

    let (_, outcome) = orch.step(&format!("/delete {id}")).await;
    assert_eq!(failure(outcome).1, "Cannot delete the active session");

    // A fresh session picks the saved one up
    let (other, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let (other, outcome) = other.step(&format!("/resume {id}")).await;
    assert_eq!(command_output(outcome), format!("Resumed session {id} (2 messages)"));
    assert_eq!(other.state().session_id, id);
    assert_eq!(other.buffer().dynamic().len(), 2);

    let (third, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let (third, outcome) = third.step(&format!("/delete {id}")).await;
    assert_eq!(command_output(outcome), format!("Deleted session {id}"));
    let (_, outcome) = third.step(&format!("/show {id}")).await;
    assert_eq!(failure(outcome).0, FailureStage::Persist);
}

#[tokio::test]
async fn context_reports_previous_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;

    let (orch, outcome) = orch.step("/context").await;
    assert_eq!(command_output(outcome), "No previous context found");
    let (orch, _) = orch.step("/save").await;
    let (_, outcome) = orch.step("/context").await;
    assert!(command_output(outcome).contains("Found 1 previous session(s)"));

    // The next session sees it in its prompt
    let (next, _) = session(dir.path(), &provider, registry(dir.path())).await;
    assert!(next.buffer().static_messages()[0].content.contains("Previous Context:"));
}

#[tokio::test]
async fn clear_and_exit() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["Sure."]));
    let (orch, _) = session(dir.path(), &provider, registry(dir.path())).await;
    let id = orch.state().session_id.clone();

    let (orch, _) = orch.step("remember this").await;
    let (orch, outcome) = orch.step("/clear").await;
    command_output(outcome);
    assert!(orch.buffer().dynamic().is_empty());
    assert_eq!(orch.buffer().static_messages().len(), 2);

    let (orch, outcome) = orch.step("/bye").await;
    match outcome {
        TurnOutcome::Exit(message) => assert!(message.contains(&id)),
        other => panic!("expected exit, got {other:?}"),
    }
    assert_eq!(orch.phase(), SessionPhase::SavingAndExit);
    assert!(dir.path().join(format!("sessions/{id}.json")).exists());
}

#[tokio::test]
async fn manual_reload_rebuilds_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[]));
    let (orch, factory) = session(dir.path(), &provider, registry(dir.path())).await;

    let (_, outcome) = orch.step("/reload").await;
    assert_eq!(command_output(outcome), "Reloaded: 8 tools available");
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn auto_select_switches_agent_on_keywords() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&["Let's plan it."]));
    let mut runtime = test_runtime(dir.path(), provider.clone(), registry(dir.path()));
    let mut config = test_config(dir.path());
    config.auto_select_agent = true;
    runtime.config = Arc::new(config);
    let factory = Arc::new(FixedFactory::new(runtime.clone()));
    let orch = Orchestrator::new(runtime, factory, dir.path()).start().await;
    assert_eq!(orch.state().agent, "assistant");

    let (orch, _) = orch.step("help me with the architecture").await;
    assert_eq!(orch.state().agent, "technical-lead");
    let sent = &provider.requests()[0].messages[0].content;
    assert!(sent.starts_with("You are a technical lead."));
}

#[test]
fn followup_formats_every_result() {
    let reports = vec![
        ToolReport {
            call: ToolCall::new("read", Default::default()),
            result: ToolResult::ok("contents"),
            duration_ms: 1,
        },
        ToolReport {
            call: ToolCall::new("bash", Default::default()),
            result: ToolResult::fail(twin_core::tool::ToolFailure::ExitStatus, "Command exited with code 2"),
            duration_ms: 1,
        },
    ];
    assert_eq!(
        followup_message(&reports),
        "Here are the tool results:\n\nTOOL_RESULT: success\nOUTPUT: contents\n\nTOOL_RESULT: error\nOUTPUT: Command exited with code 2\n\nPlease continue your response based on these results."
    );
}
