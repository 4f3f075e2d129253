//! System prompt assembly.
//!
//! The static prefix of every conversation is two System messages: the
//! prompt proper (agent persona, mode, reasoning protocol, tool manual,
//! previous-session context) and a short environment snapshot.

use chrono::Local;
use std::path::Path;
use twin_core::agent::AgentDefinition;
use twin_core::memory::LoggedSession;
use twin_core::message::Message;
use twin_core::session::Mode;
use twin_core::tool::ToolSpec;

const PREVIOUS_SESSION_CHARS: usize = 500;

const WORK_MODE: &str = "Current Mode: WORK MODE

- Use professional, technical tone
- Focus on business value and technical accuracy
- Apply full 5 Whys protocol for architecture decisions
- Be concise and actionable";

const PERSONAL_MODE: &str = "Current Mode: PERSONAL MODE

- Use conversational, friendly tone
- Be exploratory and flexible
- Apply 3-5 Whys for major decisions, 1-3 for others
- Can be more verbose and discuss trade-offs";

const FIVE_WHYS: &str = "5 Whys Protocol:
For non-trivial recommendations, you MUST provide:
1. Why Level 1: Direct reason
2. Why Level 2: Underlying benefit
3. Why Level 3: Goal alignment
4. Why Level 4: Value connection
5. Why Level 5: Root principle
6. Trade-offs considered
7. Confidence level and reasoning quality

When you settle something, write it on its own line as `Decision: ...`.
When you propose follow-up work, write `Next step: ...`.";

/// Everything the system prompt is built from.
pub struct PromptInputs<'a> {
    pub agent: &'a AgentDefinition,
    pub mode: Mode,
    pub tools: &'a [ToolSpec],
    pub previous: &'a [LoggedSession],
}

pub fn mode_section(mode: Mode) -> &'static str {
    match mode {
        Mode::Work => WORK_MODE,
        Mode::Personal => PERSONAL_MODE,
    }
}

/// The tool manual: one entry per tool plus both call formats.
pub fn tool_instructions(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return "No tools are available in this session.".into();
    }

    let entries: Vec<String> = tools
        .iter()
        .map(|t| {
            let args: Vec<String> = t
                .argument_schema
                .iter()
                .map(|(name, hint)| format!("{name}: {hint}"))
                .collect();
            format!("**{}({})**\n   {}", t.name, args.join(", "), t.description)
        })
        .collect();

    format!(
        r#"## Available Tools

You have access to these tools to help complete tasks:

{}

To use tools, output a fenced JSON block in this EXACT format:
```json
{{"tool_calls": [{{"name": "tool_name", "args": {{"arg1": "value1"}}}}]}}
```

Several calls may go in one block; they run in order. The older format is
also accepted, one call per pair of lines:
```
TOOL_CALL: tool_name
ARGS: {{"arg1": "value1", "arg2": "value2"}}
```

After tool execution, you'll receive:
```
TOOL_RESULT: [success/error]
OUTPUT: [tool output]
```

Then continue your response based on the tool results.

**Important:**
- Always use tools when you need to interact with files or the system
- Don't make assumptions about file contents - read them first
- Be precise with file paths"#,
        entries.join("\n")
    )
}

fn excerpt(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

/// Previous-session excerpts, oldest first. `None` when there are none.
pub fn previous_context(previous: &[LoggedSession]) -> Option<String> {
    if previous.is_empty() {
        return None;
    }
    let blocks: Vec<String> = previous
        .iter()
        .map(|s| {
            format!(
                "Previous session ({}):\n{}",
                s.heading,
                excerpt(&s.content, PREVIOUS_SESSION_CHARS)
            )
        })
        .collect();
    Some(format!("Previous Context:\n{}", blocks.join("\n\n")))
}

pub fn system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let persona = inputs.agent.master_prompt.trim();
    if !persona.is_empty() {
        parts.push(persona.to_string());
    }
    parts.push(mode_section(inputs.mode).to_string());
    parts.push(FIVE_WHYS.to_string());
    parts.push(tool_instructions(inputs.tools));
    parts.extend(previous_context(inputs.previous));
    parts.join("\n\n")
}

pub fn environment_snapshot(cwd: &Path) -> String {
    format!(
        "Environment:\n- Working directory: {}\n- Date: {}\n- Platform: {}/{}",
        cwd.display(),
        Local::now().format("%Y-%m-%d %H:%M"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// The static prefix for a session.
pub fn static_messages(inputs: &PromptInputs<'_>, cwd: &Path) -> Vec<Message> {
    vec![
        Message::system(system_prompt(inputs)),
        Message::system(environment_snapshot(cwd)),
    ]
}
