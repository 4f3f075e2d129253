//! Tool-call extraction from model replies.
//!
//! Two formats are recognised. The structured one is a fenced JSON block:
//!
//! ````text
//! ```json
//! {"tool_calls": [{"name": "read", "args": {"file_path": "src/main.rs"}}]}
//! ```
//! ````
//!
//! The legacy one is a pair of lines, consulted only when the reply holds no
//! structured call:
//!
//! ```text
//! TOOL_CALL: read
//! ARGS: {"file_path": "src/main.rs"}
//! ```
//!
//! Parsing never fails. Anything unusable becomes a warning and the rest of
//! the reply is still parsed.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;
use twin_core::tool::{ToolArgs, ToolCall};

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("Invalid fence pattern")
});
static LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TOOL_CALL:[ \t]*([A-Za-z_][A-Za-z0-9_-]*)[ \t]*(?:\r?\n[ \t]*)+ARGS:")
        .expect("Invalid legacy call pattern")
});
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("Invalid blank run pattern"));

/// Calls found in a reply, in order of appearance, plus anything skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub calls: Vec<ToolCall>,
    pub warnings: Vec<String>,
}

impl ParseOutcome {
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Extract every tool call from `reply`.
pub fn parse(reply: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    parse_structured(reply, &mut outcome);
    if outcome.calls.is_empty() {
        parse_legacy(reply, &mut outcome);
    }

    for warning in &outcome.warnings {
        warn!(warning = %warning, "Skipped part of a tool call");
    }
    outcome
}

fn parse_structured(reply: &str, out: &mut ParseOutcome) {
    for caps in FENCED.captures_iter(reply) {
        let body = caps[1].trim();
        if !body.contains("tool_calls") {
            continue;
        }

        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                out.warnings.push(format!("Malformed tool_calls block: {e}"));
                continue;
            }
        };
        let Some(entries) = value.get("tool_calls").and_then(Value::as_array) else {
            out.warnings
                .push("Fenced block mentions tool_calls but has no tool_calls array".into());
            continue;
        };

        for (i, entry) in entries.iter().enumerate() {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                out.warnings.push(format!("tool_calls[{i}] has no name; skipped"));
                continue;
            };
            let args = match entry.get("args") {
                None | Some(Value::Null) => ToolArgs::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    out.warnings
                        .push(format!("tool_calls[{i}] ({name}): args is not an object; skipped"));
                    continue;
                }
            };
            out.calls.push(ToolCall::new(name, args));
        }
    }
}

/// The first JSON value after `ARGS:` and the byte length it occupies.
fn legacy_args(rest: &str) -> Option<(Result<Value, serde_json::Error>, usize)> {
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    let value = stream.next()?;
    Some((value, stream.byte_offset()))
}

fn parse_legacy(reply: &str, out: &mut ParseOutcome) {
    for caps in LEGACY.captures_iter(reply) {
        let name = &caps[1];
        let Some(whole) = caps.get(0) else { continue };

        match legacy_args(&reply[whole.end()..]) {
            Some((Ok(Value::Object(args)), _)) => out.calls.push(ToolCall::new(name, args)),
            Some((Ok(_), _)) => {
                out.warnings.push(format!("ARGS for {name} is not a JSON object; skipped"));
            }
            Some((Err(e), _)) => {
                out.warnings.push(format!("Malformed ARGS for {name}: {e}"));
            }
            None => out.warnings.push(format!("Missing ARGS for {name}; skipped")),
        }
    }
}

fn line_end(text: &str, from: usize) -> usize {
    text[from..].find('\n').map(|i| from + i).unwrap_or(text.len())
}

fn legacy_spans(text: &str) -> Vec<(usize, usize)> {
    LEGACY
        .find_iter(text)
        .map(|m| {
            let end = match legacy_args(&text[m.end()..]) {
                Some((Ok(_), consumed)) => m.end() + consumed,
                _ => line_end(text, m.end()),
            };
            (m.start(), end)
        })
        .collect()
}

fn remove_spans(text: &str, mut spans: Vec<(usize, usize)>) -> String {
    spans.sort_unstable();
    let mut kept = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start > cursor {
            kept.push_str(&text[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    kept.push_str(&text[cursor..]);
    kept
}

/// `reply` with every tool call removed, for display.
///
/// Fenced blocks go entirely when they hold structured calls or nothing but
/// legacy calls.
pub fn strip_tool_calls(reply: &str) -> String {
    let mut spans = legacy_spans(reply);
    for caps in FENCED.captures_iter(reply) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body = body.as_str();
        let only_legacy = || {
            let inner = legacy_spans(body);
            !inner.is_empty() && remove_spans(body, inner).trim().is_empty()
        };
        if body.contains("tool_calls") || only_legacy() {
            spans.push((whole.start(), whole.end()));
        }
    }
    if spans.is_empty() {
        return reply.trim().to_string();
    }

    let kept = remove_spans(reply, spans);
    BLANK_RUN.replace_all(&kept, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_block_with_language_tag() {
        let reply = "Let me look.\n\n```json\n{\"tool_calls\": [{\"name\": \"read\", \"args\": {\"file_path\": \"src/main.rs\"}}]}\n```\n";
        let outcome = parse(reply);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "read");
        assert_eq!(outcome.calls[0].args["file_path"], json!("src/main.rs"));
    }

    #[test]
    fn structured_calls_keep_order_across_blocks() {
        let reply = r#"```
{"tool_calls": [{"name": "glob", "args": {"pattern": "*.rs"}}, {"name": "grep", "args": {"pattern": "fn main"}}]}
```
and then
```json
{"tool_calls": [{"name": "bash", "args": {"command": "ls"}}]}
```"#;
        let names: Vec<String> = parse(reply).calls.into_iter().map(|c| c.tool_name).collect();
        assert_eq!(names, vec!["glob", "grep", "bash"]);
    }

    #[test]
    fn nameless_entry_is_skipped_but_siblings_survive() {
        let reply = r#"```json
{"tool_calls": [{"args": {"x": 1}}, {"name": 42}, {"name": "read", "args": {"file_path": "a"}}]}
```"#;
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "read");
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].contains("tool_calls[0]"));
    }

    #[test]
    fn missing_args_is_empty_map() {
        let outcome = parse("```json\n{\"tool_calls\": [{\"name\": \"glob\"}]}\n```");
        assert_eq!(outcome.calls, vec![ToolCall::new("glob", ToolArgs::new())]);
    }

    #[test]
    fn non_object_args_are_skipped() {
        let outcome = parse("```json\n{\"tool_calls\": [{\"name\": \"glob\", \"args\": [1, 2]}]}\n```");
        assert!(outcome.calls.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn malformed_block_yields_warning_only() {
        let reply = "```json\n{\"tool_calls\": [{\"name\": \"read\", \"args\": {\"file_path\": }]}\n```";
        let outcome = parse(reply);
        assert!(outcome.calls.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("Malformed tool_calls block"));
    }

    #[test]
    fn malformed_block_does_not_hide_valid_sibling_block() {
        let reply = "```json\n{\"tool_calls\": [\n```\n\n```json\n{\"tool_calls\": [{\"name\": \"bash\", \"args\": {\"command\": \"pwd\"}}]}\n```";
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "bash");
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn ordinary_code_blocks_are_ignored() {
        let reply = "Here is code:\n```rust\nfn main() { println!(\"{}\", 1); }\n```\nand JSON:\n```json\n{\"name\": \"read\"}\n```";
        let outcome = parse(reply);
        assert!(outcome.calls.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn plain_text_has_no_calls() {
        assert_eq!(parse("Just an answer."), ParseOutcome::default());
    }

    #[test]
    fn legacy_single_call() {
        let reply = "I'll write the file.\n\nTOOL_CALL: write\nARGS: {\"file_path\": \"/tmp/x.txt\", \"content\": \"hi\"}\n";
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "write");
        assert_eq!(outcome.calls[0].args["content"], json!("hi"));
    }

    #[test]
    fn legacy_allows_blank_lines_before_args() {
        let reply = "TOOL_CALL: read\n\n  \r\nARGS: {\"file_path\": \"a.txt\"}";
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "read");
        assert_eq!(outcome.calls[0].args["file_path"], json!("a.txt"));
        assert_eq!(strip_tool_calls(reply), "");
    }

    #[test]
    fn legacy_args_may_nest_braces() {
        let reply = "TOOL_CALL: improve_self\nARGS: {\"description\": \"d\", \"reasoning\": \"r\", \"files\": {\"src/a.rs\": \"fn a() { {} }\"}}\nDone.";
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].args["files"]["src/a.rs"], json!("fn a() { {} }"));
    }

    #[test]
    fn legacy_malformed_sibling_is_skipped() {
        let reply = "TOOL_CALL: read\nARGS: {\"file_path\": \"a.txt\"}\n\nTOOL_CALL: write\nARGS: {\"file_path\": oops}\n\nTOOL_CALL: glob\nARGS: \"*.rs\"\n\nTOOL_CALL: grep\nARGS: {\"pattern\": \"x\"}";
        let outcome = parse(reply);
        let names: Vec<&str> = outcome.calls.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["read", "grep"]);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].contains("write"));
        assert!(outcome.warnings[1].contains("glob"));
    }

    #[test]
    fn legacy_inside_a_fence_is_found() {
        let reply = "```\nTOOL_CALL: bash\nARGS: {\"command\": \"ls\"}\n```";
        assert_eq!(parse(reply).calls[0].tool_name, "bash");
    }

    #[test]
    fn legacy_is_ignored_when_structured_calls_exist() {
        let reply = "```json\n{\"tool_calls\": [{\"name\": \"read\", \"args\": {\"file_path\": \"a\"}}]}\n```\nTOOL_CALL: bash\nARGS: {\"command\": \"rm -rf /\"}";
        let outcome = parse(reply);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "read");
    }

    #[test]
    fn legacy_is_used_when_structured_block_is_broken() {
        let reply = "```json\n{\"tool_calls\": oops}\n```\nTOOL_CALL: bash\nARGS: {\"command\": \"ls\"}";
        let outcome = parse(reply);
        assert_eq!(outcome.calls[0].tool_name, "bash");
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn strip_removes_both_forms() {
        let reply = "Reading now.\n\n```json\n{\"tool_calls\": [{\"name\": \"read\", \"args\": {}}]}\n```\n\nThen:\n\n```\nTOOL_CALL: bash\nARGS: {\"command\": \"echo {}\"}\n```\n\nAll set.";
        let stripped = strip_tool_calls(reply);
        assert_eq!(stripped, "Reading now.\n\nThen:\n\nAll set.");
    }

    #[test]
    fn strip_keeps_ordinary_code() {
        let reply = "Example:\n```rust\nlet x = 1;\n```";
        assert_eq!(strip_tool_calls(reply), reply);
    }

    #[test]
    fn strip_drops_malformed_legacy_line() {
        let reply = "Trying.\nTOOL_CALL: write\nARGS: {broken\nAfter.";
        assert_eq!(strip_tool_calls(reply), "Trying.\n\nAfter.");
    }
}
