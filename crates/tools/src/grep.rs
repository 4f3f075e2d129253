//! Grep tool: regex search across a directory tree.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use twin_core::error::ToolError;
use twin_core::tool::{
    Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args,
};
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &[".git", "__pycache__", "node_modules", ".venv", "venv", "target"];
const SKIP_EXTENSIONS: &[&str] = &["pyc", "so", "dylib", "bin", "exe", "o", "a"];
const MAX_MATCHES: usize = 500;

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    /// Lines of context around each match
    #[serde(default)]
    context: usize,
}

pub struct GrepTool;

fn skip_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn skip_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SKIP_EXTENSIONS.contains(&ext))
}

/// Text content of `path`, or `None` for binary and unreadable files.
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

struct Search {
    lines: Vec<String>,
    matches: usize,
    truncated: bool,
}

fn search(re: &Regex, root: &Path, cwd: &Path, context: usize) -> Search {
    let mut out = Search {
        lines: Vec::new(),
        matches: 0,
        truncated: false,
    };

    let files: Vec<PathBuf> = if root.is_file() {
        vec![root.to_path_buf()]
    } else {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !skip_dir(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .collect()
    };

    for file in files {
        if skip_file(&file) {
            continue;
        }
        let Some(text) = read_text(&file) else {
            continue;
        };
        let display = file
            .strip_prefix(cwd)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| file.display().to_string());
        let lines: Vec<&str> = text.lines().collect();

        for (idx, line) in lines.iter().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            out.matches += 1;
            if out.matches > MAX_MATCHES {
                out.truncated = true;
                continue;
            }
            let before = idx.saturating_sub(context);
            let after = (idx + context + 1).min(lines.len());
            for ctx in &lines[before..idx] {
                out.lines.push(format!("    {ctx}"));
            }
            out.lines.push(format!("{display}:{}: {line}", idx + 1));
            for ctx in &lines[idx + 1..after] {
                out.lines.push(format!("    {ctx}"));
            }
        }
    }
    out
}

#[async_trait]
impl Tool for GrepTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Grep
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns file:line: text for each match. Skips VCS, dependency and build directories and binary files."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("pattern", "string (regex)"),
            ("path", "string (optional)"),
            ("context", "integer (optional)"),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: GrepArgs = parse_args(args)?;
        let re = Regex::new(&args.pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex: {e}")))?;
        let cwd = std::env::current_dir().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "grep".into(),
            reason: e.to_string(),
        })?;
        let root = match &args.path {
            Some(p) => {
                let root = cwd.join(p);
                if !root.exists() {
                    return Ok(ToolResult::fail(
                        ToolFailure::NotFound,
                        format!("Path not found: {p}"),
                    ));
                }
                root
            }
            None => cwd.clone(),
        };
        let context = args.context;

        let found = tokio::task::spawn_blocking(move || search(&re, &root, &cwd, context))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "grep".into(),
                reason: e.to_string(),
            })?;

        let mut output = if found.matches == 0 {
            "No matches found".to_string()
        } else {
            found.lines.join("\n")
        };
        if found.truncated {
            output.push_str(&format!(
                "\n... [truncated: showing {MAX_MATCHES} of {} matches]",
                found.matches
            ));
        }

        Ok(ToolResult::ok(output).with_metadata(ToolMetadata {
            count: Some(found.matches),
            truncated: found.truncated,
            ..Default::default()
        }))
    }
}
