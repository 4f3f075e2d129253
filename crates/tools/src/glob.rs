//! Glob tool: find files by pattern, newest first.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use twin_core::error::ToolError;
use twin_core::tool::{
    Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args,
};

const MAX_RESULTS: usize = 500;

#[derive(Debug, Deserialize)]
struct GlobArgs {
    pattern: String,
    /// Base directory; defaults to the working directory
    #[serde(default)]
    path: Option<String>,
}

pub struct GlobTool;

fn search(pattern: &str, base: &Path) -> Result<Vec<(PathBuf, SystemTime)>, ToolError> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        base.join(pattern).to_string_lossy().into_owned()
    };

    let paths = ::glob::glob(&full)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid glob pattern: {e}")))?;

    let mut found: Vec<(PathBuf, SystemTime)> = paths
        .filter_map(Result::ok)
        .filter_map(|p| {
            let meta = std::fs::metadata(&p).ok()?;
            meta.is_file()
                .then(|| (p, meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)))
        })
        .collect();
    found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(found)
}

#[async_trait]
impl Tool for GlobTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Glob
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern such as **/*.rs. Results are sorted by modification time, newest first."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![("pattern", "string"), ("path", "string (optional)")]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: GlobArgs = parse_args(args)?;
        let cwd = std::env::current_dir().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "glob".into(),
            reason: e.to_string(),
        })?;
        let base = match &args.path {
            Some(p) => {
                let base = cwd.join(p);
                if !base.exists() {
                    return Ok(ToolResult::fail(
                        ToolFailure::NotFound,
                        format!("Path not found: {p}"),
                    ));
                }
                base
            }
            None => cwd.clone(),
        };

        let pattern = args.pattern.clone();
        let found = tokio::task::spawn_blocking(move || search(&pattern, &base))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "glob".into(),
                reason: e.to_string(),
            })??;

        if found.is_empty() {
            return Ok(ToolResult::ok("No files found").with_metadata(ToolMetadata {
                count: Some(0),
                ..Default::default()
            }));
        }

        let total = found.len();
        let truncated = total > MAX_RESULTS;
        let mut output: Vec<String> = found
            .into_iter()
            .take(MAX_RESULTS)
            .map(|(p, _)| {
                p.strip_prefix(&cwd)
                    .map(|rel| rel.display().to_string())
                    .unwrap_or_else(|_| p.display().to_string())
            })
            .collect();
        if truncated {
            output.push(format!("... [truncated: showing {MAX_RESULTS} of {total} files]"));
        }

        Ok(ToolResult::ok(output.join("\n")).with_metadata(ToolMetadata {
            count: Some(total),
            truncated,
            ..Default::default()
        }))
    }
}
