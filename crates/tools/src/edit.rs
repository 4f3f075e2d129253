//! Edit tool: replace exactly one occurrence of a string in a file.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use twin_core::error::ToolError;
use twin_core::tool::{
    Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args,
};

#[derive(Debug, Deserialize)]
struct EditArgs {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(alias = "old")]
    old_string: String,
    #[serde(alias = "new")]
    new_string: String,
}

pub struct EditTool;

/// Shorten a needle for display in an error message.
fn preview(s: &str) -> String {
    const MAX: usize = 80;
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl Tool for EditTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_string with new_string in a file. old_string must appear exactly once; include surrounding lines to make it unique."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("file_path", "string"),
            ("old_string", "string"),
            ("new_string", "string"),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: EditArgs = parse_args(args)?;
        if args.old_string.is_empty() {
            return Err(ToolError::InvalidArguments("old_string must not be empty".into()));
        }

        let path = Path::new(&args.file_path);
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::fail(
                    ToolFailure::NotFound,
                    format!("File not found: {}", args.file_path),
                ));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "edit".into(),
                    reason: format!("Failed to read {}: {e}", args.file_path),
                });
            }
        };

        let matches = content.matches(args.old_string.as_str()).count();
        let metadata = ToolMetadata {
            file_path: Some(args.file_path.clone()),
            count: Some(matches),
            ..Default::default()
        };

        match matches {
            0 => Ok(ToolResult::fail(
                ToolFailure::NotFound,
                format!("String not found in file: '{}'", preview(&args.old_string)),
            )
            .with_metadata(metadata)),
            1 => {
                let updated = content.replacen(&args.old_string, &args.new_string, 1);
                tokio::fs::write(path, &updated)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: "edit".into(),
                        reason: format!("Failed to write {}: {e}", args.file_path),
                    })?;
                Ok(ToolResult::ok(format!("Edited {}", args.file_path)).with_metadata(metadata))
            }
            n => Ok(ToolResult::fail(
                ToolFailure::Ambiguous,
                format!(
                    "String appears {n} times in {}. Provide more context to make it unique",
                    args.file_path
                ),
            )
            .with_metadata(metadata)),
        }
    }
}
