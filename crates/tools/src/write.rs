//! Write tool: create or overwrite a file.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use twin_core::error::ToolError;
use twin_core::tool::{Tool, ToolArgs, ToolKind, ToolMetadata, ToolResult, parse_args};

#[derive(Debug, Deserialize)]
struct WriteArgs {
    #[serde(alias = "path")]
    file_path: String,
    content: String,
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Write
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Overwrites any existing file."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![("file_path", "string"), ("content", "string")]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: WriteArgs = parse_args(args)?;
        let path = Path::new(&args.file_path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "write".into(),
                    reason: format!("Failed to create {}: {e}", parent.display()),
                })?;
        }

        tokio::fs::write(path, &args.content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "write".into(),
                reason: format!("Failed to write {}: {e}", args.file_path),
            })?;

        let bytes = args.content.len();
        debug!(path = %args.file_path, bytes, "File written");

        Ok(ToolResult::ok(format!("Wrote {bytes} bytes to {}", args.file_path)).with_metadata(
            ToolMetadata {
                file_path: Some(args.file_path.clone()),
                bytes_written: Some(bytes),
                total_lines: Some(args.content.lines().count()),
                ..Default::default()
            },
        ))
    }
}
