//! Bash tool: execute shell commands under a hard wall-clock limit.
//!
//! The command runs as the leader of its own process group. When the call
//! ends, by exit or by timeout, the whole group is killed and reaped, so
//! nothing it started outlives the call.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use twin_core::error::ToolError;
use twin_core::process;
use twin_core::tool::{Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args};

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    /// Seconds
    #[serde(default)]
    timeout: Option<u64>,
}

pub struct BashTool {
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

async fn read_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

fn merge_output(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        output.push_str("\n[stderr]\n");
        output.push_str(stderr);
    }
    output
}

#[async_trait]
impl Tool for BashTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Bash
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout and stderr. Use for builds, tests, git and other programs. Optional timeout in seconds (default 120)."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![("command", "string"), ("timeout", "integer (seconds, optional)")]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: BashArgs = parse_args(args)?;
        let timeout = args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        debug!(command = %args.command, timeout_secs = timeout.as_secs(), "Executing shell command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason: e.to_string(),
        })?;
        let pgid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Pipes are drained inside the limit: a backgrounded grandchild that
        // keeps them open counts against the timeout too.
        let finished = tokio::time::timeout(timeout, async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe));
            (status, stdout, stderr)
        })
        .await;

        // Whatever ended the call, nothing the shell started may outlive it.
        process::kill_tree(&mut child, pgid).await;

        match finished {
            Ok((Ok(status), stdout, stderr)) => {
                let output = merge_output(&stdout, &stderr);
                let code = status.code().unwrap_or(-1);
                let metadata = ToolMetadata {
                    exit_code: Some(code),
                    ..Default::default()
                };
                if status.success() {
                    Ok(ToolResult::ok(output).with_metadata(metadata))
                } else {
                    warn!(command = %args.command, exit_code = code, "Command failed");
                    Ok(ToolResult::fail(
                        ToolFailure::ExitStatus,
                        format!("Command exited with code {code}"),
                    )
                    .with_output(output)
                    .with_metadata(metadata))
                }
            }
            Ok((Err(e), _, _)) => Err(ToolError::ExecutionFailed {
                tool_name: "bash".into(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(command = %args.command, timeout_secs = timeout.as_secs(), "Command timed out");
                Ok(ToolResult::fail(
                    ToolFailure::Timeout,
                    format!("Command timed out after {}s", timeout.as_secs()),
                ))
            }
        }
    }
}
