//! Ollama subprocess provider.
//!
//! Runs `ollama run <model>` once per request with the rendered conversation
//! on stdin. The child is polled at a fixed interval so a cancellation can
//! terminate it: SIGTERM first, then a kill once the grace period expires.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use twin_core::error::ProviderError;
use twin_core::message::{Message, Role};
use twin_core::process;
use twin_core::provider::*;

pub struct OllamaCliProvider {
    binary: PathBuf,
    poll_interval: Duration,
    grace: Duration,
}

impl OllamaCliProvider {
    pub fn new(binary: impl Into<PathBuf>, poll_interval: Duration, grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            poll_interval,
            grace,
        }
    }

    /// Flatten a conversation into a single prompt for `ollama run`.
    fn render_prompt(messages: &[Message]) -> String {
        let mut prompt = String::new();
        for m in messages {
            let label = match m.role {
                Role::System => {
                    prompt.push_str(m.content.trim());
                    prompt.push_str("\n\n");
                    continue;
                }
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(m.content.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Assistant:");
        prompt
    }

    async fn run(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg(&request.model)
            .arg("--keepalive")
            .arg(&request.options.keep_alive)
            .arg("--nowordwrap")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::Unavailable(format!(
                    "{} not found. Is Ollama installed?",
                    self.binary.display()
                ))
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })?;

        let prompt = Self::render_prompt(&request.messages);
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "Failed to write prompt to backend");
            }
            // Dropping stdin sends EOF.
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_all(stderr));

        debug!(model = %request.model, prompt_chars = prompt.len(), "Backend process started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    process::kill(&mut child).await;
                    return Err(ProviderError::Unavailable(e.to_string()));
                }
            }
            if cancel.is_cancelled() {
                info!(grace_ms = self.grace.as_millis() as u64, "Cancelling backend call");
                process::terminate(&mut child, self.grace).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ProviderError::Cancelled);
            }
            ticker.tick().await;
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            if stderr.contains("not found") {
                return Err(ProviderError::ModelNotFound(request.model));
            }
            return Err(ProviderError::ApiError {
                status_code: u16::try_from(code).unwrap_or(u16::MAX),
                message: stderr.trim().to_string(),
            });
        }

        let content = stdout.trim().to_string();
        if content.is_empty() {
            return Err(ProviderError::Decode("backend produced no output".into()));
        }

        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model: request.model,
        })
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl twin_core::Provider for OllamaCliProvider {
    fn name(&self) -> &str {
        "ollama-cli"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.run(request, CancellationToken::new()).await
    }

    async fn complete_cancellable(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.run(request, cancel).await
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let output = Command::new(&self.binary)
            .arg("list")
            .output()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(ProviderError::ApiError {
                status_code: u16::try_from(output.status.code().unwrap_or(-1)).unwrap_or(u16::MAX),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // First line is the NAME / ID / SIZE header.
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .map(String::from)
            .collect())
    }
}
