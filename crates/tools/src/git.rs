//! Git-backed [`ChangeCommitter`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use twin_core::committer::{ChangeCommitter, CommitInfo};
use twin_core::error::ToolError;

use crate::improve_self::IMPROVEMENTS_LOG;

pub struct GitCommitter {
    root: PathBuf,
}

impl GitCommitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<String, ToolError> {
        run_git(&self.root, args).await
    }
}

async fn run_git(root: &Path, args: &[&str]) -> Result<String, ToolError> {
    debug!(?args, root = %root.display(), "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "improve_self".into(),
            reason: format!("Failed to run git: {e}"),
        })?;
    if !output.status.success() {
        return Err(ToolError::ExecutionFailed {
            tool_name: "improve_self".into(),
            reason: format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Only the improvements log may be dirty.
fn tree_is_clean(porcelain: &str) -> bool {
    porcelain
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|l| l.contains(IMPROVEMENTS_LOG))
}

#[async_trait]
impl ChangeCommitter for GitCommitter {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    async fn can_commit(&self) -> bool {
        if self.git(&["rev-parse", "--git-dir"]).await.is_err() {
            return false;
        }
        match self.git(&["status", "--porcelain"]).await {
            Ok(status) => tree_is_clean(&status),
            Err(_) => false,
        }
    }

    async fn commit(&self, description: &str, files: &[String]) -> Result<CommitInfo, ToolError> {
        let mut add = vec!["add", "--"];
        add.extend(files.iter().map(String::as_str));
        self.git(&add).await?;

        let listed: Vec<String> = files.iter().map(|f| format!("- {f}")).collect();
        let message = format!(
            "{description}\n\nAutonomous improvement by twin\n\nFiles changed:\n{}\n\nSee {IMPROVEMENTS_LOG} for full reasoning.",
            listed.join("\n")
        );
        self.git(&["commit", "-m", &message]).await?;

        let commit_id = self.git(&["rev-parse", "HEAD"]).await?.trim().to_string();
        let diff_stat = self
            .git(&["show", "--stat", "--format=", "HEAD"])
            .await
            .unwrap_or_default()
            .trim_end()
            .to_string();

        Ok(CommitInfo { commit_id, diff_stat })
    }
}
