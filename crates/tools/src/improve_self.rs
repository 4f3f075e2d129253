//! Self-improvement tool: rewrite files of twin's own source tree.
//!
//! Every change is logged to `IMPROVEMENTS.md` and committed as one unit.
//! A successful result sets `requires_restart`, which asks the orchestrator
//! to hot-reload.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use twin_core::committer::ChangeCommitter;
use twin_core::error::ToolError;
use twin_core::tool::{Tool, ToolArgs, ToolKind, ToolMetadata, ToolResult, parse_args};

pub const IMPROVEMENTS_LOG: &str = "IMPROVEMENTS.md";

const LOG_HEADER: &str = "# Twin Self-Improvements Log

Autonomous changes twin made to its own source. Each entry records when,
what, why (5 Whys), and which files changed.

---
";

#[derive(Debug, Deserialize)]
struct ImproveSelfArgs {
    description: String,
    #[serde(default)]
    reasoning: String,
    files: BTreeMap<String, String>,
}

pub struct ImproveSelfTool {
    committer: Arc<dyn ChangeCommitter>,
}

impl ImproveSelfTool {
    pub fn new(committer: Arc<dyn ChangeCommitter>) -> Self {
        Self { committer }
    }
}

fn invalid(msg: String) -> ToolError {
    ToolError::InvalidArguments(msg)
}

/// Relative, and never climbing out of the root.
fn check_relative(path: &str) -> Result<(), ToolError> {
    let p = Path::new(path);
    if path.is_empty() || p.is_absolute() {
        return Err(invalid(format!("Path must be relative to the twin root: {path}")));
    }
    if p.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(invalid(format!("Path may not leave the twin root: {path}")));
    }
    Ok(())
}

fn log_entry(description: &str, reasoning: &str, files: &[String]) -> String {
    let now = chrono::Local::now();
    let listed: Vec<String> = files.iter().map(|f| format!("- {f}")).collect();
    format!(
        "\n## {} - {description}\n\n**Timestamp:** {}\n\n**Reasoning (5 Whys):**\n{reasoning}\n\n**Files Changed:**\n{}\n\n---\n",
        now.format("%Y%m%d-%H%M%S"),
        now.to_rfc3339(),
        listed.join("\n"),
    )
}

async fn append_log(root: &Path, entry: &str) -> std::io::Result<()> {
    let path = root.join(IMPROVEMENTS_LOG);
    let fresh = !tokio::fs::try_exists(&path).await.unwrap_or(false);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    if fresh {
        file.write_all(LOG_HEADER.as_bytes()).await?;
    }
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}

#[async_trait]
impl Tool for ImproveSelfTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ImproveSelf
    }

    fn description(&self) -> &str {
        "Modify twin's own source code. Give a description, the 5 Whys reasoning, and a map of relative file paths to their complete new contents. The change is logged, committed, and twin reloads itself."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("description", "string"),
            ("reasoning", "string"),
            ("files", "object (path -> full content)"),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: ImproveSelfArgs = parse_args(args)?;
        if args.files.is_empty() {
            return Err(invalid("files must name at least one file".into()));
        }
        for path in args.files.keys() {
            check_relative(path)?;
        }

        if !self.committer.can_commit().await {
            return Err(ToolError::PermissionDenied {
                tool_name: "improve_self".into(),
                reason: "repository has uncommitted changes or is not under version control".into(),
            });
        }

        let root = self.committer.root();
        for (rel, content) in &args.files {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "improve_self".into(),
                    reason: format!("Failed to create {}: {e}", parent.display()),
                })?;
            }
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "improve_self".into(),
                    reason: format!("Failed to write {rel}: {e}"),
                })?;
        }

        let files: Vec<String> = args.files.keys().cloned().collect();
        append_log(&root, &log_entry(&args.description, &args.reasoning, &files))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "improve_self".into(),
                reason: format!("Failed to update {IMPROVEMENTS_LOG}: {e}"),
            })?;

        let mut staged = files.clone();
        staged.push(IMPROVEMENTS_LOG.to_string());
        let commit = self
            .committer
            .commit(&format!("[SELF-IMPROVEMENT] {}", args.description), &staged)
            .await?;

        let short: String = commit.commit_id.chars().take(7).collect();
        info!(commit = %short, files = files.len(), "Self-improvement committed");

        let mut output = format!(
            "Improvement applied and committed as {short}: {}\nFiles: {}",
            args.description,
            files.join(", ")
        );
        if !commit.diff_stat.is_empty() {
            output.push('\n');
            output.push_str(&commit.diff_stat);
        }
        output.push_str("\nTwin will reload to pick up the change.");

        Ok(ToolResult::ok(output).with_metadata(ToolMetadata {
            requires_restart: true,
            commit: Some(commit.commit_id),
            file_path: files.first().cloned(),
            count: Some(files.len()),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use twin_core::committer::CommitInfo;

    struct FakeCommitter {
        root: PathBuf,
        clean: bool,
        commits: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeCommitter {
        fn new(root: &Path, clean: bool) -> Arc<Self> {
            Arc::new(Self {
                root: root.to_path_buf(),
                clean,
                commits: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChangeCommitter for FakeCommitter {
        fn root(&self) -> PathBuf {
            self.root.clone()
        }
        async fn can_commit(&self) -> bool {
            self.clean
        }
        async fn commit(&self, description: &str, files: &[String]) -> Result<CommitInfo, ToolError> {
            self.commits
                .lock()
                .unwrap()
                .push((description.to_string(), files.to_vec()));
            Ok(CommitInfo {
                commit_id: "abcdef1234567890".into(),
                diff_stat: " 1 file changed".into(),
            })
        }
    }

    fn args(value: serde_json::Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn writes_logs_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let committer = FakeCommitter::new(dir.path(), true);
        let tool = ImproveSelfTool::new(committer.clone());

        let result = tool
            .execute(args(json!({
                "description": "Tighten prompt",
                "reasoning": "Why 1: replies were long",
                "files": {"prompts/system.md": "be brief"}
            })))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.metadata.requires_restart);
        assert_eq!(result.metadata.commit.as_deref(), Some("abcdef1234567890"));
        assert!(result.output.unwrap().contains("abcdef1"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("prompts/system.md")).unwrap(),
            "be brief"
        );

        let log = std::fs::read_to_string(dir.path().join(IMPROVEMENTS_LOG)).unwrap();
        assert!(log.starts_with("# Twin Self-Improvements Log"));
        assert!(log.contains("- Tighten prompt"));
        assert!(log.contains("Why 1: replies were long"));

        let commits = committer.commits.lock().unwrap();
        assert_eq!(commits[0].0, "[SELF-IMPROVEMENT] Tighten prompt");
        assert_eq!(commits[0].1, vec!["prompts/system.md", IMPROVEMENTS_LOG]);
    }

    #[tokio::test]
    async fn dirty_tree_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ImproveSelfTool::new(FakeCommitter::new(dir.path(), false));
        let err = tool
            .execute(args(json!({"description": "x", "reasoning": "y", "files": {"a.txt": "b"}})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ImproveSelfTool::new(FakeCommitter::new(dir.path(), true));
        for bad in ["../outside.txt", "/etc/passwd", "a/../../b"] {
            let err = tool
                .execute(args(json!({"description": "x", "reasoning": "y", "files": {bad: "z"}})))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)), "{bad} accepted");
        }
    }
}
