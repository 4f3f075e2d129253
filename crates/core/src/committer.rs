//! Version-control seam for self-modification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::error::ToolError;

/// What a successful commit produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit_id: String,
    #[serde(default)]
    pub diff_stat: String,
}

/// Records a set of already-written files as one change.
#[async_trait]
pub trait ChangeCommitter: Send + Sync {
    /// The repository the committer operates on.
    fn root(&self) -> PathBuf;

    /// Whether the working tree is clean enough to accept a new change.
    async fn can_commit(&self) -> bool;

    /// Commit `files` (relative to [`root`](Self::root)) with `description`.
    async fn commit(&self, description: &str, files: &[String]) -> std::result::Result<CommitInfo, ToolError>;
}
