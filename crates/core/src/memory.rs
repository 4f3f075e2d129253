//! Persistence traits: where sessions go when they end.
//!
//! Two stores exist:
//! - A per-directory **context log**: append-only human-readable records of
//!   past sessions, used to seed the next session's system prompt.
//! - A **snapshot store**: full serialized session state (buffer included)
//!   for save / resume and for state transfer across hot reloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::StoreError;
use crate::session::SessionRecord;

/// A past session as read back from the context log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedSession {
    /// The entry heading, e.g. "2026-10-17 14:05 - Session 1a2b3c4d"
    pub heading: String,
    /// The markdown body under the heading
    pub content: String,
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Append one record to the log for `cwd`. Never rewrites existing entries.
    async fn append(&self, cwd: &Path, record: &SessionRecord) -> std::result::Result<(), StoreError>;

    /// The most recent `count` sessions for `cwd`, oldest first.
    async fn recent(&self, cwd: &Path, count: usize) -> std::result::Result<Vec<LoggedSession>, StoreError>;

    /// A short human-readable overview of the log for `cwd`.
    async fn summary(&self, cwd: &Path) -> std::result::Result<String, StoreError>;
}

/// Listing entry for a saved snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub model: String,
    pub agent: String,
    pub messages: usize,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write (or overwrite) the snapshot of a session.
    async fn save(&self, session_id: &str, snapshot: &serde_json::Value) -> std::result::Result<(), StoreError>;

    /// Raw snapshot JSON; callers migrate it to the current version.
    async fn load(&self, session_id: &str) -> std::result::Result<serde_json::Value, StoreError>;

    /// All saved sessions, newest first.
    async fn list(&self) -> std::result::Result<Vec<SnapshotInfo>, StoreError>;

    async fn delete(&self, session_id: &str) -> std::result::Result<(), StoreError>;
}
