//! File-based snapshot store: one pretty-printed JSON document per session.
//!
//! Storage location: `<sessions_dir>/<session_id>.json`
//!
//! The store is agnostic about the snapshot schema beyond the few fields it
//! reads for listings; callers own versioning and migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};
use twin_core::error::StoreError;
use twin_core::memory::{SnapshotInfo, SnapshotStore};

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::NotFound(format!("invalid session id '{session_id}'")));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn len_at(value: &Value, pointer: &str) -> usize {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

/// Listing fields from a snapshot of any known version.
fn describe(session_id: &str, value: &Value) -> SnapshotInfo {
    let saved_at = value
        .get("saved_at")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let messages = len_at(value, "/buffer/static_messages")
        + len_at(value, "/buffer/dynamic")
        + len_at(value, "/messages");

    SnapshotInfo {
        session_id: session_id.to_string(),
        saved_at,
        model: str_at(value, "/state/model").to_string(),
        agent: str_at(value, "/state/agent").to_string(),
        messages,
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, session_id: &str, snapshot: &Value) -> Result<(), StoreError> {
        let path = self.path_for(session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize snapshot: {e}")))?;

        // Atomic replace
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Snapshot saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Value, StoreError> {
        let path = self.path_for(session_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    async fn list(&self) -> Result<Vec<SnapshotInfo>, StoreError> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match self.load(&id).await {
                Ok(value) => infos.push(describe(&id, &value)),
                Err(e) => warn!(session = %id, error = %e, "Skipping unreadable snapshot"),
            }
        }

        infos.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(infos)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
