//! Session snapshots and subsystem rebuilding.
//!
//! A hot reload serializes the running session into a [`SessionSnapshot`],
//! asks a [`RuntimeFactory`] for fresh subsystems (configuration, backend,
//! tool registry, agents, stores), and migrates the snapshot into a new
//! orchestrator. The same snapshot format backs `/save` and `/resume`.
//!
//! # Versions
//!
//! | Version | Shape |
//! |---------|-------|
//! | 1 | flat `messages` list plus `summary` |
//! | 2 | `buffer` split into `static_messages`, `dynamic`, `running_summary` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use twin_config::AppConfig;
use twin_core::agent::AgentSource;
use twin_core::error::ReloadError;
use twin_core::memory::{ContextStore, SnapshotStore};
use twin_core::message::{Message, Role};
use twin_core::provider::{GenerationOptions, Provider};
use twin_core::session::SessionState;
use twin_core::tool::ToolRegistry;
use twin_memory::{ContextLog, DirectoryAgents, FileSnapshotStore};
use twin_tools::GitCommitter;

use crate::context::MessageBuffer;

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(default)]
    pub generation: GenerationOptions,
    pub buffer: MessageBuffer,
}

impl SessionSnapshot {
    pub fn new(state: SessionState, generation: GenerationOptions, buffer: MessageBuffer) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            state,
            generation,
            buffer,
        }
    }

    pub fn to_value(&self) -> Result<Value, ReloadError> {
        serde_json::to_value(self).map_err(|e| ReloadError::Migration(e.to_string()))
    }
}

#[derive(Deserialize)]
struct SnapshotV1 {
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    state: SessionState,
    #[serde(default)]
    generation: GenerationOptions,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    summary: String,
}

impl From<SnapshotV1> for SessionSnapshot {
    fn from(v1: SnapshotV1) -> Self {
        let mut static_messages = v1.messages;
        let leading = static_messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        let dynamic = static_messages.split_off(leading);

        Self {
            version: SNAPSHOT_VERSION,
            saved_at: v1.saved_at.unwrap_or_else(Utc::now),
            state: v1.state,
            generation: v1.generation,
            buffer: MessageBuffer::from_parts(static_messages, dynamic, v1.summary),
        }
    }
}

/// Bring a stored snapshot of any known version up to the current one.
///
/// A missing `version` is read as version 1.
pub fn migrate(value: Value) -> Result<SessionSnapshot, ReloadError> {
    let version = match value.get("version") {
        None => 1,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ReloadError::Migration(format!("invalid version field: {v}")))?,
    };

    let snapshot = match version {
        1 => serde_json::from_value::<SnapshotV1>(value)
            .map(SessionSnapshot::from)
            .map_err(|e| ReloadError::Migration(format!("version 1: {e}")))?,
        SNAPSHOT_VERSION => serde_json::from_value::<SessionSnapshot>(value)
            .map_err(|e| ReloadError::Migration(format!("version {SNAPSHOT_VERSION}: {e}")))?,
        found => {
            return Err(ReloadError::UnsupportedVersion {
                found,
                supported: SNAPSHOT_VERSION,
            });
        }
    };

    debug!(from = version, to = SNAPSHOT_VERSION, session = %snapshot.state.session_id, "Snapshot migrated");
    Ok(snapshot)
}

/// The replaceable subsystems of a session.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<dyn AgentSource>,
    pub context_store: Arc<dyn ContextStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

/// Builds a [`Runtime`], at startup and again on every hot reload.
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn build(&self) -> Result<Runtime, ReloadError>;
}

/// Builds the real subsystems from the configuration file.
pub struct StandardRuntime {
    config_path: Option<PathBuf>,
    model_override: Option<String>,
}

impl StandardRuntime {
    /// `None` reads `~/.twin/config.toml` with environment overrides.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            model_override: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    fn load_config(&self) -> Result<AppConfig, ReloadError> {
        let mut config = match &self.config_path {
            Some(path) => AppConfig::load_from(path),
            None => AppConfig::load(),
        }
        .map_err(|e| ReloadError::Rebuild(e.to_string()))?;
        if let Some(model) = &self.model_override {
            config.default_model = config.resolve_model(model);
        }
        Ok(config)
    }

    pub fn from_config(config: AppConfig) -> Result<Runtime, ReloadError> {
        let provider = twin_providers::build_from_config(&config)
            .map_err(|e| ReloadError::Rebuild(e.to_string()))?;
        let committer = Arc::new(GitCommitter::new(&config.paths.self_dir));
        let tools = twin_tools::default_registry(&config, committer);
        let agents = DirectoryAgents::load(&config.paths.agents_dir);

        Ok(Runtime {
            provider,
            tools: Arc::new(tools),
            agents: Arc::new(agents),
            context_store: Arc::new(ContextLog::new(&config.paths.context_dir)),
            snapshots: Arc::new(FileSnapshotStore::new(&config.paths.sessions_dir)),
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl RuntimeFactory for StandardRuntime {
    async fn build(&self) -> Result<Runtime, ReloadError> {
        let config = self.load_config()?;
        Self::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_core::session::Mode;

    fn state() -> SessionState {
        SessionState::new(Mode::Work, "assistant", "qwen2.5-coder:7b")
    }

    #[test]
    fn current_version_passes_through() {
        let mut buffer = MessageBuffer::new(vec![Message::system("sys")]);
        buffer.append_turn(Message::user("q"), Message::assistant("a"));
        let snapshot = SessionSnapshot::new(state(), GenerationOptions::default(), buffer);

        let migrated = migrate(snapshot.to_value().unwrap()).unwrap();
        assert_eq!(migrated, snapshot);
    }

    #[test]
    fn version_one_splits_leading_system_messages() {
        let state = state();
        let value = json!({
            "version": 1,
            "state": state,
            "messages": [
                {"role": "system", "content": "prompt"},
                {"role": "system", "content": "env"},
                {"role": "user", "content": "hi"},
                {"role": "system", "content": "late note"},
                {"role": "assistant", "content": "hello"}
            ],
            "summary": "- earlier"
        });

        let snapshot = migrate(value).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.state, state);
        assert_eq!(snapshot.buffer.static_messages().len(), 2);
        assert_eq!(snapshot.buffer.dynamic().len(), 3);
        assert_eq!(snapshot.buffer.running_summary(), "- earlier");
        assert_eq!(snapshot.generation, GenerationOptions::default());
    }

    #[test]
    fn missing_version_is_version_one() {
        let snapshot = migrate(json!({"state": state(), "messages": []})).unwrap();
        assert!(snapshot.buffer.messages().is_empty());
    }

    #[test]
    fn newer_versions_are_refused() {
        let err = migrate(json!({"version": 9, "state": state()})).unwrap_err();
        assert!(matches!(
            err,
            ReloadError::UnsupportedVersion { found: 9, supported: SNAPSHOT_VERSION }
        ));
    }

    #[test]
    fn malformed_snapshots_are_migration_errors() {
        assert!(matches!(
            migrate(json!({"version": "two"})).unwrap_err(),
            ReloadError::Migration(_)
        ));
        assert!(matches!(
            migrate(json!({"version": 2, "state": {}})).unwrap_err(),
            ReloadError::Migration(_)
        ));
    }

    #[tokio::test]
    async fn standard_runtime_builds_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "default_model = \"fast\"\n[paths]\ncontext_dir = \"{0}/ctx\"\nsessions_dir = \"{0}/sessions\"\nagents_dir = \"{0}/agents\"\nself_dir = \"{0}\"\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let runtime = StandardRuntime::new(Some(path))
            .with_model(Some("smart".into()))
            .build()
            .await
            .unwrap();
        assert_eq!(runtime.tools.len(), 8);
        assert_eq!(runtime.config.default_model, "qwen2.5-coder:32b");
        assert_eq!(runtime.agents.get_or_fallback("anything").name, "assistant");
        assert!(runtime.snapshots.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_config_is_a_rebuild_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = [").unwrap();
        let err = StandardRuntime::new(Some(path)).build().await.err().unwrap();
        assert!(matches!(err, ReloadError::Rebuild(_)));
    }
}
