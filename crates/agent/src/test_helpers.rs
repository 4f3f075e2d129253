//! Shared test helpers for orchestrator tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use twin_config::AppConfig;
use twin_core::agent::{AgentDefinition, StaticAgents};
use twin_core::committer::{ChangeCommitter, CommitInfo};
use twin_core::error::{ProviderError, ReloadError, ToolError};
use twin_core::message::Message;
use twin_core::provider::{Provider, ProviderRequest, ProviderResponse};
use twin_core::tool::ToolRegistry;
use twin_memory::{ContextLog, FileSnapshotStore};

use crate::reload::{Runtime, RuntimeFactory};

/// One scripted backend behaviour.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(ProviderError),
    /// Never answers; only cancellation ends the call
    Hang,
}

/// A mock provider that plays back a script and records every request.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
    models: Vec<String>,
}

impl SequentialMockProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            models: Vec::new(),
        }
    }

    pub fn replies(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Scripted::Reply(t.to_string())).collect())
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(ProviderResponse {
                message: Message::assistant(text),
                usage: None,
                model,
            }),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout("hang".into()))
            }
            None => panic!("SequentialMockProvider: script exhausted"),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }
}

pub fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.paths.context_dir = dir.join("context");
    config.paths.sessions_dir = dir.join("sessions");
    config.paths.agents_dir = dir.join("agents");
    config.paths.self_dir = dir.to_path_buf();
    config
}

pub fn test_agents() -> StaticAgents {
    StaticAgents::new(vec![AgentDefinition {
        name: "technical-lead".into(),
        master_prompt: "You are a technical lead.".into(),
        keywords: vec!["architecture".into(), "refactor".into()],
    }])
}

pub fn test_runtime(dir: &Path, provider: Arc<dyn Provider>, tools: ToolRegistry) -> Runtime {
    let config = test_config(dir);
    Runtime {
        provider,
        tools: Arc::new(tools),
        agents: Arc::new(test_agents()),
        context_store: Arc::new(ContextLog::new(&config.paths.context_dir)),
        snapshots: Arc::new(FileSnapshotStore::new(&config.paths.sessions_dir)),
        config: Arc::new(config),
    }
}

/// Hands out clones of one runtime, or fails every build.
pub struct FixedFactory {
    runtime: Runtime,
    fail: bool,
    builds: AtomicUsize,
}

impl FixedFactory {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            fail: false,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn failing(runtime: Runtime) -> Self {
        Self {
            fail: true,
            ..Self::new(runtime)
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeFactory for FixedFactory {
    async fn build(&self) -> Result<Runtime, ReloadError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ReloadError::Rebuild("config file is invalid".into()));
        }
        Ok(self.runtime.clone())
    }
}

/// Accepts every commit without touching git.
pub struct FakeCommitter {
    root: PathBuf,
    commits: Mutex<Vec<String>>,
}

impl FakeCommitter {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            commits: Mutex::new(Vec::new()),
        })
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeCommitter for FakeCommitter {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    async fn can_commit(&self) -> bool {
        true
    }

    async fn commit(&self, description: &str, _files: &[String]) -> Result<CommitInfo, ToolError> {
        self.commits.lock().unwrap().push(description.to_string());
        Ok(CommitInfo {
            commit_id: "0123456789abcdef".into(),
            diff_stat: " 1 file changed".into(),
        })
    }
}
