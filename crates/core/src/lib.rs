//! # twin Core
//!
//! Domain types, traits, and error definitions for the twin agentic
//! command loop. This crate owns no stores or clients; it defines the domain
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the model backend, the
//! context log, the snapshot store, the agent source, and the committer used
//! for self-modification. Implementations live in their respective crates,
//! so the orchestrator can be driven entirely by test doubles.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod session;
pub mod memory;
pub mod agent;
pub mod committer;
pub mod process;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use provider::{GenerationOptions, Provider, ProviderRequest, ProviderResponse};
pub use tool::{Tool, ToolArgs, ToolCall, ToolFailure, ToolKind, ToolMetadata, ToolRegistry, ToolResult, ToolSpec};
pub use session::{Mode, SessionData, SessionMetrics, SessionRecord, SessionState};
pub use memory::{ContextStore, LoggedSession, SnapshotInfo, SnapshotStore};
pub use agent::{AgentDefinition, AgentSource, StaticAgents};
pub use committer::{ChangeCommitter, CommitInfo};
pub use event::{DomainEvent, EventBus};
