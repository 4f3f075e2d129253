//! Persistence for twin: the per-directory context log, session snapshots,
//! and agent definitions loaded from disk.

pub mod agents;
pub mod context_log;
pub mod snapshots;

pub use agents::DirectoryAgents;
pub use context_log::ContextLog;
pub use snapshots::FileSnapshotStore;
