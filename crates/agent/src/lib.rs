//! The twin session loop.
//!
//! One session runs as a state machine over operator input:
//!
//! 1. **Receive** a line from the operator; slash commands are handled locally
//! 2. **Compact** the conversation when it outgrows the context window
//! 3. **Send** static prompt + summary + history to the backend
//! 4. **Parse** the reply for tool calls, execute them in order, and feed the
//!    results back until the model answers without calls
//! 5. **Reload** in place when a tool asks for it, keeping the session
//!
//! The backend call can be interrupted at any time without touching the
//! conversation.

pub mod cancel;
pub mod context;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod reload;

#[cfg(test)]
mod test_helpers;

pub use cancel::{Interrupt, KeyListener};
pub use context::{CompactionPolicy, MessageBuffer};
pub use orchestrator::{
    Command, FailureStage, Orchestrator, ReloadNotice, Reply, SessionPhase, ToolReport,
    TurnOutcome,
};
pub use parser::{ParseOutcome, parse, strip_tool_calls};
pub use reload::{Runtime, RuntimeFactory, SessionSnapshot, StandardRuntime, migrate};
