//! Domain event system: decoupled communication between bounded contexts.
//!
//! The orchestrator publishes events as a turn progresses; the CLI subscribes
//! to render tool progress without the orchestrator knowing about terminals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool is about to run
    ToolStarted {
        tool_name: String,
        args_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The backend produced a reply
    ResponseGenerated {
        session_id: String,
        model: String,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Older turns were folded into the running summary
    ContextCompacted {
        messages_folded: usize,
        chars_before: usize,
        chars_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool-call payload in a reply could not be parsed
    ParseWarning {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Session persisted to the context log and snapshot store
    SessionSaved {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Subsystems were rebuilt and state moved to a new orchestrator
    ReloadCompleted {
        session_id: String,
        tools: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
