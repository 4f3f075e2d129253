//! Session state: everything about one interactive run that outlives a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Behavioral mode of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Work,
    #[default]
    Personal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "work" => Ok(Self::Work),
            "personal" => Ok(Self::Personal),
            other => Err(format!("unknown mode '{other}' (expected work or personal)")),
        }
    }
}

/// Free-form notes collected over the session for the context log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub planning_discussion: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub files_discussed: Vec<String>,
}

impl SessionData {
    /// Record a file once, keeping first-seen order.
    pub fn note_file(&mut self, path: &str) {
        if !self.files_discussed.iter().any(|f| f == path) {
            self.files_discussed.push(path.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.planning_discussion.is_empty()
            && self.decisions.is_empty()
            && self.next_steps.is_empty()
            && self.files_discussed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub query_count: u64,
    /// Seconds spent waiting on the backend
    pub total_latency_secs: f64,
    pub start_time: DateTime<Utc>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            query_count: 0,
            total_latency_secs: 0.0,
            start_time: Utc::now(),
        }
    }
}

impl SessionMetrics {
    pub fn average_latency_secs(&self) -> f64 {
        if self.query_count == 0 {
            0.0
        } else {
            self.total_latency_secs / self.query_count as f64
        }
    }
}

/// Mutable metadata of a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub mode: Mode,
    pub agent: String,
    pub model: String,
    #[serde(default)]
    pub session_data: SessionData,
    #[serde(default)]
    pub metrics: SessionMetrics,
}

impl SessionState {
    pub fn new(mode: Mode, agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_id: new_session_id(),
            mode,
            agent: agent.into(),
            model: model.into(),
            session_data: SessionData::default(),
            metrics: SessionMetrics::default(),
        }
    }

    /// Snapshot the state into the record handed to the context log.
    pub fn to_record(&self, running_summary: &str) -> SessionRecord {
        SessionRecord {
            timestamp: Utc::now(),
            mode: self.mode,
            agent: self.agent.clone(),
            session_id: self.session_id.clone(),
            planning_discussion: self.session_data.planning_discussion.clone(),
            decisions: self.session_data.decisions.clone(),
            next_steps: self.session_data.next_steps.clone(),
            files_discussed: self.session_data.files_discussed.clone(),
            running_summary: running_summary.to_string(),
        }
    }
}

/// Short, human-typeable session id.
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// One persisted entry of the per-directory context log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
    pub agent: String,
    pub session_id: String,
    pub planning_discussion: String,
    pub decisions: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub files_discussed: Vec<String>,
    #[serde(default)]
    pub running_summary: String,
}
