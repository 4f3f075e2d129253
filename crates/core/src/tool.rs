//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: read and
//! edit files, run shell commands, search, fetch pages, and rewrite its own
//! source. The set of tool kinds is closed; each kind parses its loosely typed
//! model arguments into its own argument struct.

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};
use crate::error::ToolError;

/// Arguments as the model wrote them.
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Every tool kind the registry can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Write,
    Edit,
    Bash,
    Glob,
    Grep,
    WebFetch,
    ImproveSelf,
}

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        Self::Read,
        Self::Write,
        Self::Edit,
        Self::Bash,
        Self::Glob,
        Self::Grep,
        Self::WebFetch,
        Self::ImproveSelf,
    ];

    /// The name the model uses to invoke this tool.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Bash => "bash",
            Self::Glob => "glob",
            Self::Grep => "grep",
            Self::WebFetch => "web_fetch",
            Self::ImproveSelf => "improve_self",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Only self-modification may ask the orchestrator to hot-reload.
    pub fn may_request_restart(&self) -> bool {
        matches!(self, Self::ImproveSelf)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Introspection record used to document a tool in the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Argument name → type hint, in declaration order
    pub argument_schema: Vec<(String, String)>,
}

/// A request to execute a tool, as parsed from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// Why a tool result failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailure {
    /// Exceeded its wall-clock limit
    Timeout,
    /// Process finished with a non-zero status
    ExitStatus,
    /// Target (file, string, URL) does not exist
    NotFound,
    /// Target matched more than once
    Ambiguous,
    /// File content is not text
    Binary,
    InvalidArguments,
    UnknownTool,
    Execution,
}

/// Aggregate counts for a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub other: usize,
    pub total_bytes: u64,
}

/// Named, optional side-channel data attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Set only by `improve_self`; asks the orchestrator to hot-reload
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ToolFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Where fetched content came from ("proxy" or "direct")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: ToolMetadata::default(),
        }
    }

    pub fn fail(failure: ToolFailure, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metadata: ToolMetadata {
                failure: Some(failure),
                ..Default::default()
            },
        }
    }

    /// Replace the metadata, keeping any failure kind already recorded.
    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        let failure = self.metadata.failure.take();
        self.metadata = metadata;
        if self.metadata.failure.is_none() {
            self.metadata.failure = failure;
        }
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// The text fed back to the model for this result.
    pub fn text(&self) -> String {
        let output = self.output.as_deref().filter(|o| !o.is_empty());
        match (self.success, output, self.error.as_deref()) {
            (true, Some(out), _) => out.to_string(),
            (false, Some(out), Some(err)) => format!("{err}\n{out}"),
            (_, Some(out), None) => out.to_string(),
            (_, None, Some(err)) => err.to_string(),
            (_, None, None) => String::new(),
        }
    }

    fn from_error(err: ToolError) -> Self {
        let failure = match &err {
            ToolError::NotFound(_) => ToolFailure::UnknownTool,
            ToolError::InvalidArguments(_) => ToolFailure::InvalidArguments,
            ToolError::Timeout { .. } => ToolFailure::Timeout,
            ToolError::ExecutionFailed { .. } | ToolError::PermissionDenied { .. } => {
                ToolFailure::Execution
            }
        };
        Self::fail(failure, err.to_string())
    }
}

/// Deserialize model arguments into a tool's typed argument struct.
pub fn parse_args<T: DeserializeOwned>(args: ToolArgs) -> std::result::Result<T, ToolError> {
    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// The core Tool trait.
///
/// Each built-in tool implements this trait and is registered in the
/// ToolRegistry under its kind.
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// A description of what this tool does (shown to the model).
    fn description(&self) -> &str;

    /// Argument name → type hint, in declaration order.
    fn argument_schema(&self) -> Vec<(&'static str, &'static str)>;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: ToolArgs) -> std::result::Result<ToolResult, ToolError>;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            argument_schema: self
                .argument_schema()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// A registry of available tools, keyed by kind, in registration order.
///
/// `execute` never fails: errors and panics inside a tool body come back as
/// a failed [`ToolResult`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<(ToolKind, Box<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later registration of the same kind replaces the
    /// earlier one in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let kind = tool.kind();
        match self.tools.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = tool,
            None => self.tools.push((kind, tool)),
        }
    }

    /// Get a tool by the name the model used.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        let kind = ToolKind::from_name(name)?;
        self.tools
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| t.as_ref())
    }

    /// Specs of all registered tools, in registration order.
    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|(_, t)| t.spec()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|(k, _)| k.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.tool_name) else {
            return ToolResult::fail(
                ToolFailure::UnknownTool,
                format!("Unknown tool: {}", call.tool_name),
            );
        };

        debug!(tool = %call.tool_name, "Dispatching tool call");
        let outcome = AssertUnwindSafe(tool.execute(call.args.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(mut result)) => {
                if result.metadata.requires_restart && !tool.kind().may_request_restart() {
                    warn!(tool = %call.tool_name, "Ignoring restart request from tool that may not request one");
                    result.metadata.requires_restart = false;
                }
                result
            }
            Ok(Err(err)) => ToolResult::from_error(err),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!(tool = %call.tool_name, reason = %reason, "Tool panicked");
                ToolResult::fail(
                    ToolFailure::Execution,
                    format!("Tool {} crashed: {reason}", call.tool_name),
                )
            }
        }
    }
}
