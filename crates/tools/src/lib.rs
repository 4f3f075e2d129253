//! Built-in tool implementations for twin.
//!
//! Tools give the agent the ability to act on the machine it runs on:
//! read, write and edit files, run shell commands, search by name and
//! content, fetch web pages, and rewrite twin's own source.

pub mod bash;
pub mod edit;
pub mod git;
pub mod glob;
pub mod grep;
pub mod improve_self;
pub mod read;
pub mod web_fetch;
pub mod write;

use std::sync::Arc;
use std::time::Duration;
use twin_config::AppConfig;
use twin_core::committer::ChangeCommitter;
use twin_core::tool::ToolRegistry;

pub use git::GitCommitter;

/// Create a registry with every built-in tool, configured from `config`.
///
/// Registration order is the order tools are documented to the model.
pub fn default_registry(config: &AppConfig, committer: Arc<dyn ChangeCommitter>) -> ToolRegistry {
    let tools = &config.tools;
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(read::ReadTool::new(
        tools.read_max_lines,
        tools.dir_max_entries,
    )));
    registry.register(Box::new(write::WriteTool));
    registry.register(Box::new(edit::EditTool));
    registry.register(Box::new(bash::BashTool::new(Duration::from_secs(
        tools.bash_timeout_secs,
    ))));
    registry.register(Box::new(glob::GlobTool));
    registry.register(Box::new(grep::GrepTool));
    registry.register(Box::new(web_fetch::WebFetchTool::new(
        tools.web_fetch_proxy.clone(),
        tools.web_fetch_max_chars,
        Duration::from_secs(tools.web_fetch_timeout_secs),
    )));
    registry.register(Box::new(improve_self::ImproveSelfTool::new(committer)));
    registry
}
