//! Agent definitions loaded from a directory tree.
//!
//! ```text
//! agents/
//!   technical-lead/
//!     MASTER_AGENT.md   system prompt
//!     CLAUDE.md         metadata; "Keywords" / "Activation" sections
//! ```

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};
use twin_core::agent::{AgentDefinition, AgentSource};

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("Invalid quoted pattern"));
static BACKTICKED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("Invalid backtick pattern"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[•\-*]\s*(.+)$").expect("Invalid bullet pattern"));

pub struct DirectoryAgents {
    dir: PathBuf,
    agents: Vec<AgentDefinition>,
}

impl DirectoryAgents {
    /// Load every agent under `dir`. A missing directory yields no agents.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut agents = Vec::new();

        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    if let Some(agent) = load_agent(&path) {
                        agents.push(agent);
                    }
                }
            }
            Err(e) => debug!(dir = %dir.display(), error = %e, "No agent directory"),
        }
        agents.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(dir = %dir.display(), count = agents.len(), "Agents loaded");
        Self { dir, agents }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn load_agent(path: &Path) -> Option<AgentDefinition> {
    let name = path.file_name()?.to_str()?.to_string();
    let master_prompt = match std::fs::read_to_string(path.join("MASTER_AGENT.md")) {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!(agent = %name, error = %e, "Unreadable MASTER_AGENT.md");
            String::new()
        }
    };
    let keywords = std::fs::read_to_string(path.join("CLAUDE.md"))
        .map(|c| extract_keywords(&c))
        .unwrap_or_default();

    if master_prompt.trim().is_empty() && keywords.is_empty() {
        return None;
    }
    Some(AgentDefinition {
        name,
        master_prompt,
        keywords,
    })
}

/// `(heading, body)` for every markdown section.
fn sections(content: &str) -> Vec<(&str, String)> {
    let mut out: Vec<(&str, String)> = Vec::new();
    for line in content.lines() {
        if line.starts_with('#') {
            out.push((line.trim_start_matches('#').trim(), String::new()));
        } else if let Some((_, body)) = out.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    out
}

/// Activation keywords from a CLAUDE.md.
pub fn extract_keywords(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for (heading, body) in sections(content) {
        let heading = heading.to_lowercase();
        if heading.starts_with("keyword") {
            found.extend(QUOTED.captures_iter(&body).map(|c| c[1].to_string()));
            found.extend(BACKTICKED.captures_iter(&body).map(|c| c[1].to_string()));
            // Plain bullets; decorated ones were captured above
            found.extend(
                BULLET
                    .captures_iter(&body)
                    .map(|c| c[1].to_string())
                    .filter(|b| !b.contains('"') && !b.contains('`')),
            );
        } else if heading.starts_with("activation") {
            found.extend(QUOTED.captures_iter(&body).map(|c| c[1].to_string()));
            found.extend(BACKTICKED.captures_iter(&body).map(|c| c[1].to_string()));
        }
    }

    let mut keywords: Vec<String> = Vec::new();
    for k in found {
        let k = k.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'').trim();
        if !k.is_empty() && !keywords.iter().any(|seen| seen.eq_ignore_ascii_case(k)) {
            keywords.push(k.to_string());
        }
    }
    keywords
}

impl AgentSource for DirectoryAgents {
    fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .or_else(|| (name == "assistant").then(AgentDefinition::fallback))
    }

    fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAUDE_MD: &str = r#"# Technical Lead

## Keywords
- `refactor`
- "deploy"
- code review

## Activation
Activate when the user says "ship it" or mentions `pull request`.

## Style
- terse
"#;

    #[test]
    fn keywords_come_from_keyword_and_activation_sections() {
        let keywords = extract_keywords(CLAUDE_MD);
        assert_eq!(
            keywords,
            vec!["deploy", "refactor", "code review", "ship it", "pull request"]
        );
        assert!(!keywords.contains(&"terse".to_string()));
    }

    #[test]
    fn loads_agents_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let lead = dir.path().join("technical-lead");
        std::fs::create_dir(&lead).unwrap();
        std::fs::write(lead.join("MASTER_AGENT.md"), "You are a technical lead.").unwrap();
        std::fs::write(lead.join("CLAUDE.md"), CLAUDE_MD).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("stray.md"), "not an agent").unwrap();

        let agents = DirectoryAgents::load(dir.path());
        assert_eq!(agents.names(), vec!["technical-lead"]);
        let lead = agents.get("technical-lead").unwrap();
        assert_eq!(lead.master_prompt, "You are a technical lead.");
        assert_eq!(
            agents.best_match("please refactor this").unwrap().name,
            "technical-lead"
        );
    }

    #[test]
    fn missing_directory_still_has_assistant() {
        let agents = DirectoryAgents::load("/nonexistent/twin/agents");
        assert!(agents.is_empty());
        assert_eq!(agents.get_or_fallback("technical-lead").name, "assistant");
        assert!(agents.get("assistant").is_some());
    }
}
