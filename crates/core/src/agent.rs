//! Agent definitions: the persona the session speaks as.

use serde::{Deserialize, Serialize};

/// A named persona with its system prompt and activation keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub master_prompt: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AgentDefinition {
    /// The generic persona used when no agent definitions are installed.
    pub fn fallback() -> Self {
        Self {
            name: "assistant".into(),
            master_prompt: "You are a helpful AI assistant for planning, architecture and coding discussions."
                .into(),
            keywords: Vec::new(),
        }
    }

    /// Number of this agent's keywords found in `text` (case-insensitive).
    pub fn keyword_score(&self, text: &str) -> usize {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
            .count()
    }
}

/// Where agent definitions come from.
pub trait AgentSource: Send + Sync {
    /// Look up an agent by name.
    fn get(&self, name: &str) -> Option<AgentDefinition>;

    /// Names of all known agents, sorted.
    fn names(&self) -> Vec<String>;

    /// The agent whose keywords best match `text`, if any match at all.
    fn best_match(&self, text: &str) -> Option<AgentDefinition> {
        self.names()
            .iter()
            .filter_map(|n| self.get(n))
            .map(|a| (a.keyword_score(text), a))
            .filter(|(score, _)| *score > 0)
            .fold(None, |best: Option<(usize, AgentDefinition)>, (score, agent)| match best {
                Some((top, _)) if top >= score => best,
                _ => Some((score, agent)),
            })
            .map(|(_, agent)| agent)
    }

    /// Resolve a name, falling back to the generic assistant.
    fn get_or_fallback(&self, name: &str) -> AgentDefinition {
        self.get(name).unwrap_or_else(AgentDefinition::fallback)
    }
}

/// A fixed in-memory set of agents.
#[derive(Debug, Clone, Default)]
pub struct StaticAgents {
    agents: Vec<AgentDefinition>,
}

impl StaticAgents {
    pub fn new(agents: Vec<AgentDefinition>) -> Self {
        Self { agents }
    }
}

impl AgentSource for StaticAgents {
    fn get(&self, name: &str) -> Option<AgentDefinition> {
        if name == "assistant" && !self.agents.iter().any(|a| a.name == name) {
            return Some(AgentDefinition::fallback());
        }
        self.agents.iter().find(|a| a.name == name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.iter().map(|a| a.name.clone()).collect();
        names.sort();
        names
    }
}
