//! The conversation buffer and its compactor.
//!
//! A buffer has three parts:
//!
//! | Part | Contents | Changes |
//! |------|----------|---------|
//! | static | system prompt, environment snapshot | replaced on agent/mode switch, cleared only on reset |
//! | summary | bullets folded from older turns | rewritten by compaction |
//! | dynamic | user/assistant turns | appended; a prefix is folded into the summary |
//!
//! What the backend sees is always `static ++ [summary] ++ dynamic`.

use serde::{Deserialize, Serialize};
use tracing::debug;
use twin_config::ContextConfig;
use twin_core::message::Message;

use super::summarize::summarize;
use super::token::{budget_chars, estimate_size};

const SUMMARY_HEADER: &str = "Summary of the earlier conversation:";

/// When and how aggressively to compact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    /// Backend context window in tokens
    pub context_window: u32,
    pub chars_per_token: f64,
    /// Fraction of the budget at which compaction starts
    pub threshold: f64,
    /// Trailing dynamic messages never folded
    pub protect_recent: usize,
    pub bullet_max_chars: usize,
    pub summary_max_chars: usize,
}

impl CompactionPolicy {
    pub fn from_config(config: &ContextConfig, context_window: u32) -> Self {
        Self {
            context_window,
            chars_per_token: config.chars_per_token,
            threshold: config.threshold,
            protect_recent: config.protect_recent,
            bullet_max_chars: config.bullet_max_chars,
            summary_max_chars: config.summary_max_chars,
        }
    }

    pub fn budget_chars(&self) -> usize {
        budget_chars(self.context_window, self.chars_per_token)
    }

    pub fn threshold_chars(&self) -> usize {
        (self.budget_chars() as f64 * self.threshold) as usize
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default(), 8192)
    }
}

/// What a compaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub messages_folded: usize,
    pub chars_before: usize,
    pub chars_after: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBuffer {
    static_messages: Vec<Message>,
    #[serde(default)]
    dynamic: Vec<Message>,
    #[serde(default)]
    running_summary: String,
}

fn summary_message(summary: &str) -> Option<Message> {
    (!summary.is_empty()).then(|| Message::system(format!("{SUMMARY_HEADER}\n{summary}")))
}

fn summary_size(summary: &str) -> usize {
    summary_message(summary).map(|m| m.char_len()).unwrap_or(0)
}

impl MessageBuffer {
    pub fn new(static_messages: Vec<Message>) -> Self {
        Self {
            static_messages,
            dynamic: Vec::new(),
            running_summary: String::new(),
        }
    }

    pub fn from_parts(
        static_messages: Vec<Message>,
        dynamic: Vec<Message>,
        running_summary: impl Into<String>,
    ) -> Self {
        Self {
            static_messages,
            dynamic,
            running_summary: running_summary.into(),
        }
    }

    pub fn static_messages(&self) -> &[Message] {
        &self.static_messages
    }

    pub fn dynamic(&self) -> &[Message] {
        &self.dynamic
    }

    pub fn running_summary(&self) -> &str {
        &self.running_summary
    }

    pub fn push_static(&mut self, message: Message) {
        self.static_messages.push(message);
    }

    /// Swap the static prefix, e.g. after an agent or mode change.
    pub fn replace_static(&mut self, static_messages: Vec<Message>) {
        self.static_messages = static_messages;
    }

    /// Commit one exchange.
    pub fn append_turn(&mut self, user: Message, assistant: Message) {
        self.dynamic.push(user);
        self.dynamic.push(assistant);
    }

    /// Forget the conversation, keeping the static prefix.
    pub fn clear_history(&mut self) {
        self.dynamic.clear();
        self.running_summary.clear();
    }

    /// Start over with a new static prefix.
    pub fn reset(&mut self, static_messages: Vec<Message>) {
        self.static_messages = static_messages;
        self.clear_history();
    }

    /// Everything the backend should see, in order.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.static_messages.len() + self.dynamic.len() + 1);
        out.extend(self.static_messages.iter().cloned());
        out.extend(summary_message(&self.running_summary));
        out.extend(self.dynamic.iter().cloned());
        out
    }

    /// Character size of [`messages`](Self::messages).
    pub fn size(&self) -> usize {
        estimate_size(&self.static_messages)
            + summary_size(&self.running_summary)
            + estimate_size(&self.dynamic)
    }

    /// Fold old turns into the running summary when over the threshold.
    ///
    /// The last `protect_recent` dynamic messages and the static prefix are
    /// never touched. The result is only applied when the new summary plus
    /// the kept tail is strictly smaller than what it replaces.
    pub fn maybe_compact(&mut self, policy: &CompactionPolicy) -> Option<CompactionReport> {
        let before = self.size();
        if before <= policy.threshold_chars() {
            return None;
        }
        if self.dynamic.len() <= policy.protect_recent {
            debug!(
                size = before,
                dynamic = self.dynamic.len(),
                "Over threshold but nothing old enough to fold"
            );
            return None;
        }

        let split = self.dynamic.len() - policy.protect_recent;
        let mut source = self.running_summary.clone();
        for message in &self.dynamic[..split] {
            if !source.is_empty() {
                source.push('\n');
            }
            source.push_str(&message.content);
        }
        let summary = summarize(&source, policy.bullet_max_chars, policy.summary_max_chars);

        let old_cost = summary_size(&self.running_summary) + estimate_size(&self.dynamic);
        let new_cost = summary_size(&summary) + estimate_size(&self.dynamic[split..]);
        if new_cost >= old_cost {
            debug!(old_cost, new_cost, "Compaction would not shrink the buffer; skipped");
            return None;
        }

        self.dynamic.drain(..split);
        self.running_summary = summary;

        let report = CompactionReport {
            messages_folded: split,
            chars_before: before,
            chars_after: self.size(),
        };
        debug!(
            folded = report.messages_folded,
            before = report.chars_before,
            after = report.chars_after,
            "Context compacted"
        );
        Some(report)
    }
}
