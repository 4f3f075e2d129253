//! Deterministic extractive summaries.
//!
//! No model is involved: text is split into sentences, each sentence becomes
//! a bullet, and the oldest bullets are dropped until the total fits.

use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)|\n+").expect("Invalid sentence pattern"));

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Sentences of `text`, trimmed, with list markers and blanks removed.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        push_sentence(&mut out, &text[start..m.end()]);
        start = m.end();
    }
    push_sentence(&mut out, &text[start..]);
    out
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let s = raw
        .trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '#' || c == '>')
        .trim();
    if s.chars().any(char::is_alphanumeric) && out.last().is_none_or(|prev| prev != s) {
        out.push(s.to_string());
    }
}

/// Bullet summary of `text`.
///
/// Each bullet is `- <sentence>`, capped at `bullet_max` characters. The
/// joined summary is at most `total_max` characters; when it would be
/// longer, the most recent bullets are kept.
pub fn summarize(text: &str, bullet_max: usize, total_max: usize) -> String {
    let bullets: Vec<String> = sentences(text)
        .iter()
        .map(|s| truncate_chars(&format!("- {s}"), bullet_max))
        .collect();

    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0;
    for bullet in bullets.iter().rev() {
        let cost = bullet.chars().count() + usize::from(!kept.is_empty());
        if used + cost > total_max {
            break;
        }
        used += cost;
        kept.push(bullet);
    }
    kept.reverse();
    kept.join("\n")
}
