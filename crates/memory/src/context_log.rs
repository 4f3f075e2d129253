//! Per-directory context log: append-only markdown records of past sessions.
//!
//! One file per working directory, named after the first 8 hex digits of
//! the SHA-256 of the directory path:
//!
//! ```text
//! # Repository: /home/me/project
//!
//! ---
//!
//! ## 2026-10-17 14:05 - Session 1a2b3c4d [TWIN] [WORK MODE]
//!
//! ### Planning Discussion
//! ...
//! ---
//! ```
//!
//! Entries are only ever appended. Reading parses the `## <date>` headings
//! back into [`LoggedSession`]s.

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use twin_core::error::StoreError;
use twin_core::memory::{ContextStore, LoggedSession};
use twin_core::session::SessionRecord;

static ENTRY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^## (\d{4}-\d{2}-\d{2} \d{2}:\d{2}) - (.*)$").expect("Invalid heading pattern")
});

pub struct ContextLog {
    dir: PathBuf,
}

impl ContextLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `context-<sha256(cwd)[..8]>.md`
    pub fn file_name(cwd: &Path) -> String {
        let digest = Sha256::digest(cwd.to_string_lossy().as_bytes());
        let hash = hex::encode(digest);
        format!("context-{}.md", &hash[..8])
    }

    pub fn path_for(&self, cwd: &Path) -> PathBuf {
        self.dir.join(Self::file_name(cwd))
    }

    async fn read(&self, cwd: &Path) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(cwd)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the log for `cwd`. Returns whether one existed.
    pub async fn clear(&self, cwd: &Path) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(cwd)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render one record as a markdown entry.
pub fn render_entry(record: &SessionRecord) -> String {
    let when = record.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let mode = record.mode.as_str().to_uppercase();
    let mut sections = Vec::new();

    if !record.planning_discussion.is_empty() {
        sections.push(format!("### Planning Discussion\n{}\n", record.planning_discussion.trim()));
    }
    sections.push(format!("### Agent Active\n{}\n", record.agent));
    if !record.decisions.is_empty() {
        sections.push(format!("### Decisions Made\n{}\n", bullets(&record.decisions)));
    }
    if !record.next_steps.is_empty() {
        sections.push(format!("### Next Steps\n{}\n", bullets(&record.next_steps)));
    }
    if !record.files_discussed.is_empty() {
        sections.push(format!("### Files Discussed\n{}\n", bullets(&record.files_discussed)));
    }
    if !record.running_summary.is_empty() {
        sections.push(format!("### Conversation Summary\n{}\n", record.running_summary.trim()));
    }

    format!(
        "## {when} - Session {} [TWIN] [{mode} MODE]\n\n{}\n---\n\n",
        record.session_id,
        sections.join("\n")
    )
}

/// Split a log into its session entries, oldest first.
pub fn parse_entries(content: &str) -> Vec<LoggedSession> {
    let headings: Vec<_> = ENTRY_HEADING.captures_iter(content).collect();
    headings
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| {
            let whole = caps.get(0)?;
            let end = headings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(content.len());
            let body = content[whole.end()..end]
                .trim()
                .trim_end_matches("---")
                .trim();
            Some(LoggedSession {
                heading: format!("{} - {}", &caps[1], caps[2].trim()),
                content: body.to_string(),
            })
        })
        .collect()
}

/// Body of the `### <title>` section of an entry, if present.
fn section<'a>(content: &'a str, title: &str) -> Option<&'a str> {
    let marker = format!("### {title}\n");
    let start = content.find(&marker)? + marker.len();
    let rest = &content[start..];
    let end = rest.find("\n###").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

#[async_trait]
impl ContextStore for ContextLog {
    async fn append(&self, cwd: &Path, record: &SessionRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(cwd);
        let is_new = !tokio::fs::try_exists(&path).await.unwrap_or(false);

        let mut entry = String::new();
        if is_new {
            entry.push_str(&format!("# Repository: {}\n\n---\n\n", cwd.display()));
        }
        entry.push_str(&render_entry(record));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %path.display(), session = %record.session_id, "Context log appended");
        Ok(())
    }

    async fn recent(&self, cwd: &Path, count: usize) -> Result<Vec<LoggedSession>, StoreError> {
        let Some(content) = self.read(cwd).await? else {
            return Ok(Vec::new());
        };
        let mut entries = parse_entries(&content);
        let skip = entries.len().saturating_sub(count);
        Ok(entries.split_off(skip))
    }

    async fn summary(&self, cwd: &Path) -> Result<String, StoreError> {
        let Some(content) = self.read(cwd).await? else {
            return Ok("No previous context found".into());
        };
        let entries = parse_entries(&content);
        let Some(last) = entries.last() else {
            return Ok("Context file exists but no sessions found".into());
        };

        let mut lines = vec![
            format!("Found {} previous session(s)", entries.len()),
            format!("Last session: {}", last.heading),
        ];
        if let Some(topic) = section(&last.content, "Planning Discussion")
            .and_then(|p| p.lines().next())
            .filter(|l| !l.is_empty())
        {
            lines.push(format!("Topic: {}", topic.chars().take(100).collect::<String>()));
        }
        if let Some(steps) = section(&last.content, "Next Steps") {
            lines.push(format!("Next steps:\n{steps}"));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use twin_core::session::Mode;

    fn record(id: &str, planning: &str) -> SessionRecord {
        SessionRecord {
            timestamp: Utc::now(),
            mode: Mode::Work,
            agent: "technical-lead".into(),
            session_id: id.into(),
            planning_discussion: planning.into(),
            decisions: vec!["Use tokio".into()],
            next_steps: vec!["Write tests".into()],
            files_discussed: vec!["src/main.rs".into()],
            running_summary: String::new(),
        }
    }

    #[test]
    fn file_name_is_stable_hash_prefix() {
        let a = ContextLog::file_name(Path::new("/home/me/project"));
        let b = ContextLog::file_name(Path::new("/home/me/project"));
        let c = ContextLog::file_name(Path::new("/home/me/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("context-") && a.ends_with(".md"));
        assert_eq!(a.len(), "context-".len() + 8 + ".md".len());
    }

    #[test]
    fn entry_has_heading_and_sections() {
        let entry = render_entry(&record("1a2b3c4d", "Discussed caching"));
        assert!(entry.starts_with("## "));
        assert!(entry.contains(" - Session 1a2b3c4d [TWIN] [WORK MODE]\n"));
        assert!(entry.contains("### Decisions Made\n- Use tokio\n"));
        assert!(entry.contains("### Files Discussed\n- src/main.rs\n"));
        assert!(entry.trim_end().ends_with("---"));
    }

    #[tokio::test]
    async fn append_never_rewrites_earlier_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = ContextLog::new(dir.path());
        let cwd = Path::new("/work/repo");

        log.append(cwd, &record("aaaaaaaa", "First topic")).await.unwrap();
        let first = std::fs::read_to_string(log.path_for(cwd)).unwrap();
        assert!(first.starts_with("# Repository: /work/repo\n"));

        log.append(cwd, &record("bbbbbbbb", "Second topic")).await.unwrap();
        let second = std::fs::read_to_string(log.path_for(cwd)).unwrap();
        assert!(second.starts_with(&first));
        assert_eq!(second.matches("# Repository:").count(), 1);
    }

    #[tokio::test]
    async fn recent_returns_last_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ContextLog::new(dir.path());
        let cwd = Path::new("/work/repo");
        for id in ["11111111", "22222222", "33333333"] {
            log.append(cwd, &record(id, &format!("Topic {id}"))).await.unwrap();
        }

        let recent = log.recent(cwd, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].heading.contains("22222222"));
        assert!(recent[1].heading.contains("33333333"));
        assert!(recent[1].content.contains("Topic 33333333"));
        assert!(!recent[1].content.ends_with("---"));
    }

    #[tokio::test]
    async fn summary_reports_latest_topic() {
        let dir = tempfile::tempdir().unwrap();
        let log = ContextLog::new(dir.path());
        let cwd = Path::new("/work/repo");
        assert_eq!(log.summary(cwd).await.unwrap(), "No previous context found");

        log.append(cwd, &record("aaaaaaaa", "Caching layer\nmore detail")).await.unwrap();
        let summary = log.summary(cwd).await.unwrap();
        assert!(summary.contains("Found 1 previous session(s)"));
        assert!(summary.contains("Topic: Caching layer"));
        assert!(summary.contains("- Write tests"));
    }

    #[tokio::test]
    async fn clear_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = ContextLog::new(dir.path());
        let cwd = Path::new("/work/repo");
        log.append(cwd, &record("aaaaaaaa", "x")).await.unwrap();
        assert!(log.clear(cwd).await.unwrap());
        assert!(!log.clear(cwd).await.unwrap());
        assert!(log.recent(cwd, 3).await.unwrap().is_empty());
    }
}
