//! Read tool: numbered file contents or a directory listing.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use twin_core::error::ToolError;
use twin_core::tool::{
    ListingStats, Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args,
};

#[derive(Debug, Deserialize)]
struct ReadArgs {
    #[serde(alias = "path")]
    file_path: String,
    /// 1-based first line
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool {
    max_lines: usize,
    max_entries: usize,
}

impl ReadTool {
    pub fn new(max_lines: usize, max_entries: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            max_entries: max_entries.max(1),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<ToolResult, ToolError> {
        let mut reader = tokio::fs::read_dir(path).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "read".into(),
            reason: format!("Failed to list {}: {e}", path.display()),
        })?;

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(meta) = tokio::fs::symlink_metadata(entry.path()).await else {
                continue;
            };
            let kind = if meta.is_symlink() {
                EntryKind::Link
            } else if meta.is_dir() {
                EntryKind::Dir
            } else if meta.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            let target = if kind == EntryKind::Link {
                tokio::fs::read_link(entry.path())
                    .await
                    .ok()
                    .map(|t| t.display().to_string())
            } else {
                None
            };
            entries.push(Entry {
                name,
                kind,
                size: meta.len(),
                target,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut stats = ListingStats::default();
        for e in &entries {
            match e.kind {
                EntryKind::File => {
                    stats.files += 1;
                    stats.total_bytes += e.size;
                }
                EntryKind::Dir => stats.dirs += 1,
                EntryKind::Link => stats.symlinks += 1,
                EntryKind::Other => stats.other += 1,
            }
        }

        let mut output = format!("Directory: {} ({} entries)\n", path.display(), entries.len());
        for e in entries.iter().take(self.max_entries) {
            output.push_str(&format!("{:<5} {:>10}  {}", e.kind.label(), e.size, e.name));
            if e.kind == EntryKind::Dir {
                output.push('/');
            }
            if let Some(target) = &e.target {
                output.push_str(&format!(" -> {target}"));
            }
            if e.name.starts_with('.') {
                output.push_str(" (hidden)");
            }
            output.push('\n');
        }
        let truncated = entries.len() > self.max_entries;
        if truncated {
            output.push_str(&format!(
                "... [truncated: showing {} of {} entries]\n",
                self.max_entries,
                entries.len()
            ));
        }
        output.push_str(&format!(
            "{} files, {} directories, {} symlinks, {} other, {} bytes total",
            stats.files, stats.dirs, stats.symlinks, stats.other, stats.total_bytes
        ));

        Ok(ToolResult::ok(output).with_metadata(ToolMetadata {
            file_path: Some(path.display().to_string()),
            count: Some(entries.len()),
            truncated,
            listing: Some(stats),
            ..Default::default()
        }))
    }

    fn render_lines(&self, path: &Path, text: &str, offset: Option<usize>, limit: Option<usize>) -> ToolResult {
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start = offset.unwrap_or(1).max(1) - 1;
        let limit = limit.unwrap_or(self.max_lines).clamp(1, self.max_lines);
        let end = (start + limit).min(total);

        let mut output = String::new();
        if total == 0 {
            output.push_str("(empty file)");
        } else if start >= total {
            output.push_str(&format!("(offset {} is past the end of the file: {total} lines)", start + 1));
        } else {
            for (i, line) in lines[start..end].iter().enumerate() {
                output.push_str(&format!("{:>6}\t{}\n", start + i + 1, line));
            }
        }

        let truncated = start < total && end < total;
        if truncated {
            output.push_str(&format!(
                "... [truncated: showing lines {}-{} of {}]",
                start + 1,
                end,
                total
            ));
        }

        ToolResult::ok(output).with_metadata(ToolMetadata {
            file_path: Some(path.display().to_string()),
            total_lines: Some(total),
            returned_lines: Some(end.saturating_sub(start)),
            truncated,
            ..Default::default()
        })
    }
}

impl Default for ReadTool {
    fn default() -> Self {
        Self::new(2000, 200)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Link,
    Other,
}

impl EntryKind {
    fn label(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Link => "link",
            Self::Other => "other",
        }
    }
}

struct Entry {
    name: String,
    kind: EntryKind,
    size: u64,
    target: Option<String>,
}

/// Text decoders, tried in order.
const DECODERS: [fn(&[u8]) -> Option<String>; 3] = [decode_utf8, decode_utf16_le, decode_utf16_be];

fn decode_utf8(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes.to_vec()).ok()
}

fn decode_utf16(bytes: &[u8], to_u16: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_u16([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

fn decode_utf16_le(bytes: &[u8]) -> Option<String> {
    decode_utf16(bytes.strip_prefix(&[0xFF, 0xFE])?, u16::from_le_bytes)
}

fn decode_utf16_be(bytes: &[u8]) -> Option<String> {
    decode_utf16(bytes.strip_prefix(&[0xFE, 0xFF])?, u16::from_be_bytes)
}

/// Best-effort file type from magic bytes.
fn sniff_type(bytes: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "PNG image"),
        (b"\xFF\xD8\xFF", "JPEG image"),
        (b"GIF8", "GIF image"),
        (b"%PDF", "PDF document"),
        (b"PK\x03\x04", "ZIP archive"),
        (b"\x1F\x8B", "gzip archive"),
        (b"\x7FELF", "ELF executable"),
        (b"\0asm", "WebAssembly module"),
        (b"\xCF\xFA\xED\xFE", "Mach-O executable"),
    ];
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, name)| *name)
        .unwrap_or("binary data")
}

#[async_trait]
impl Tool for ReadTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn description(&self) -> &str {
        "Read a text file with line numbers, or list a directory. Use offset (1-based line) and limit to page through large files."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("file_path", "string"),
            ("offset", "integer (optional)"),
            ("limit", "integer (optional)"),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: ReadArgs = parse_args(args)?;
        let path = Path::new(&args.file_path);

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::fail(
                    ToolFailure::NotFound,
                    format!("File not found: {}", args.file_path),
                ));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "read".into(),
                    reason: e.to_string(),
                });
            }
        };

        if meta.is_dir() {
            return self.list_directory(path).await;
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "read".into(),
            reason: e.to_string(),
        })?;

        match DECODERS.iter().find_map(|decode| decode(&bytes)) {
            Some(text) => Ok(self.render_lines(path, &text, args.offset, args.limit)),
            None => {
                let file_type = sniff_type(&bytes);
                Ok(ToolResult::fail(
                    ToolFailure::Binary,
                    format!("Cannot read binary file: {} ({file_type}, {} bytes)", args.file_path, bytes.len()),
                )
                .with_metadata(ToolMetadata {
                    file_path: Some(args.file_path.clone()),
                    file_type: Some(file_type.to_string()),
                    ..Default::default()
                }))
            }
        }
    }
}
