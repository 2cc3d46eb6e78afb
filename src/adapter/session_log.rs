//! Per-project session logs (Claude Code).
//!
//! Sessions live under `~/.claude/projects/<encoded-project-dir>/*.jsonl`,
//! one JSON record per line. There is no pre-generated summary, so the
//! record carries a basic title-plus-first-messages synopsis and the full
//! text for later extraction. The session UUID from the first message entry
//! is the stable identity; the encoded project directory name becomes the
//! project path. Warmup and empty files are dropped at discovery without a
//! full parse.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::adapter::{Adapter, SessionAccumulator, prefix};
use crate::config::Config;
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

pub struct SessionLogAdapter;

impl Adapter for SessionLogAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::ClaudeCode
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let entry = &config.sources.claude_code;
        let base = entry.path_or("~/.claude/projects");
        let min_lines = entry.min_lines.unwrap_or(10);
        let include_subagents = entry.include_subagents.unwrap_or(true);

        let mut records = Vec::new();
        let Ok(projects) = fs::read_dir(&base) else {
            return records;
        };

        for project in projects.filter_map(Result::ok) {
            let dir = project.path();
            if !dir.is_dir() {
                continue;
            }
            let Ok(files) = fs::read_dir(&dir) else {
                continue;
            };
            for file in files.filter_map(Result::ok) {
                let path = file.path();
                if path.extension().is_none_or(|e| e != "jsonl") {
                    continue;
                }

                let name = file.file_name().to_string_lossy().to_string();
                let is_agent = name.starts_with("agent-");
                if is_agent {
                    if !include_subagents {
                        continue;
                    }
                    if line_count(&path) < min_lines {
                        continue;
                    }
                }

                // Warmup and empty sessions are noise; a cheap pre-scan
                // avoids parsing them at all.
                match quick_summary(&path) {
                    Some(s) if !s.eq_ignore_ascii_case("warmup") => {}
                    _ => continue,
                }

                match parse(&path) {
                    Ok(record) => records.push(record),
                    Err(e) => eprintln!("warning: skipping {}: {e}", path.display()),
                }
            }
        }

        records
    }
}

/// Parse one session log into a record.
pub fn parse(path: &Path) -> Result<Record, MemoirError> {
    let file = fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    let mut acc = SessionAccumulator::default();
    for line in reader.lines() {
        let line = line.unwrap_or_default();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        acc.process_entry(&entry);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let session_id = acc.session_id.clone().unwrap_or_else(|| stem.clone());
    let title = acc.title(&stem);

    let project_path = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string());

    let full_text = acc.full_text();
    let content_hash = format!("{:x}", Sha256::digest(full_text.as_bytes()));
    let summary_text = acc.basic_summary(&title);
    let messages = acc.message_data();

    Ok(Record {
        source_id: format!("claude_code:{session_id}"),
        source_type: SourceType::ClaudeCode,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at: acc.created_at(),
        updated_at: acc.updated_at(),
        project_path,
        content_hash: Some(content_hash),
        is_subagent: acc.agent_id.is_some(),
        has_presummary: acc.summary_entry.is_some(),
        summary_text,
        full_text,
        files_touched: acc.files_touched(),
        metadata: acc.metadata(),
        messages,
    })
}

fn line_count(path: &Path) -> usize {
    fs::File::open(path)
        .map(|f| std::io::BufReader::new(f).lines().count())
        .unwrap_or(0)
}

/// Cheap pre-scan: the explicit summary if one exists, else a snippet of
/// the first non-meta user message. `None` means the file has neither and
/// is not worth indexing.
fn quick_summary(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let reader = std::io::BufReader::new(file);

    for line in reader.lines() {
        let line = line.unwrap_or_default();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        if entry.get("type").and_then(Value::as_str) == Some("summary") {
            if let Some(summary) = entry.get("summary").and_then(Value::as_str) {
                if !summary.is_empty() {
                    return Some(summary.to_string());
                }
            }
        }

        if entry.get("type").and_then(Value::as_str) == Some("user")
            && !entry.get("isMeta").and_then(Value::as_bool).unwrap_or(false)
        {
            let content = entry.get("message").and_then(|m| m.get("content"));
            match content {
                Some(Value::String(text)) if !text.is_empty() => {
                    return Some(prefix(text, 100).to_string());
                }
                Some(Value::Array(blocks)) => {
                    for block in blocks {
                        if block.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                return Some(prefix(text, 100).to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    None
}
