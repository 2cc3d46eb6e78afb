//! Cloud sessions (Claude Code on the web).
//!
//! Synced to `~/.claude/claude-ai/cache/sessions/session_*.json` as one
//! aggregate JSON file per session with a `loglines` array. The entry
//! schema matches the local session logs, so parsing shares
//! [`SessionAccumulator`]; the differences are the filename-stem identity
//! and the `cwd`/`gitBranch` context captured from the loglines.

use std::fs;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::adapter::{Adapter, SessionAccumulator, prefix};
use crate::config::Config;
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

pub struct CloudSessionAdapter;

impl Adapter for CloudSessionAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::CloudSession
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let entry = &config.sources.cloud_sessions;
        let base = entry.path_or("~/.claude/claude-ai/cache/sessions");

        let mut records = Vec::new();
        let Ok(files) = fs::read_dir(&base) else {
            return records;
        };

        for file in files.filter_map(Result::ok) {
            let path = file.path();
            let name = file.file_name().to_string_lossy().to_string();
            if !name.starts_with("session_") || path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match parse(&path) {
                Ok(record) => {
                    // Warmup sessions carry nothing worth indexing.
                    if record.summary_text.eq_ignore_ascii_case("warmup") {
                        continue;
                    }
                    records.push(record);
                }
                Err(e) => eprintln!("warning: skipping {}: {e}", path.display()),
            }
        }

        records
    }
}

pub fn parse(path: &Path) -> Result<Record, MemoirError> {
    let content = fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&content).map_err(|source| MemoirError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut acc = SessionAccumulator::default();
    if let Some(loglines) = data.get("loglines").and_then(Value::as_array) {
        for entry in loglines {
            acc.process_entry(entry);
        }
    }

    let session_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let title = acc.title(&session_id);

    let full_text = acc.full_text();
    let content_hash = format!("{:x}", Sha256::digest(full_text.as_bytes()));

    // Prefer the explicit summary; fall back to a snippet of the text.
    let summary_text = match &acc.summary_entry {
        Some(summary) => summary.clone(),
        None => prefix(&full_text, 500).to_string(),
    };

    let project_path = acc.cwd.clone();
    let has_presummary = acc.summary_entry.is_some();
    let messages = acc.message_data();

    Ok(Record {
        source_id: format!("cloud_session:{session_id}"),
        source_type: SourceType::CloudSession,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at: acc.created_at(),
        updated_at: acc.updated_at(),
        project_path,
        content_hash: Some(content_hash),
        is_subagent: false,
        has_presummary,
        summary_text,
        full_text,
        files_touched: acc.files_touched(),
        metadata: acc.metadata(),
        messages,
    })
}
