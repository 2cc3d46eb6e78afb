//! Cloud conversations (claude.ai).
//!
//! Conversations are synced to `~/.claude/claude-ai/cache/conversations/`
//! as one JSON file per conversation. They arrive with a pre-generated
//! summary, so the record is a presummary and the extraction pipeline is
//! never needed. Identity is the platform UUID; there is no filesystem
//! artifact worth pruning, so the record carries no path.

use std::fs;
use std::path::Path;

use serde_json::{Value, json};

use crate::adapter::{Adapter, parse_timestamp};
use crate::config::Config;
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

pub struct ConversationAdapter;

impl Adapter for ConversationAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::ClaudeAi
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let entry = &config.sources.claude_ai;
        let base = entry.path_or("~/.claude/claude-ai/cache/conversations");

        let mut records = Vec::new();
        let Ok(files) = fs::read_dir(&base) else {
            return records;
        };

        for file in files.filter_map(Result::ok) {
            let path = file.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match parse(&path) {
                Ok(record) => records.push(record),
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

    let uuid = data
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| MemoirError::Other(format!("{}: missing uuid", path.display())))?;
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Untitled");
    let summary = data.get("summary").and_then(Value::as_str).unwrap_or("");

    let created_at = data
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(chrono::Utc::now);
    let updated_at = data
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(created_at);

    let messages = data
        .get("chat_messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Voice conversations mark the first human message.
    let input_mode = messages
        .iter()
        .find(|m| m.get("sender").and_then(Value::as_str) == Some("human"))
        .and_then(|m| m.get("input_mode"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let full_text = full_text(&messages);
    let has_presummary = !summary.is_empty();

    Ok(Record {
        source_id: format!("claude_ai:{uuid}"),
        source_type: SourceType::ClaudeAi,
        title: name.to_string(),
        // Virtual source: the cache file is disposable, identity lives in
        // the platform. No path means the prune walk never touches it.
        path: None,
        created_at,
        updated_at,
        project_path: None,
        content_hash: Some(updated_at.to_rfc3339()),
        is_subagent: false,
        has_presummary,
        summary_text: if has_presummary {
            summary.to_string()
        } else {
            name.to_string()
        },
        full_text,
        files_touched: Vec::new(),
        metadata: json!({
            "model": data.get("model").and_then(Value::as_str),
            "input_mode": input_mode,
            "platform": data.get("platform").and_then(Value::as_str).unwrap_or("CLAUDE_AI"),
        }),
        messages: Vec::new(),
    })
}

/// Text blocks across all turns; message text may sit in a `text` field or
/// in content blocks depending on export vintage.
fn full_text(messages: &[Value]) -> String {
    let mut texts = Vec::new();
    for msg in messages {
        if let Some(text) = msg.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
        if let Some(blocks) = msg.get("content").and_then(Value::as_array) {
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            texts.push(text.to_string());
                        }
                    }
                }
            }
        }
    }
    texts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        serde_json::to_string(&json!({
            "uuid": "11111111-2222-3333-4444-555555555555",
            "name": "Planning the migration",
            "summary": "Discussed a phased database migration with rollback points.",
            "model": "claude-sonnet-4-20250514",
            "created_at": "2026-01-05T08:00:00Z",
            "updated_at": "2026-01-05T09:30:00Z",
            "platform": "CLAUDE_AI",
            "chat_messages": [
                {"sender": "human", "input_mode": "voice", "text": "how should we stage this?"},
                {"sender": "assistant", "content": [
                    {"type": "text", "text": "start with a shadow table"}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_conversation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("11111111-2222-3333-4444-555555555555.json");
        fs::write(&path, fixture()).unwrap();

        let record = parse(&path).unwrap();
        assert_eq!(
            record.source_id,
            "claude_ai:11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(record.title, "Planning the migration");
        assert!(record.has_presummary);
        assert!(record.summary_text.starts_with("Discussed a phased"));
        assert!(record.path.is_none());
        assert_eq!(record.metadata["input_mode"], "voice");
        assert_eq!(
            record.full_text,
            "how should we stage this?\n\nstart with a shadow table"
        );
        // updated_at doubles as the change key.
        assert!(record.content_hash.as_deref().unwrap().starts_with("2026-01-05T09:30:00"));
    }

    #[test]
    fn test_parse_without_summary_uses_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.json");
        fs::write(
            &path,
            serde_json::to_string(&json!({
                "uuid": "abc",
                "name": "Untitled chat",
                "created_at": "2026-01-05T08:00:00Z",
                "updated_at": "2026-01-05T08:00:00Z",
                "chat_messages": []
            }))
            .unwrap(),
        )
        .unwrap();

        let record = parse(&path).unwrap();
        assert!(!record.has_presummary);
        assert_eq!(record.summary_text, "Untitled chat");
    }

    #[test]
    fn test_missing_uuid_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "{}").unwrap();
        assert!(parse(&path).is_err());
    }

    #[test]
    fn test_discover_reads_json_only() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.json"), fixture()).unwrap();
        fs::write(tmp.path().join("b.txt"), "not json").unwrap();

        let mut config = Config::default();
        config.sources.claude_ai.path = Some(tmp.path().to_string_lossy().to_string());

        let records = ConversationAdapter.discover(&config);
        assert_eq!(records.len(), 1);
    }
}
