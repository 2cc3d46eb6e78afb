//! Agent threads (Amp).
//!
//! Amp stores each thread as `~/.local/share/amp/threads/T-{uuid}.json`:
//! a messages array with the usual content block types, plus thread title,
//! agent mode, activated skills, project trees, and handoff-chain
//! relationships. There are no pre-generated summaries, so the title
//! stands in as the summary until an extraction runs.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use crate::adapter::{Adapter, parse_timestamp};
use crate::config::Config;
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

pub struct AmpAdapter;

impl Adapter for AmpAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Amp
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let entry = &config.sources.amp;
        let base = entry.path_or("~/.local/share/amp/threads");

        let mut records = Vec::new();
        let Ok(files) = fs::read_dir(&base) else {
            return records;
        };

        let mut paths: Vec<_> = files
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().map(|n| n.to_string_lossy().to_string());
                // Skip write-ahead temp files.
                name.as_deref()
                    .is_some_and(|n| n.starts_with("T-") && n.ends_with(".json"))
            })
            .collect();
        paths.sort();

        for path in paths {
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

    let thread_id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| MemoirError::Other(format!("{}: missing thread id", path.display())))?;
    let title = data
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Untitled")
        .to_string();

    let created_ms = data.get("created").and_then(Value::as_i64).unwrap_or(0);
    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .unwrap_or_else(Utc::now);

    let messages = data
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // New messages move the last assistant usage timestamp.
    let updated_at = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .and_then(|m| m.get("usage"))
        .and_then(|u| u.get("timestamp"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(created_at);

    let trees = data
        .pointer("/env/initial/trees")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let project_path = trees
        .first()
        .and_then(|t| t.get("uri"))
        .and_then(Value::as_str)
        .and_then(|uri| uri.strip_prefix("file://"))
        .map(str::to_string);

    let skills: Vec<String> = data
        .get("activatedSkills")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let relationships: Vec<Value> = data
        .get("relationships")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    let thread = r.get("threadID").and_then(Value::as_str)?;
                    Some(json!({
                        "thread_id": thread,
                        "type": r.get("type").and_then(Value::as_str).unwrap_or("handoff"),
                        "role": r.get("role").and_then(Value::as_str).unwrap_or("unknown"),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = json!({
        "agent_mode": data.get("agentMode").and_then(Value::as_str).unwrap_or("smart"),
    });
    if !skills.is_empty() {
        metadata["skills"] = json!(skills);
    }
    if !trees.is_empty() {
        let names: Vec<&str> = trees
            .iter()
            .filter_map(|t| t.get("displayName").and_then(Value::as_str))
            .collect();
        metadata["trees"] = json!(names);
    }
    if !relationships.is_empty() {
        metadata["relationships"] = json!(relationships);
    }

    let full_text = full_text(&messages);

    Ok(Record {
        source_id: format!("amp:{thread_id}"),
        source_type: SourceType::Amp,
        title: title.clone(),
        path: Some(path.to_string_lossy().to_string()),
        created_at,
        updated_at,
        project_path,
        content_hash: Some(updated_at.to_rfc3339()),
        is_subagent: false,
        has_presummary: false,
        // Placeholder until an extraction produces a real summary.
        summary_text: title,
        full_text,
        files_touched: Vec::new(),
        metadata,
        messages: Vec::new(),
    })
}

/// Human-readable thread text: user and assistant text blocks with speaker
/// prefixes; thinking, tool_use, and tool_result blocks are skipped.
fn full_text(messages: &[Value]) -> String {
    let mut parts = Vec::new();
    for msg in messages {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
        if role != "user" && role != "assistant" {
            continue;
        }
        let prefix = if role == "user" { "Human" } else { "Assistant" };

        if let Some(blocks) = msg.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block {
                    Value::Object(_) => {
                        if block.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                let text = text.trim();
                                if !text.is_empty() {
                                    parts.push(format!("{prefix}: {text}"));
                                }
                            }
                        }
                    }
                    // Some user messages carry bare string content.
                    Value::String(text) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            parts.push(format!("Human: {text}"));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    parts.join("\n\n")
}
