//! Arc work tracker.
//!
//! Indexes items from `.arc/items.jsonl` files. Arc uses GTD vocabulary:
//! outcomes (desired results) and actions (next steps toward them), each
//! with distilled why/what/done briefs. There is no registry, so discovery
//! is glob-only. Deleted items are skipped.

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};

use crate::adapter::{Adapter, expand_glob, parse_loose_datetime};
use crate::config::Config;
use crate::record::{Record, SourceType};

pub struct ArcAdapter;

impl Adapter for ArcAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Arc
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let defaults = vec!["~/Repos/*/.arc/items.jsonl".to_string()];
        let patterns = config.sources.arc.paths.clone().unwrap_or(defaults);

        let mut records = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for pattern in &patterns {
            for jsonl_path in expand_glob(pattern) {
                if seen.insert(jsonl_path.clone()) {
                    let project_path = jsonl_path
                        .parent()
                        .and_then(Path::parent)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    records.extend(parse_jsonl(&jsonl_path, &project_path));
                }
            }
        }

        records
    }
}

pub fn parse_jsonl(path: &Path, project_path: &str) -> Vec<Record> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };
    let reader = std::io::BufReader::new(file);

    let mut records = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.unwrap_or_default();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(data) => {
                if let Some(record) = record_from_item(&data, path, project_path, line_num + 1) {
                    records.push(record);
                }
            }
            Err(e) => {
                eprintln!(
                    "warning: bad line {} in {}: {e}",
                    line_num + 1,
                    path.display()
                );
            }
        }
    }
    records
}

fn record_from_item(
    data: &Value,
    path: &Path,
    project_path: &str,
    line_num: usize,
) -> Option<Record> {
    if data.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }

    let item_id = data
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("unknown-{line_num}"));
    let title = data
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("ready")
        .to_string();
    let item_type = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("action")
        .to_string();

    let brief = data.get("brief").cloned().unwrap_or(Value::Null);
    let brief_field =
        |key: &str| -> String { brief.get(key).and_then(Value::as_str).unwrap_or("").to_string() };

    let created_at = data
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_loose_datetime)
        .unwrap_or_else(Utc::now);
    let done_at = data
        .get("done_at")
        .and_then(Value::as_str)
        .and_then(parse_loose_datetime);

    let mut parts = vec![title.clone()];
    let why = brief_field("why");
    let what = brief_field("what");
    let done = brief_field("done");
    if !why.is_empty() {
        parts.push(format!("Why: {why}"));
    }
    if !what.is_empty() {
        parts.push(format!("What: {what}"));
    }
    if !done.is_empty() {
        parts.push(format!("Done when: {done}"));
    }
    let full_text = parts.join("\n\n");

    let change_key = format!("{}:{status}", created_at.to_rfc3339());

    Some(Record {
        source_id: format!("arc:{item_id}"),
        source_type: SourceType::Arc,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at,
        updated_at: done_at.unwrap_or(created_at),
        project_path: (!project_path.is_empty()).then(|| project_path.to_string()),
        content_hash: Some(change_key),
        is_subagent: false,
        has_presummary: true,
        summary_text: full_text.clone(),
        full_text,
        files_touched: Vec::new(),
        metadata: json!({
            "item_type": item_type,
            "status": status,
            "parent_id": data.get("parent").and_then(Value::as_str),
        }),
        messages: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_items(dir: &Path, lines: &[&str]) -> PathBuf {
        let arc_dir = dir.join(".arc");
        fs::create_dir_all(&arc_dir).unwrap();
        let path = arc_dir.join("items.jsonl");
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_parse_item_with_brief() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_items(
            tmp.path(),
            &[
                r#"{"id":"arc-gasoPe","title":"Ship search","type":"outcome","status":"ready","brief":{"why":"users can't find sessions","what":"FTS over summaries","done":"search returns ranked hits"},"created_at":"2026-01-15T10:00:00Z"}"#,
            ],
        );

        let records = parse_jsonl(&path, "/Users/jane/Repos/demo");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_id, "arc:arc-gasoPe");
        assert_eq!(record.title, "Ship search");
        assert!(record.has_presummary);
        assert!(record.full_text.contains("Why: users can't find sessions"));
        assert!(record.full_text.contains("What: FTS over summaries"));
        assert!(record.full_text.contains("Done when: search returns ranked hits"));
        assert_eq!(record.metadata["item_type"], "outcome");
    }

    #[test]
    fn test_deleted_items_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_items(
            tmp.path(),
            &[
                r#"{"id":"arc-1","title":"Keep","status":"ready","created_at":"2026-01-01T00:00:00Z"}"#,
                r#"{"id":"arc-2","title":"Gone","deleted":true,"created_at":"2026-01-01T00:00:00Z"}"#,
            ],
        );

        let records = parse_jsonl(&path, "/proj");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_id, "arc:arc-1");
    }

    #[test]
    fn test_done_at_becomes_updated_at() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_items(
            tmp.path(),
            &[
                r#"{"id":"arc-3","title":"Finished","status":"done","created_at":"2026-01-01T00:00:00Z","done_at":"2026-01-10T12:00:00Z"}"#,
            ],
        );

        let records = parse_jsonl(&path, "/proj");
        assert!(records[0].updated_at.to_rfc3339().starts_with("2026-01-10"));
        assert!(records[0].content_hash.as_deref().unwrap().ends_with(":done"));
    }

    #[test]
    fn test_discover_glob() {
        let tmp = tempfile::tempdir().unwrap();
        let proj = tmp.path().join("demo");
        fs::create_dir_all(&proj).unwrap();
        write_items(
            &proj,
            &[r#"{"id":"arc-9","title":"Item","status":"ready","created_at":"2026-01-01T00:00:00Z"}"#],
        );

        let mut config = Config::default();
        config.sources.arc.paths = Some(vec![format!(
            "{}/*/.arc/items.jsonl",
            tmp.path().to_string_lossy()
        )]);

        let records = ArcAdapter.discover(&config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project_path.as_deref(), Some(proj.to_string_lossy().as_ref()));
    }
}
