//! Beads issue tracker.
//!
//! Indexes issues from `.beads/issues.jsonl` files across projects. The
//! JSONL file is the source of truth (it is git-tracked); issue ids carry
//! a project prefix and are globally unique. Discovery checks the daemon
//! registry at `~/.beads/registry.json` first, then falls back to glob
//! patterns for dormant projects. Tombstoned issues are skipped.

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};

use crate::adapter::{Adapter, expand_glob, parse_loose_datetime};
use crate::config::Config;
use crate::record::{Record, SourceType};

pub struct BeadsAdapter;

impl Adapter for BeadsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Beads
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let mut records = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for (jsonl_path, workspace) in registry_paths() {
            if seen.insert(jsonl_path.clone()) {
                records.extend(parse_jsonl(&jsonl_path, &workspace));
            }
        }

        let defaults = vec![
            "~/Repos/*/.beads/issues.jsonl".to_string(),
            "~/.claude/.beads/issues.jsonl".to_string(),
        ];
        let patterns = config.sources.beads.paths.clone().unwrap_or(defaults);

        for pattern in &patterns {
            for jsonl_path in expand_glob(pattern) {
                if seen.insert(jsonl_path.clone()) {
                    // Workspace is the parent of the .beads directory.
                    let workspace = jsonl_path
                        .parent()
                        .and_then(Path::parent)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    records.extend(parse_jsonl(&jsonl_path, &workspace));
                }
            }
        }

        records
    }
}

/// Active daemon workspaces from `~/.beads/registry.json`.
fn registry_paths() -> Vec<(PathBuf, String)> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let registry_path = home.join(".beads/registry.json");
    let Ok(content) = fs::read_to_string(&registry_path) else {
        return Vec::new();
    };
    let Ok(registry) = serde_json::from_str::<Value>(&content) else {
        eprintln!("warning: unparsable beads registry at {}", registry_path.display());
        return Vec::new();
    };

    let mut paths = Vec::new();
    if let Some(entries) = registry.as_array() {
        for entry in entries {
            let Some(workspace) = entry.get("workspace_path").and_then(Value::as_str) else {
                continue;
            };
            let jsonl = Path::new(workspace).join(".beads/issues.jsonl");
            if jsonl.exists() {
                paths.push((jsonl, workspace.to_string()));
            }
        }
    }
    paths
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
                if let Some(record) = record_from_issue(&data, path, project_path, line_num + 1) {
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

fn record_from_issue(
    data: &Value,
    path: &Path,
    project_path: &str,
    line_num: usize,
) -> Option<Record> {
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("open")
        .to_string();
    if status == "tombstone" {
        return None;
    }

    let text = |key: &str| -> String {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    let bead_id = data
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("unknown-{line_num}"));
    let title = text("title");
    let close_reason = text("close_reason");

    let created_at = data
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_loose_datetime)
        .unwrap_or_else(Utc::now);
    let updated_at = data
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(parse_loose_datetime)
        .unwrap_or(created_at);

    let mut parts = vec![title.clone()];
    for field in ["description", "design", "notes", "acceptance_criteria"] {
        let value = text(field);
        if !value.is_empty() {
            parts.push(value);
        }
    }
    if !close_reason.is_empty() {
        parts.push(format!("Close reason: {close_reason}"));
    }
    let full_text = parts.join("\n\n");

    // Issues change on completion; created-at plus status is a sufficient
    // change key.
    let change_key = format!("{}:{status}", created_at.to_rfc3339());

    Some(Record {
        source_id: format!("beads:{bead_id}"),
        source_type: SourceType::Beads,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at,
        updated_at,
        project_path: (!project_path.is_empty()).then(|| project_path.to_string()),
        content_hash: Some(change_key),
        is_subagent: false,
        has_presummary: true,
        summary_text: full_text.clone(),
        full_text,
        files_touched: Vec::new(),
        metadata: json!({
            "status": status,
            "priority": data.get("priority").and_then(Value::as_i64).unwrap_or(2),
            "issue_type": data.get("issue_type").and_then(Value::as_str).unwrap_or("task"),
            "close_reason": (!close_reason.is_empty()).then_some(close_reason),
        }),
        messages: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_issues(dir: &Path, lines: &[&str]) -> PathBuf {
        let beads_dir = dir.join(".beads");
        fs::create_dir_all(&beads_dir).unwrap();
        let path = beads_dir.join("issues.jsonl");
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_parse_issue() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_issues(
            tmp.path(),
            &[
                r#"{"id":"demo-5z2","title":"Fix FTS drift","description":"mirror desyncs","design":"standalone triggers","notes":"seen twice","acceptance_criteria":"verify passes","status":"open","priority":1,"issue_type":"bug","created_at":"2025-12-31T18:09:03.050224Z","updated_at":"2026-01-02T09:00:00Z"}"#,
            ],
        );

        let records = parse_jsonl(&path, "/Users/jane/Repos/demo");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_id, "beads:demo-5z2");
        assert_eq!(record.title, "Fix FTS drift");
        assert!(record.has_presummary);
        assert!(record.full_text.contains("standalone triggers"));
        assert!(record.full_text.contains("verify passes"));
        assert_eq!(record.project_path.as_deref(), Some("/Users/jane/Repos/demo"));
        assert_eq!(record.metadata["issue_type"], "bug");
        assert!(record.content_hash.as_deref().unwrap().ends_with(":open"));
    }

    #[test]
    fn test_tombstones_and_bad_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_issues(
            tmp.path(),
            &[
                r#"{"id":"demo-1","title":"Alive","status":"open","created_at":"2026-01-01T00:00:00Z"}"#,
                r#"{"id":"demo-2","title":"Dead","status":"tombstone","created_at":"2026-01-01T00:00:00Z"}"#,
                "{broken",
            ],
        );

        let records = parse_jsonl(&path, "/proj");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_id, "beads:demo-1");
    }

    #[test]
    fn test_closed_issue_includes_close_reason() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_issues(
            tmp.path(),
            &[
                r#"{"id":"demo-3","title":"Done thing","status":"closed","close_reason":"shipped in v2","created_at":"2026-01-01T00:00:00Z"}"#,
            ],
        );

        let records = parse_jsonl(&path, "/proj");
        assert!(records[0].full_text.contains("Close reason: shipped in v2"));
        assert!(records[0].content_hash.as_deref().unwrap().ends_with(":closed"));
    }

    #[test]
    fn test_discover_via_config_glob() {
        let tmp = tempfile::tempdir().unwrap();
        let proj_a = tmp.path().join("alpha");
        let proj_b = tmp.path().join("beta");
        fs::create_dir_all(&proj_a).unwrap();
        fs::create_dir_all(&proj_b).unwrap();
        write_issues(
            &proj_a,
            &[r#"{"id":"alpha-1","title":"A","status":"open","created_at":"2026-01-01T00:00:00Z"}"#],
        );
        write_issues(
            &proj_b,
            &[r#"{"id":"beta-1","title":"B","status":"open","created_at":"2026-01-01T00:00:00Z"}"#],
        );

        let mut config = Config::default();
        config.sources.beads.paths = Some(vec![format!(
            "{}/*/.beads/issues.jsonl",
            tmp.path().to_string_lossy()
        )]);

        let records = BeadsAdapter.discover(&config);
        assert_eq!(records.len(), 2);
        let mut ids: Vec<&str> = records.iter().map(|r| r.source_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["beads:alpha-1", "beads:beta-1"]);
    }
}
