//! Handoff notes: structured markdown summaries written at session end.
//!
//! Layout: `~/.claude/handoffs/<encoded-path>/*.md`, where the parent
//! directory name encodes the project path with `/` replaced by `-`
//! (`-Users-jane-Repos-foo`). The files are already distilled — a
//! `# Handoff — YYYY-MM-DD (mood)` header followed by `##` sections — so
//! they index directly as presummaries.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::json;
use walkdir::WalkDir;

use crate::adapter::Adapter;
use crate::config::Config;
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^# Handoff — (\d{4}-\d{2}-\d{2})(?: \((\w+)\))?").unwrap()
});
static SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^## (\w+)\s*$").unwrap());
static STEM_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());
static STEM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d{4}-\d{2}-\d{2}-\d{4}$").unwrap());
static BARE_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

pub struct HandoffAdapter;

impl Adapter for HandoffAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Handoff
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        let entry = &config.sources.handoffs;
        let base = entry.path_or("~/.claude/handoffs");

        let mut records = Vec::new();
        if !base.exists() {
            return records;
        }

        for file in WalkDir::new(&base).into_iter().filter_map(Result::ok) {
            let path = file.path();
            if !path.is_file() || path.extension().is_none_or(|e| e != "md") {
                continue;
            }
            match parse(path) {
                Ok(record) => records.push(record),
                Err(e) => eprintln!("warning: skipping {}: {e}", path.display()),
            }
        }

        records
    }
}

/// Decode an encoded parent directory name into `(project_name,
/// project_path)`. Since `/` was replaced with `-`, known base patterns are
/// matched first; with no match the whole name is re-slashed and probed on
/// the filesystem; failing that the last segment stands in as the name.
pub fn decode_parent_dir(parent_name: &str) -> (String, String) {
    let home = dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();

    // Order matters: more specific markers first.
    let patterns = [
        ("-Repos-", format!("{home}/Repos/")),
        ("-.claude-", format!("{home}/.claude/")),
        ("-.claude", format!("{home}/.claude")),
    ];

    for (marker, base_path) in &patterns {
        if let Some((_, suffix)) = parent_name.split_once(marker) {
            if !suffix.is_empty() {
                return (suffix.to_string(), format!("{base_path}{suffix}"));
            }
            if *marker == "-.claude" {
                return ("claude-config".to_string(), format!("{home}/.claude"));
            }
        }
    }

    if parent_name.starts_with('-') {
        // Imperfect: path separators and dashes in names are now
        // indistinguishable, so only a filesystem probe can confirm.
        let reconstructed = parent_name.replace('-', "/");
        if Path::new(&reconstructed).exists() {
            let name = reconstructed
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("")
                .to_string();
            return (name, reconstructed);
        }

        let segments: Vec<&str> = parent_name.trim_start_matches('-').split('-').collect();
        if segments.len() >= 3 {
            if let Some(last) = segments.last() {
                return (last.to_string(), String::new());
            }
        }
    }

    (String::new(), String::new())
}

pub fn parse(path: &Path) -> Result<Record, MemoirError> {
    let content = fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mtime = file_mtime(path);

    // Header: `# Handoff — 2025-12-26 (momentum)`; the date falls back to
    // the filename, then the file mtime.
    let (date, mood) = match HEADER.captures(&content) {
        Some(caps) => {
            let date = parse_date(&caps[1]);
            let mood = caps.get(2).map(|m| m.as_str().to_string());
            (date, mood)
        }
        None => {
            let date = STEM_DATE
                .captures(&stem)
                .and_then(|caps| parse_date(&caps[1]))
                .or(mtime);
            (date, None)
        }
    };
    let date = date.unwrap_or_else(Utc::now);

    let parent_name = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (mut project_name, project_path) = decode_parent_dir(&parent_name);

    if project_name.is_empty() {
        // Filename fallback: strip the date-time suffix from the stem.
        project_name = STEM_SUFFIX.replace(&stem, "").to_string();
        if BARE_DATE.is_match(&project_name) {
            project_name = parent_name
                .trim_start_matches('-')
                .rsplit('-')
                .next()
                .unwrap_or("unknown")
                .to_string();
        }
    }

    // Sections in declaration order.
    let mut sections: Vec<(String, String)> = Vec::new();
    let matches: Vec<_> = SECTION.captures_iter(&content).collect();
    for (i, caps) in matches.iter().enumerate() {
        let name = caps[1].to_string();
        let start = caps.get(0).map_or(0, |m| m.end());
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(content.len(), |m| m.start());
        sections.push((name, content[start..end].trim().to_string()));
    }

    let full_text = sections
        .iter()
        .filter(|(_, body)| !body.is_empty())
        .map(|(name, body)| format!("## {name}\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n");

    let date_str = date.format("%Y-%m-%d");
    let title = match &mood {
        Some(mood) => format!("{project_name} handoff ({mood}) — {date_str}"),
        None => format!("{project_name} handoff — {date_str}"),
    };

    Ok(Record {
        source_id: format!("handoff:{stem}"),
        source_type: SourceType::Handoff,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at: date,
        updated_at: date,
        project_path: (!project_path.is_empty()).then_some(project_path),
        content_hash: mtime.map(|m| m.to_rfc3339()),
        is_subagent: false,
        has_presummary: true,
        summary_text: full_text.clone(),
        full_text,
        files_touched: Vec::new(),
        metadata: json!({ "mood": mood, "project_name": project_name }),
        messages: Vec::new(),
    })
}

fn parse_date(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn file_mtime(path: &Path) -> Option<chrono::DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(chrono::DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDOFF: &str = "# Handoff — 2025-12-27 (momentum)\n\n\
        ## Done\n- indexed cloud sessions\n- fixed the title fallback\n\n\
        ## Learned\nThe encoded dir names are lossy.\n\n\
        ## Next\nWire up prune.\n";

    #[test]
    fn test_decode_repos_path() {
        let (name, path) = decode_parent_dir("-Users-jane-Repos-skill-session-management");
        assert_eq!(name, "skill-session-management");
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            path,
            format!("{}/Repos/skill-session-management", home.to_string_lossy())
        );
    }

    #[test]
    fn test_decode_claude_config_dir() {
        let (name, path) = decode_parent_dir("-Users-jane-.claude");
        assert_eq!(name, "claude-config");
        assert!(path.ends_with("/.claude"));
    }

    #[test]
    fn test_decode_claude_subdir() {
        let (name, path) = decode_parent_dir("-Users-jane-.claude-memory");
        assert_eq!(name, "memory");
        assert!(path.ends_with("/.claude/memory"));
    }

    #[test]
    fn test_decode_unknown_base_keeps_last_segment() {
        let (name, path) = decode_parent_dir("-Users-jane-Documents-someproject");
        assert_eq!(name, "someproject");
        assert_eq!(path, "");
    }

    #[test]
    fn test_decode_garbage() {
        let (name, path) = decode_parent_dir("no-leading-dash");
        assert_eq!(name, "");
        assert_eq!(path, "");
    }

    #[test]
    fn test_parse_handoff() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("-Users-jane-Repos-claude-memory");
        fs::create_dir(&parent).unwrap();
        let path = parent.join("claude-memory-2025-12-27-1939.md");
        fs::write(&path, HANDOFF).unwrap();

        let record = parse(&path).unwrap();
        assert_eq!(record.source_id, "handoff:claude-memory-2025-12-27-1939");
        assert_eq!(record.title, "claude-memory handoff (momentum) — 2025-12-27");
        assert!(record.has_presummary);
        assert!(
            record
                .project_path
                .as_deref()
                .unwrap()
                .ends_with("/Repos/claude-memory")
        );
        // Sections concatenate in declaration order.
        let done = record.full_text.find("## Done").unwrap();
        let learned = record.full_text.find("## Learned").unwrap();
        let next = record.full_text.find("## Next").unwrap();
        assert!(done < learned && learned < next);
        assert_eq!(record.summary_text, record.full_text);
        assert_eq!(record.metadata["mood"], "momentum");
    }

    #[test]
    fn test_parse_headerless_falls_back_to_filename_date() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("-Users-jane-Repos-demo");
        fs::create_dir(&parent).unwrap();
        let path = parent.join("demo-2025-11-02-0900.md");
        fs::write(&path, "## Done\nshipped it\n").unwrap();

        let record = parse(&path).unwrap();
        assert!(record.title.contains("2025-11-02"));
        assert!(record.title.starts_with("demo handoff"));
    }

    #[test]
    fn test_discover_walks_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("-Users-jane-Repos-demo");
        fs::create_dir(&parent).unwrap();
        fs::write(parent.join("demo-2025-12-01-1000.md"), HANDOFF).unwrap();
        fs::write(parent.join("README.txt"), "not a handoff").unwrap();

        let mut config = Config::default();
        config.sources.handoffs.path = Some(tmp.path().to_string_lossy().to_string());

        let records = HandoffAdapter.discover(&config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_type, SourceType::Handoff);
    }
}
