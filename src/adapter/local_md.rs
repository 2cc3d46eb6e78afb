//! Local markdown notebooks.
//!
//! Indexes markdown files from configured roots: meeting notes, journals,
//! any nested directory of notes. Content is indexed directly; these are
//! not distilled, so `has_presummary` stays false and the extraction
//! pipeline may still run over them. Identity is the path relative to the
//! configured root, which survives the root moving between machines.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::json;
use walkdir::WalkDir;

use crate::adapter::Adapter;
use crate::config::{Config, SourceEntry};
use crate::error::MemoirError;
use crate::record::{Record, SourceType};

static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());
static LEADING_STAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{12}\s*").unwrap());
static TRAILING_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d{4}-\d{2}-\d{2}$").unwrap());
static STAMP_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})").unwrap());
static DASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap());

pub struct LocalMdAdapter;

impl Adapter for LocalMdAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::LocalMd
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        discover_roots(&config.sources.local_md, SourceType::LocalMd, false)
    }
}

/// Discovery shared with the knowledge adapter: every named root is walked
/// with its pattern, and each matching file parsed.
pub(crate) fn discover_roots(
    roots: &BTreeMap<String, SourceEntry>,
    source_type: SourceType,
    has_presummary: bool,
) -> Vec<Record> {
    let mut records = Vec::new();

    for entry in roots.values() {
        let Some(raw_path) = entry.path.as_deref() else {
            continue;
        };
        let base = crate::config::expand_tilde(raw_path);
        if !base.exists() {
            // Roots are best-effort across hosts.
            continue;
        }
        let pattern = entry.pattern.as_deref().unwrap_or("**/*.md");

        for path in matching_files(&base, pattern) {
            match parse_note(&path, &base, source_type, has_presummary) {
                Ok(record) => records.push(record),
                Err(e) => eprintln!("warning: skipping {}: {e}", path.display()),
            }
        }
    }

    records
}

/// Minimal pattern support: `**` anywhere means recursive, and the
/// extension after the last dot must match. Covers the `*.md` / `**/*.md`
/// patterns the config uses.
fn matching_files(base: &Path, pattern: &str) -> Vec<PathBuf> {
    let recursive = pattern.contains("**");
    let extension = pattern.rsplit('.').next().unwrap_or("md").to_string();

    let max_depth = if recursive { usize::MAX } else { 1 };
    WalkDir::new(base)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == extension.as_str()))
        .collect()
}

pub(crate) fn parse_note(
    path: &Path,
    base: &Path,
    source_type: SourceType,
    has_presummary: bool,
) -> Result<Record, MemoirError> {
    let content = fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let meta = fs::metadata(path)?;
    let mtime_secs = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let mtime: DateTime<Utc> = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    // Title: first level-1 heading, else the normalized filename stem
    // ("202205261634 tv squared-2022-05-26" -> "tv squared").
    let title = match H1.captures(&content) {
        Some(caps) => caps[1].trim().to_string(),
        None => {
            let cleaned = LEADING_STAMP.replace(&stem, "");
            let cleaned = TRAILING_DATE.replace(&cleaned, "");
            cleaned.trim_matches([' ', '-']).to_string()
        }
    };

    let date = stem_date(&stem).unwrap_or(mtime);

    let rel_path = path.strip_prefix(base).unwrap_or(path);
    let escaped = rel_path.to_string_lossy().replace('/', ":");

    Ok(Record {
        source_id: format!("{source_type}:{escaped}"),
        source_type,
        title,
        path: Some(path.to_string_lossy().to_string()),
        created_at: date,
        updated_at: date,
        project_path: Some(base.to_string_lossy().to_string()),
        content_hash: Some(mtime_secs.to_string()),
        is_subagent: false,
        has_presummary,
        summary_text: content.clone(),
        full_text: content,
        files_touched: Vec::new(),
        metadata: json!({}),
        messages: Vec::new(),
    })
}

/// Date from the filename stem: `YYYYMMDDHHmm`, else `YYYY-MM-DD`.
fn stem_date(stem: &str) -> Option<DateTime<Utc>> {
    if let Some(caps) = STAMP_DATE.captures(stem) {
        let parsed = Utc.with_ymd_and_hms(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            caps[4].parse().ok()?,
            caps[5].parse().ok()?,
            0,
        );
        if let chrono::LocalResult::Single(dt) = parsed {
            return Some(dt);
        }
    }
    if let Some(caps) = DASH_DATE.captures(stem) {
        let parsed = Utc.with_ymd_and_hms(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            0,
            0,
            0,
        );
        if let chrono::LocalResult::Single(dt) = parsed {
            return Some(dt);
        }
    }
    None
}
