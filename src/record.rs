//! Core record types for the memoir indexing pipeline.
//!
//! # Architecture overview
//!
//! Memoir indexes artifacts from many AI coding tools (session logs, cloud
//! sessions, handoff notes, issue trackers, notebooks) into one database.
//! Rather than letting the storage and search layers know about every
//! on-disk format, adapters normalize everything into the shared [`Record`]
//! shape defined here.
//!
//! ```text
//! Input (JSONL/JSON/Markdown) → Adapter → Record → Ingest → SQLite + FTS5
//! ```
//!
//! A `Record` has no identity beyond its `source_id`; adapters rebuild it on
//! every discovery pass and the ingest pipeline decides, via `content_hash`,
//! whether anything actually changed.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunker::MessageData;

/// Identifies which on-disk format produced a record.
///
/// Carried through the record and persisted on the source row so that
/// search filters and the prune operation can apply per-format logic
/// without re-inspecting paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ClaudeCode,
    ClaudeAi,
    CloudSession,
    Handoff,
    LocalMd,
    Knowledge,
    Beads,
    Arc,
    Amp,
}

impl SourceType {
    /// All known types, in scan order.
    pub const ALL: [SourceType; 9] = [
        SourceType::ClaudeCode,
        SourceType::ClaudeAi,
        SourceType::CloudSession,
        SourceType::Handoff,
        SourceType::LocalMd,
        SourceType::Knowledge,
        SourceType::Beads,
        SourceType::Arc,
        SourceType::Amp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::ClaudeCode => "claude_code",
            SourceType::ClaudeAi => "claude_ai",
            SourceType::CloudSession => "cloud_session",
            SourceType::Handoff => "handoff",
            SourceType::LocalMd => "local_md",
            SourceType::Knowledge => "knowledge",
            SourceType::Beads => "beads",
            SourceType::Arc => "arc",
            SourceType::Amp => "amp",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_code" => Ok(SourceType::ClaudeCode),
            "claude_ai" => Ok(SourceType::ClaudeAi),
            "cloud_session" => Ok(SourceType::CloudSession),
            "handoff" => Ok(SourceType::Handoff),
            "local_md" => Ok(SourceType::LocalMd),
            "knowledge" => Ok(SourceType::Knowledge),
            "beads" => Ok(SourceType::Beads),
            "arc" => Ok(SourceType::Arc),
            "amp" => Ok(SourceType::Amp),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// A normalized, indexable artifact produced by an adapter.
///
/// `source_id` is the canonical identity, formatted as `<type>:<stable-id>`
/// where the stable id survives across runs and hosts (conversation UUID,
/// relative path, issue id — never an absolute user-specific path).
#[derive(Debug, Clone)]
pub struct Record {
    pub source_id: String,
    pub source_type: SourceType,
    pub title: String,
    /// Filesystem path where the artifact lives; `None` for virtual sources.
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Project directory this artifact belongs to, when derivable.
    pub project_path: Option<String>,
    /// Change-detection key: mtime string, content digest, or a composite —
    /// adapter's choice. `None` means "always re-index".
    pub content_hash: Option<String>,
    pub is_subagent: bool,
    /// True when `summary_text` is already a distilled summary and the
    /// ingest pipeline may skip the external summarizer.
    pub has_presummary: bool,
    /// The text to index as the searchable summary. Adapters fill this per
    /// their contract: a pre-generated summary, the distilled full text, or
    /// a basic title-plus-first-messages synopsis.
    pub summary_text: String,
    /// What a human would read: user and assistant text, no tool payloads.
    pub full_text: String,
    /// Files touched during the session, for the file-path search index.
    pub files_touched: Vec<String>,
    /// Opaque structured metadata persisted as a JSON blob.
    pub metadata: serde_json::Value,
    /// Message structure with byte offsets into `full_text`, used by the
    /// semantic chunker. Empty for formats without a message stream.
    pub messages: Vec<MessageData>,
}

static COMMAND_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<command-\w+>.*?</command-\w+>").unwrap());

/// Strip paired `<command-*>…</command-*>` markup and collapse whitespace.
pub fn clean_title(text: &str) -> String {
    let cleaned = COMMAND_TAG.replace_all(text, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate a title to 80 characters, breaking on whitespace past column 60
/// when possible, with a trailing ellipsis when anything was cut.
pub fn truncate_title(text: &str) -> String {
    const MAX: usize = 80;
    const BREAK_FROM: usize = 60;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX {
        return text.to_string();
    }

    let cut = chars[BREAK_FROM..MAX]
        .iter()
        .position(|c| *c == ' ')
        .map_or(MAX, |i| BREAK_FROM + i);

    let mut title: String = chars[..cut].iter().collect();
    title.push_str("...");
    title
}

/// Clean and truncate raw title text in one step.
pub fn make_title(text: &str) -> String {
    truncate_title(&clean_title(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_display() {
        assert_eq!(SourceType::ClaudeCode.to_string(), "claude_code");
        assert_eq!(SourceType::CloudSession.to_string(), "cloud_session");
        assert_eq!(SourceType::Amp.to_string(), "amp");
    }

    #[test]
    fn test_source_type_roundtrip() {
        for t in SourceType::ALL {
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
        }
        assert!("gdoc".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_clean_title_strips_command_tags() {
        let raw = "<command-name>/compact</command-name> fix the login bug";
        assert_eq!(clean_title(raw), "fix the login bug");
    }

    #[test]
    fn test_clean_title_collapses_whitespace() {
        assert_eq!(clean_title("  hello\n\n  world  "), "hello world");
    }

    #[test]
    fn test_truncate_title_short_unchanged() {
        assert_eq!(truncate_title("short title"), "short title");
    }

    #[test]
    fn test_truncate_title_breaks_on_space() {
        let long = "word ".repeat(30);
        let title = truncate_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 83);
        // Cut lands on a word boundary, not mid-word.
        assert!(!title.trim_end_matches("...").ends_with("wor"));
    }

    #[test]
    fn test_truncate_title_no_space_hard_cut() {
        let long = "x".repeat(200);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), 83);
        assert!(title.ends_with("..."));
    }
}
