//! Source adapters: per-format discovery and parsing.
//!
//! Each adapter walks its configured roots, parses every artifact it
//! understands, and emits normalized [`Record`]s. Discovery is restartable
//! and side-effect free. A file that fails to parse produces a stderr
//! warning and is skipped; it never aborts the pass.
//!
//! Claude Code's local session logs and its cloud session files share one
//! entry schema (one JSON object per turn, content blocks inside), so the
//! block-walking lives here in [`SessionAccumulator`] and both adapters
//! feed entries into it.

pub mod amp;
pub mod arc;
pub mod beads;
pub mod cloud_session;
pub mod conversation;
pub mod handoff;
pub mod knowledge;
pub mod local_md;
pub mod session_log;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};

use crate::chunker::{MessageData, Role};
use crate::config::Config;
use crate::record::{Record, SourceType, make_title};

/// One on-disk format.
pub trait Adapter {
    fn source_type(&self) -> SourceType;

    /// Walk the configured roots and parse every artifact into records.
    fn discover(&self, config: &Config) -> Vec<Record>;
}

/// All adapters, in scan order.
pub fn all() -> Vec<Box<dyn Adapter>> {
    vec![
        Box::new(session_log::SessionLogAdapter),
        Box::new(conversation::ConversationAdapter),
        Box::new(cloud_session::CloudSessionAdapter),
        Box::new(handoff::HandoffAdapter),
        Box::new(local_md::LocalMdAdapter),
        Box::new(knowledge::KnowledgeAdapter),
        Box::new(beads::BeadsAdapter),
        Box::new(arc::ArcAdapter),
        Box::new(amp::AmpAdapter),
    ]
}

/// Git commit output inside tool results: `[branch hash] message`.
static COMMIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\w\-/]+ ([a-f0-9]{7,})\] (.+?)(?:\n|$)").unwrap());

/// First line of Claude Code's episodic compaction prompt.
const COMPACTION_PREFIX: &str = "Context: This summary will be shown";

pub(crate) fn is_compaction_prompt(content: &str) -> bool {
    content.starts_with(COMPACTION_PREFIX)
}

/// Pull the real summary out of a compaction envelope: the text between the
/// innermost `<summary>…</summary>` pair, or the user prompt embedded after
/// a `User:` marker (up to `Agent:`). Short fragments are ignored.
pub(crate) fn extract_envelope_summary(content: &str) -> Option<String> {
    if let Some(start) = content.rfind("<summary>") {
        let start = start + "<summary>".len();
        if let Some(end) = content.rfind("</summary>") {
            if start < end {
                let extracted = content[start..end].trim();
                if extracted.len() > 10 {
                    return Some(extracted.to_string());
                }
            }
        }
    }
    if let Some((_, rest)) = content.split_once("User:") {
        let embedded = rest.split("Agent:").next().unwrap_or("").trim();
        if embedded.len() > 10 {
            return Some(embedded.to_string());
        }
    }
    None
}

/// Parse an RFC 3339 timestamp, tolerating a trailing `Z`.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Timestamps from tracker files come with or without offsets or
/// fractional seconds; naive values are read as UTC.
pub(crate) fn parse_loose_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Some(dt) = parse_timestamp(s) {
        return Some(dt);
    }
    let trimmed = s.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(chrono::TimeZone::from_utc_datetime(&Utc, &naive));
        }
    }
    None
}

/// Expand a tracker path pattern with at most one `*` directory segment
/// (`~/Repos/*/.beads/issues.jsonl`). Patterns without a star resolve to
/// themselves when the file exists.
pub(crate) fn expand_glob(pattern: &str) -> Vec<std::path::PathBuf> {
    let expanded = crate::config::expand_tilde(pattern);
    let text = expanded.to_string_lossy().to_string();

    let Some(star) = text.find('*') else {
        return if expanded.exists() {
            vec![expanded]
        } else {
            Vec::new()
        };
    };

    let base = text[..star].trim_end_matches('/');
    let suffix = text[star + 1..].trim_start_matches('/');
    if base.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(base) {
        for entry in entries.filter_map(Result::ok) {
            let candidate = entry.path().join(suffix);
            if candidate.exists() {
                out.push(candidate);
            }
        }
    }
    out.sort();
    out
}

/// Byte prefix of a string, clamped to a character boundary.
pub(crate) fn prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// One parsed conversation turn, pre-flattening.
#[derive(Debug, Clone)]
pub(crate) struct ParsedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_tool_result: bool,
    pub has_tool_use: bool,
}

/// Accumulates session entries into messages plus tool-usage metadata.
#[derive(Debug, Default)]
pub(crate) struct SessionAccumulator {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub summary_entry: Option<String>,
    pub first_user_content: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub messages: Vec<ParsedMessage>,
    tool_calls: Vec<Value>,
    files_touched: BTreeSet<String>,
    skills_used: BTreeSet<String>,
    subagents_spawned: Vec<Value>,
    git_commits: Vec<Value>,
}

impl SessionAccumulator {
    /// Feed one session entry (one JSONL line or one logline).
    pub fn process_entry(&mut self, entry: &Value) {
        let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("");

        if self.cwd.is_none() {
            self.cwd = entry.get("cwd").and_then(Value::as_str).map(str::to_string);
            self.git_branch = entry
                .get("gitBranch")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        // Explicit summary entries carry the distilled session summary.
        if entry_type == "summary" {
            if let Some(summary) = entry.get("summary").and_then(Value::as_str) {
                if !summary.is_empty() {
                    self.summary_entry = Some(summary.to_string());
                }
            }
            return;
        }

        let ts = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        if let Some(t) = ts {
            self.timestamps.push(t);
        }

        if entry_type != "user" && entry_type != "assistant" {
            return;
        }

        if self.session_id.is_none() {
            self.session_id = entry
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            self.agent_id = entry
                .get("agentId")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let msg = entry.get("message").cloned().unwrap_or(Value::Null);
        let role = msg
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or(entry_type)
            .to_string();

        let mut has_tool_use = false;
        let content = match msg.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(blocks)) => {
                let mut text_parts = Vec::new();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                text_parts.push(text.to_string());
                            }
                        }
                        Some("tool_use") => {
                            has_tool_use = true;
                            self.record_tool_use(block, entry.get("timestamp"));
                        }
                        Some("tool_result") => {
                            if let Some(result) = block.get("content").and_then(Value::as_str) {
                                self.record_commits(result);
                            }
                        }
                        _ => {}
                    }
                }
                text_parts.join("\n")
            }
            _ => String::new(),
        };

        let is_meta = entry.get("isMeta").and_then(Value::as_bool).unwrap_or(false);
        if self.first_user_content.is_none()
            && role == "user"
            && !is_meta
            && !content.is_empty()
            && !is_compaction_prompt(&content)
        {
            self.first_user_content = Some(content.clone());
        }

        self.messages.push(ParsedMessage {
            role,
            content,
            timestamp: ts,
            is_tool_result: entry.get("toolUseResult").is_some(),
            has_tool_use,
        });
    }

    fn record_tool_use(&mut self, block: &Value, ts: Option<&Value>) {
        let name = block.get("name").and_then(Value::as_str).unwrap_or("");
        let input = block.get("input").cloned().unwrap_or(Value::Null);

        let input_summary: Option<String> = match name {
            "Bash" => input
                .get("command")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(|c| prefix(c, 100).to_string()),
            "Read" | "Write" | "Edit" | "Glob" => {
                let path = input.get("file_path").and_then(Value::as_str);
                if let Some(p) = path.filter(|p| !p.is_empty()) {
                    self.files_touched.insert(p.to_string());
                    Some(p.to_string())
                } else {
                    None
                }
            }
            "Skill" => {
                let skill = input.get("skill").and_then(Value::as_str);
                if let Some(s) = skill.filter(|s| !s.is_empty()) {
                    self.skills_used.insert(s.to_string());
                    Some(s.to_string())
                } else {
                    None
                }
            }
            "Task" => {
                let subagent = input
                    .get("subagent_type")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let preview = input.get("prompt").and_then(Value::as_str).unwrap_or("");
                self.subagents_spawned.push(json!({
                    "subagent_type": subagent,
                    "prompt_preview": prefix(preview, 50),
                }));
                Some(subagent.to_string())
            }
            _ => None,
        };

        self.tool_calls.push(json!({
            "name": name,
            "ts": ts.and_then(Value::as_str),
            "input_summary": input_summary,
        }));
    }

    fn record_commits(&mut self, result: &str) {
        for caps in COMMIT_PATTERN.captures_iter(result) {
            self.git_commits.push(json!({
                "hash": &caps[1],
                "message": &caps[2],
            }));
        }
    }

    /// Human-readable conversation text: every non-tool-result message with
    /// content, joined by blank lines.
    pub fn full_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| !m.is_tool_result && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Message structure aligned to `full_text`, for the semantic chunker.
    /// Offsets account for the two-byte separator between messages.
    pub fn message_data(&self) -> Vec<MessageData> {
        let mut result = Vec::new();
        let mut offset = 0;

        for msg in &self.messages {
            if msg.is_tool_result || msg.content.is_empty() {
                continue;
            }
            result.push(MessageData {
                timestamp: msg.timestamp.unwrap_or_else(Utc::now),
                role: if msg.role == "user" {
                    Role::User
                } else {
                    Role::Assistant
                },
                offset,
                length: msg.content.len(),
                is_tool_result: msg.is_tool_result,
                has_tool_use: msg.has_tool_use,
            });
            offset += msg.content.len() + 2;
        }

        result
    }

    /// Session title, in preference order: explicit summary entry, first
    /// non-meta user message, text recovered from a compaction envelope,
    /// then the caller's fallback (usually the file stem).
    pub fn title(&self, fallback: &str) -> String {
        let source = self
            .summary_entry
            .clone()
            .or_else(|| self.first_user_content.clone())
            .or_else(|| self.envelope_title());

        match source {
            Some(text) => {
                let title = make_title(&text);
                if title.is_empty() {
                    fallback.to_string()
                } else {
                    title
                }
            }
            None => fallback.to_string(),
        }
    }

    fn envelope_title(&self) -> Option<String> {
        let first_user = self
            .messages
            .iter()
            .find(|m| m.role == "user" && !m.is_tool_result && !m.content.is_empty())?;
        if !is_compaction_prompt(&first_user.content) {
            return None;
        }
        extract_envelope_summary(&first_user.content)
    }

    /// Basic summary for sessions without a pre-generated one: the title
    /// plus the first three non-meta, non-compaction user messages. For
    /// compacted sessions, the envelope summary wins.
    pub fn basic_summary(&self, title: &str) -> String {
        if let Some(summary) = &self.summary_entry {
            return summary.clone();
        }

        let first_user = self
            .messages
            .iter()
            .find(|m| m.role == "user" && !m.is_tool_result && !m.content.trim().is_empty());
        if let Some(first) = first_user {
            if is_compaction_prompt(first.content.trim()) {
                for msg in &self.messages {
                    if let Some(extracted) = extract_envelope_summary(&msg.content) {
                        return prefix(&extracted, 500).to_string();
                    }
                }
            }
        }

        let mut parts = vec![title.to_string()];
        let user_messages: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| {
                m.role == "user"
                    && !m.is_tool_result
                    && !m.content.trim().is_empty()
                    && !is_compaction_prompt(&m.content)
            })
            .take(3)
            .map(|m| m.content.trim())
            .collect();
        if !user_messages.is_empty() {
            parts.push(user_messages.join("\n\n"));
        }
        parts.join("\n\n")
    }

    /// Tool-usage metadata blob persisted on the source row.
    pub fn metadata(&self) -> Value {
        let mut meta = json!({
            "tool_calls": self.tool_calls,
            "files_touched": self.files_touched.iter().collect::<Vec<_>>(),
            "skills_used": self.skills_used.iter().collect::<Vec<_>>(),
            "subagents_spawned": self.subagents_spawned,
            "git_commits": self.git_commits,
            "tool_count": self.tool_calls.len(),
        });
        if let Some(cwd) = &self.cwd {
            meta["cwd"] = json!(cwd);
        }
        if let Some(branch) = &self.git_branch {
            meta["git_branch"] = json!(branch);
        }
        meta
    }

    pub fn files_touched(&self) -> Vec<String> {
        self.files_touched.iter().cloned().collect()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.timestamps.iter().min().copied().unwrap_or_else(Utc::now)
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.timestamps.iter().max().copied().unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_commit_pattern() {
        let output = "[main abc1234] fix the login flow\n 3 files changed";
        let caps = COMMIT_PATTERN.captures(output).unwrap();
        assert_eq!(&caps[1], "abc1234");
        assert_eq!(&caps[2], "fix the login flow");

        assert!(COMMIT_PATTERN.captures("[feature/x deadbeef1] short").is_some());
        assert!(COMMIT_PATTERN.captures("no commit here").is_none());
        // Hashes under seven characters don't count.
        assert!(COMMIT_PATTERN.captures("[main abc12] too short").is_none());
    }

    #[test]
    fn test_envelope_summary_from_tags() {
        let content = "Context: This summary will be shown to the user.\n\
            <summary>Implemented JWT refresh tokens for workspace MCP</summary>";
        assert_eq!(
            extract_envelope_summary(content).as_deref(),
            Some("Implemented JWT refresh tokens for workspace MCP")
        );
    }

    #[test]
    fn test_envelope_summary_from_user_marker() {
        let content = "Context: This summary will be shown.\n\
            User: please add retry logic to the sync loop\nAgent: working on it";
        assert_eq!(
            extract_envelope_summary(content).as_deref(),
            Some("please add retry logic to the sync loop")
        );
    }

    #[test]
    fn test_envelope_summary_rejects_short_fragments() {
        assert!(extract_envelope_summary("<summary>tiny</summary>").is_none());
        assert!(extract_envelope_summary("User: ok Agent: fine").is_none());
    }

    #[test]
    fn test_accumulator_tracks_tools_and_commits() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"assistant","timestamp":"2026-01-10T10:00:00Z","sessionId":"s1",
                "message":{"role":"assistant","content":[
                    {"type":"text","text":"editing now"},
                    {"type":"tool_use","name":"Edit","input":{"file_path":"/src/lib.rs"}},
                    {"type":"tool_use","name":"Skill","input":{"skill":"review"}}
                ]}}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"user","timestamp":"2026-01-10T10:01:00Z","toolUseResult":{},
                "message":{"role":"user","content":[
                    {"type":"tool_result","content":"[main abc1234] add retry logic\n"}
                ]}}"#,
        ));

        let meta = acc.metadata();
        assert_eq!(meta["tool_count"], 2);
        assert_eq!(meta["files_touched"][0], "/src/lib.rs");
        assert_eq!(meta["skills_used"][0], "review");
        assert_eq!(meta["git_commits"][0]["hash"], "abc1234");
        assert_eq!(acc.files_touched(), vec!["/src/lib.rs"]);
    }

    #[test]
    fn test_full_text_skips_tool_results() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"user","message":{"role":"user","content":"please fix the bug"}}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"user","toolUseResult":{},
                "message":{"role":"user","content":[{"type":"text","text":"raw tool output"}]}}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"assistant","message":{"role":"assistant",
                "content":[{"type":"text","text":"done, fixed it"}]}}"#,
        ));

        let text = acc.full_text();
        assert_eq!(text, "please fix the bug\n\ndone, fixed it");
    }

    #[test]
    fn test_message_data_offsets_match_full_text() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"user","timestamp":"2026-01-10T10:00:00Z",
                "message":{"role":"user","content":"first question"}}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"assistant","timestamp":"2026-01-10T10:00:30Z",
                "message":{"role":"assistant","content":[{"type":"text","text":"an answer"}]}}"#,
        ));

        let text = acc.full_text();
        let data = acc.message_data();
        assert_eq!(data.len(), 2);
        assert_eq!(&text[data[0].offset..data[0].offset + data[0].length], "first question");
        assert_eq!(&text[data[1].offset..data[1].offset + data[1].length], "an answer");
        assert_eq!(data[0].role, Role::User);
        assert_eq!(data[1].role, Role::Assistant);
    }

    #[test]
    fn test_title_prefers_summary_entry() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"summary","summary":"Refactor the ingest pipeline"}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"user","message":{"role":"user","content":"hello there"}}"#,
        ));
        assert_eq!(acc.title("fallback"), "Refactor the ingest pipeline");
    }

    #[test]
    fn test_title_from_compaction_envelope() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"user","message":{"role":"user",
                "content":"Context: This summary will be shown to the user.\n<summary>Implemented JWT refresh tokens for workspace MCP</summary>"}}"#,
        ));
        let title = acc.title("fallback");
        assert!(title.contains("JWT refresh tokens"));
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let acc = SessionAccumulator::default();
        assert_eq!(acc.title("a1b2c3"), "a1b2c3");
    }

    #[test]
    fn test_basic_summary_title_plus_first_messages() {
        let mut acc = SessionAccumulator::default();
        for text in ["first ask", "second ask", "third ask", "fourth ask"] {
            acc.process_entry(&entry(&format!(
                r#"{{"type":"user","message":{{"role":"user","content":"{text}"}}}}"#
            )));
        }
        let summary = acc.basic_summary("My session");
        assert!(summary.starts_with("My session"));
        assert!(summary.contains("first ask"));
        assert!(summary.contains("third ask"));
        assert!(!summary.contains("fourth ask"));
    }

    #[test]
    fn test_meta_messages_ignored_for_title() {
        let mut acc = SessionAccumulator::default();
        acc.process_entry(&entry(
            r#"{"type":"user","isMeta":true,
                "message":{"role":"user","content":"injected context"}}"#,
        ));
        acc.process_entry(&entry(
            r#"{"type":"user","message":{"role":"user","content":"the real question"}}"#,
        ));
        assert_eq!(acc.title("fallback"), "the real question");
    }

    #[test]
    fn test_prefix_clamps_to_char_boundary() {
        let s = "héllo wörld";
        let p = prefix(s, 2);
        assert!(p.len() <= 2);
        assert!(s.starts_with(p));
        assert_eq!(prefix("short", 100), "short");
    }
}
