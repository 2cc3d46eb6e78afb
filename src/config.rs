//! Configuration loading and management.
//!
//! Configuration lives in `~/.config/memoir/config.toml` and is optional:
//! every option has a built-in default so the tool works without setup.
//! Adapter roots sit under `[sources.<type>]`, chunker and summarizer
//! thresholds under `[processing]`.
//!
//! Two access paths:
//! 1. [`Config::load`] — used at runtime to fill in defaults before a scan.
//! 2. `get_value` / `set_value` / `unset_value` — used by the `get/set/unset`
//!    subcommands to read and write individual keys in the live file without
//!    disturbing user comments (hence `toml_edit` rather than plain `toml`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use toml_edit::DocumentMut;

use crate::chunker::ChunkLimits;
use crate::error::MemoirError;

/// A configured source root. One shape covers every adapter: single-root
/// adapters read `path`/`pattern`, the session-log adapter additionally
/// reads `min_lines`/`include_subagents`, and the tracker adapters read
/// `paths` glob lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceEntry {
    pub path: Option<String>,
    pub pattern: Option<String>,
    pub min_lines: Option<usize>,
    pub include_subagents: Option<bool>,
    pub paths: Option<Vec<String>>,
}

impl SourceEntry {
    /// Resolve `path`, falling back to `default`, expanding a leading `~`.
    pub fn path_or(&self, default: &str) -> PathBuf {
        expand_tilde(self.path.as_deref().unwrap_or(default))
    }
}

/// Per-source configuration tables.
///
/// `local_md` and `knowledge` support multiple named roots
/// (`[sources.local_md.notes]`, `[sources.local_md.journal]`, …) since
/// users keep notebooks in more than one place.
#[derive(Debug, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub claude_code: SourceEntry,
    #[serde(default)]
    pub claude_ai: SourceEntry,
    #[serde(default)]
    pub cloud_sessions: SourceEntry,
    #[serde(default)]
    pub handoffs: SourceEntry,
    #[serde(default)]
    pub local_md: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub knowledge: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub beads: SourceEntry,
    #[serde(default)]
    pub arc: SourceEntry,
    #[serde(default)]
    pub amp: SourceEntry,
}

/// Chunker and summarizer thresholds from the `[processing]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Content above this size goes through chunked extraction.
    pub max_content_chars: usize,
    /// Fixed-size fallback chunking (no message structure available).
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Semantic chunking: merge below min, split above max, aim for target.
    pub semantic_chunk_min: usize,
    pub semantic_chunk_max: usize,
    pub semantic_chunk_target: usize,
    /// Summarizer subprocess timeout.
    pub oracle_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 80_000,
            chunk_size: crate::chunker::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::chunker::DEFAULT_CHUNK_OVERLAP,
            semantic_chunk_min: crate::chunker::DEFAULT_MIN,
            semantic_chunk_max: crate::chunker::DEFAULT_MAX,
            semantic_chunk_target: crate::chunker::DEFAULT_TARGET,
            oracle_timeout_secs: 120,
        }
    }
}

impl ProcessingConfig {
    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            min: self.semantic_chunk_min,
            max: self.semantic_chunk_max,
            target: self.semantic_chunk_target,
        }
    }
}

/// Search defaults from the `[search]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_results: usize,
    pub snippet_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_results: 5,
            snippet_chars: 200,
        }
    }
}

/// Top-level config deserialized from `~/.config/memoir/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Database file override; defaults to `~/.local/share/memoir/index.db`.
    pub db: Option<String>,
    /// Model name passed to the summarizer subprocess.
    pub model: Option<String>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load config from disk. A missing or invalid file silently falls back
    /// to defaults so the tool is always runnable.
    pub fn load() -> Config {
        let Some(path) = config_path().ok() else {
            return Config::default();
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// Resolve the database path, expanding a leading `~`.
    pub fn db_path(&self) -> PathBuf {
        match &self.db {
            Some(p) => expand_tilde(p),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local/share/memoir/index.db"),
        }
    }
}

/// Print a config value by dotted key (e.g. `sources.claude_code.path`).
pub fn get_value(key: &str) -> Result<(), MemoirError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| MemoirError::Other(format!("Failed to parse config: {e}")))?;

    match resolve_key(&doc, key) {
        Some(item) => {
            println!("{}", format_item(item));
            Ok(())
        }
        None => Err(MemoirError::Other(format!("Key not found: {key}"))),
    }
}

/// Write a config value by dotted key, creating intermediate tables as
/// needed. Values are type-inferred: `true`/`false` become booleans, numeric
/// strings become numbers, everything else stays a string.
pub fn set_value(key: &str, value: &str) -> Result<(), MemoirError> {
    let content = read_config_file().unwrap_or_default();
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| MemoirError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        if !table.contains_key(segment) {
            table.insert(segment, toml_edit::Item::Table(toml_edit::Table::new()));
        }
        table = table[segment]
            .as_table_mut()
            .ok_or_else(|| MemoirError::Other(format!("'{segment}' is not a table")))?;
    }

    table.insert(&field, toml_edit::Item::Value(infer_value(value)));
    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Remove a config value by dotted key. Errors on a missing key so typos
/// get clear feedback.
pub fn unset_value(key: &str) -> Result<(), MemoirError> {
    let content = read_config_file()?;
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| MemoirError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        table = table
            .get_mut(segment)
            .and_then(|item| item.as_table_mut())
            .ok_or_else(|| MemoirError::Other(format!("Key not found: {key}")))?;
    }

    if table.remove(&field).is_none() {
        return Err(MemoirError::Other(format!("Key not found: {key}")));
    }

    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Print all config values as dotted `key = value` lines, copy-pastable
/// straight back into `set` commands.
pub fn list_values() -> Result<(), MemoirError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| MemoirError::Other(format!("Failed to parse config: {e}")))?;

    let mut entries = Vec::new();
    collect_entries(doc.as_table(), "", &mut entries);

    if entries.is_empty() {
        eprintln!("No config values set.");
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

/// Write the default config template. Options are commented out so the file
/// documents what exists without changing any behavior. Errors if the file
/// already exists.
pub fn init() -> Result<(), MemoirError> {
    let path = config_path()?;
    if path.exists() {
        return Err(MemoirError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    let template = r#"# memoir configuration

# Database location
# db = "~/.local/share/memoir/index.db"

# Model name passed to the summarizer
# model = "claude-sonnet-4-20250514"

[sources.claude_code]
# path = "~/.claude/projects"
# min_lines = 10
# include_subagents = true

[sources.claude_ai]
# path = "~/.claude/claude-ai/cache/conversations"
# pattern = "*.json"

[sources.cloud_sessions]
# path = "~/.claude/claude-ai/cache/sessions"

[sources.handoffs]
# path = "~/.claude/handoffs"
# pattern = "**/*.md"

# Notebook roots support multiple named entries:
# [sources.local_md.notes]
# path = "~/Notes"
# pattern = "**/*.md"

# [sources.knowledge.repos]
# path = "~/.claude/memory/knowledge"

[sources.beads]
# paths = ["~/Repos/*/.beads/issues.jsonl"]

[sources.arc]
# paths = ["~/Repos/*/.arc/items.jsonl"]

[sources.amp]
# path = "~/.local/share/amp/threads"

[processing]
# max_content_chars = 80000
# semantic_chunk_min = 15000
# semantic_chunk_max = 80000
# semantic_chunk_target = 40000
# oracle_timeout_secs = 120

[search]
# default_results = 5
"#;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template)?;

    eprintln!("Created config file: {}", path.display());
    eprintln!();
    eprintln!("Edit it directly, or use:");
    eprintln!("  memoir set sources.claude_code.path ~/.claude/projects");
    eprintln!("  memoir get");

    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn config_path() -> Result<PathBuf, MemoirError> {
    let home = dirs::home_dir()
        .ok_or_else(|| MemoirError::Other("Cannot determine home directory".into()))?;
    Ok(home.join(".config/memoir/config.toml"))
}

fn read_config_file() -> Result<String, MemoirError> {
    let path = config_path()?;
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MemoirError::Other(format!("Config file not found: {}", path.display()))
        } else {
            MemoirError::Io(e)
        }
    })
}

fn write_config_file(content: &str) -> Result<(), MemoirError> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(())
}

fn split_key(key: &str) -> Result<(Vec<String>, String), MemoirError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(MemoirError::Other(format!("Invalid key: {key}")));
    }
    let field = parts[parts.len() - 1].to_string();
    let table_path = parts[..parts.len() - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    Ok((table_path, field))
}

fn resolve_key<'a>(doc: &'a DocumentMut, key: &str) -> Option<&'a toml_edit::Item> {
    let mut current: &toml_edit::Item = doc.as_item();
    for part in key.split('.') {
        current = current.as_table_like()?.get(part)?;
    }
    Some(current)
}

fn format_item(item: &toml_edit::Item) -> String {
    match item {
        toml_edit::Item::Value(v) => format_value(v),
        toml_edit::Item::Table(t) => {
            let mut entries = Vec::new();
            collect_entries(t, "", &mut entries);
            entries
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => other.to_string(),
    }
}

fn collect_entries(table: &toml_edit::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, item) in table.iter() {
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match item {
            toml_edit::Item::Value(v) => out.push((full_key, format_value(v))),
            toml_edit::Item::Table(t) => collect_entries(t, &full_key, out),
            _ => {}
        }
    }
}

fn format_value(v: &toml_edit::Value) -> String {
    match v {
        toml_edit::Value::String(s) => s.value().clone(),
        toml_edit::Value::Integer(i) => i.value().to_string(),
        toml_edit::Value::Float(f) => f.value().to_string(),
        toml_edit::Value::Boolean(b) => b.value().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn infer_value(s: &str) -> toml_edit::Value {
    if s == "true" {
        return toml_edit::Value::from(true);
    }
    if s == "false" {
        return toml_edit::Value::from(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml_edit::Value::from(n);
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return toml_edit::Value::from(f);
        }
    }
    toml_edit::Value::from(s)
}

/// Expand a leading `~` or `~/` prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_simple() {
        let (table, field) = split_key("db").unwrap();
        assert!(table.is_empty());
        assert_eq!(field, "db");
    }

    #[test]
    fn test_split_key_nested() {
        let (table, field) = split_key("sources.claude_code.path").unwrap();
        assert_eq!(table, vec!["sources", "claude_code"]);
        assert_eq!(field, "path");
    }

    #[test]
    fn test_split_key_empty_segment_errors() {
        assert!(split_key("a..b").is_err());
        assert!(split_key(".a").is_err());
        assert!(split_key("a.").is_err());
    }

    #[test]
    fn test_infer_value_types() {
        assert_eq!(infer_value("true").as_bool(), Some(true));
        assert_eq!(infer_value("42").as_integer(), Some(42));
        assert!(infer_value("3.14").as_float().is_some());
        assert_eq!(infer_value("hello world").as_str(), Some("hello world"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/projects"), home.join("projects"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
db = "~/custom/index.db"

[sources.claude_code]
path = "~/.claude/projects"
min_lines = 20

[sources.local_md.notes]
path = "~/Notes"
pattern = "**/*.md"

[processing]
semantic_chunk_min = 12000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db.as_deref(), Some("~/custom/index.db"));
        assert_eq!(
            config.sources.claude_code.path.as_deref(),
            Some("~/.claude/projects")
        );
        assert_eq!(config.sources.claude_code.min_lines, Some(20));
        assert!(config.sources.local_md.contains_key("notes"));
        // Unspecified processing fields keep their defaults.
        assert_eq!(config.processing.semantic_chunk_min, 12_000);
        assert_eq!(config.processing.semantic_chunk_max, 80_000);
        assert_eq!(config.processing.oracle_timeout_secs, 120);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.db.is_none());
        assert_eq!(config.processing.max_content_chars, 80_000);
        assert_eq!(config.search.default_results, 5);
        assert!(config.db_path().ends_with(".local/share/memoir/index.db"));
    }

    #[test]
    fn test_source_entry_path_or() {
        let entry = SourceEntry::default();
        let home = dirs::home_dir().unwrap();
        assert_eq!(entry.path_or("~/.claude/projects"), home.join(".claude/projects"));

        let entry = SourceEntry {
            path: Some("/data/sessions".to_string()),
            ..Default::default()
        };
        assert_eq!(entry.path_or("~/.claude/projects"), PathBuf::from("/data/sessions"));
    }

    #[test]
    fn test_resolve_key_nested() {
        let doc: DocumentMut = "[sources.claude_code]\npath = \"x\"".parse().unwrap();
        assert!(resolve_key(&doc, "sources.claude_code.path").is_some());
        assert!(resolve_key(&doc, "sources.nothing").is_none());
    }
}
