//! End-to-end: fixtures on disk → scan → search → maintenance.

use std::fs;
use std::path::Path;

use memoir::config::{Config, SourceEntry};
use memoir::db::{Database, SearchOptions};
use memoir::glossary::Glossary;
use memoir::query;
use memoir::record::SourceType;
use memoir::scan;

const SESSION: &str = concat!(
    r#"{"type":"user","sessionId":"e2e-session","timestamp":"2026-02-01T09:00:00Z","cwd":"/Users/jane/Repos/demo","message":{"role":"user","content":"profile the ingest hot path"}}"#,
    "\n",
    r#"{"type":"assistant","timestamp":"2026-02-01T09:02:00Z","message":{"role":"assistant","content":[{"type":"text","text":"the allocator churn is in the tokenizer"},{"type":"tool_use","name":"Read","input":{"file_path":"/src/tokenizer.rs"}}]}}"#,
    "\n",
    r#"{"type":"user","timestamp":"2026-02-01T09:03:00Z","toolUseResult":{},"message":{"role":"user","content":[{"type":"tool_result","content":"fn next_token ..."}]}}"#,
);

const HANDOFF: &str = "# Handoff — 2026-01-20 (momentum)\n\n\
    ## Done\n- Testing the draw-down pattern against live data\n\n\
    ## Next\nvalidate the rollback path\n";

const NOTE: &str = "# Capacity planning\n\nUnrelated content about quarterly forecasts.\n";

fn fixture_config(root: &Path) -> Config {
    let projects = root.join("projects/-Users-jane-Repos-demo");
    fs::create_dir_all(&projects).unwrap();
    fs::write(projects.join("e2e-session.jsonl"), SESSION).unwrap();

    let handoffs = root.join("handoffs/-Users-jane-Repos-demo");
    fs::create_dir_all(&handoffs).unwrap();
    fs::write(handoffs.join("demo-2026-01-20-1030.md"), HANDOFF).unwrap();

    let notes = root.join("notes");
    fs::create_dir_all(&notes).unwrap();
    fs::write(notes.join("202601151200 capacity.md"), NOTE).unwrap();

    let mut config = Config::default();
    config.sources.claude_code.path = Some(root.join("projects").to_string_lossy().to_string());
    config.sources.handoffs.path = Some(root.join("handoffs").to_string_lossy().to_string());
    config.sources.local_md.insert(
        "notes".to_string(),
        SourceEntry {
            path: Some(notes.to_string_lossy().to_string()),
            ..Default::default()
        },
    );
    config
}

fn scan_all(db: &mut Database, config: &Config) -> Vec<scan::ScanCounts> {
    [SourceType::ClaudeCode, SourceType::Handoff, SourceType::LocalMd]
        .into_iter()
        .map(|t| {
            let report = scan::scan(db, config, Some(t), false).unwrap();
            report.by_type[0].1
        })
        .collect()
}

#[test]
fn test_scan_index_search_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fixture_config(tmp.path());
    let db_path = tmp.path().join("state/index.db");
    let mut db = Database::open(&db_path).unwrap();

    let counts = scan_all(&mut db, &config);
    assert_eq!(counts.iter().map(|c| c.new).sum::<usize>(), 3);
    assert_eq!(counts.iter().map(|c| c.errors).sum::<usize>(), 0);

    let stats = db.get_stats().unwrap();
    assert_eq!(stats.total_sources, 3);
    assert_eq!(stats.summaries, 3);
    assert!(db.verify_fts().unwrap().is_consistent());

    // The session round-trips with its identity fields intact.
    let session = db.get_source("claude_code:e2e-session").unwrap().unwrap();
    assert_eq!(session.source_type, "claude_code");
    assert_eq!(session.title.as_deref(), Some("profile the ingest hot path"));
    assert_eq!(session.project_path.as_deref(), Some("-Users-jane-Repos-demo"));
    assert_eq!(session.status, "processed");

    // Hyphen-safe search: `draw-down` must hit the handoff and nothing else.
    let compiled = query::compile("draw-down", &Glossary::default());
    let hits = db.search(&compiled, &SearchOptions::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].source_id.starts_with("handoff:"));

    // Wildcarded plain search reaches the note.
    let compiled = query::compile("forecast", &Glossary::default());
    let hits = db.search(&compiled, &SearchOptions::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_id, "local_md:202601151200 capacity.md");

    // File-path search finds the session that touched the file.
    let hits = db.search_files("tokenizer.rs", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_id, "claude_code:e2e-session");
}

#[test]
fn test_rescan_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fixture_config(tmp.path());
    let mut db = Database::open(tmp.path().join("index.db")).unwrap();

    scan_all(&mut db, &config);
    let before = db.get_source("claude_code:e2e-session").unwrap().unwrap();

    let counts = scan_all(&mut db, &config);
    assert_eq!(counts.iter().map(|c| c.unchanged).sum::<usize>(), 3);
    assert_eq!(counts.iter().map(|c| c.new + c.updated).sum::<usize>(), 0);

    let after = db.get_source("claude_code:e2e-session").unwrap().unwrap();
    assert_eq!(before.content_hash, after.content_hash);
    assert_eq!(before.updated_at, after.updated_at);
    assert!(db.verify_fts().unwrap().is_consistent());
}

#[test]
fn test_reopen_runs_migrations_and_keeps_data() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fixture_config(tmp.path());
    let db_path = tmp.path().join("index.db");

    {
        let mut db = Database::open(&db_path).unwrap();
        scan_all(&mut db, &config);
    }

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.get_stats().unwrap().total_sources, 3);
    let hits = db.search("tokenizer*", &SearchOptions::default()).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_prune_and_delete_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fixture_config(tmp.path());
    let mut db = Database::open(tmp.path().join("index.db")).unwrap();
    scan_all(&mut db, &config);

    // Remove the note from disk; prune marks it stale but keeps it
    // searchable.
    fs::remove_dir_all(tmp.path().join("notes")).unwrap();
    let stale = scan::find_stale(&db, None).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].source_type, "local_md");
    scan::prune(&mut db, &stale, false).unwrap();

    let hits = db.search("forecasts*", &SearchOptions::default()).unwrap();
    assert_eq!(hits.len(), 1);

    // Hard delete removes every trace of the session.
    let row = db.get_source("claude_code:e2e-session").unwrap().unwrap();
    scan::prune(&mut db, &[row], true).unwrap();
    assert!(db.get_source("claude_code:e2e-session").unwrap().is_none());
    assert!(db.search_files("tokenizer.rs", 10).unwrap().is_empty());
    assert!(db.verify_fts().unwrap().is_consistent());
    assert_eq!(db.get_stats().unwrap().total_sources, 2);
}
