//! SQLite storage for the conversation memory index.
//!
//! Schema:
//! - `sources`: metadata for every indexed artifact
//! - `summaries`: the searchable text per source
//! - `summaries_fts`: FTS5 mirror of summaries, maintained by triggers
//! - `extractions`: structured digests
//! - `file_mentions` / `files_fts`: file-path search index
//! - `source_entities` / `pending_entities`: glossary entity mentions
//!
//! The summaries FTS table is *standalone*: rows are authored solely by the
//! triggers, which join `sources` to pull the title, and deletions are plain
//! `DELETE ... WHERE rowid`. It must not be declared with external content
//! (`content='summaries'`) — that mode expects the special
//! `INSERT ... VALUES('delete', ...)` bookkeeping and silently corrupts the
//! index when fed regular deletes. `files_fts` carries no joined columns and
//! does use external-content mode, exactly like its base table allows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::error::MemoirError;
use crate::extraction::Extraction;
use crate::record::{Record, SourceType};

/// Upper bound on stored raw conversation text, enforced on every write.
pub const RAW_TEXT_CAP: usize = 100_000;

const SCHEMA: &str = r#"
-- Sources: metadata for everything we've seen
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,              -- composite: type:identifier
    source_type TEXT NOT NULL,
    title TEXT,
    path TEXT,                        -- where to find it; NULL for virtual sources
    content_hash TEXT,                -- change-detection key
    created_at TEXT,
    updated_at TEXT,
    is_subagent BOOLEAN DEFAULT FALSE,
    project_path TEXT,
    metadata TEXT,                    -- JSON blob: tool usage, files touched, commits
    discovered_at TEXT DEFAULT CURRENT_TIMESTAMP,
    processed_at TEXT,
    status TEXT DEFAULT 'pending'     -- pending, processed, skipped, failed, stale
);

-- Summaries: what we index and search
CREATE TABLE IF NOT EXISTS summaries (
    source_id TEXT PRIMARY KEY REFERENCES sources(id),
    summary_text TEXT NOT NULL,
    raw_text TEXT,                    -- full conversation text, capped
    title TEXT,                       -- denormalized; FTS triggers join sources instead
    has_presummary BOOLEAN DEFAULT FALSE,
    word_count INTEGER,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Full-text search index. Standalone mode: triggers keep it in sync and the
-- title column comes from sources via JOIN, which external-content mode
-- cannot express.
CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
    source_id,
    title,
    summary_text,
    raw_text
);

CREATE TRIGGER IF NOT EXISTS summaries_ai AFTER INSERT ON summaries BEGIN
    INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
    SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
    FROM summaries s JOIN sources src ON s.source_id = src.id
    WHERE s.source_id = NEW.source_id;
END;

-- Standalone table: plain DELETE by rowid, never the 'delete' insert syntax.
CREATE TRIGGER IF NOT EXISTS summaries_ad AFTER DELETE ON summaries BEGIN
    DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
END;

CREATE TRIGGER IF NOT EXISTS summaries_au AFTER UPDATE ON summaries BEGIN
    DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
    INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
    SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
    FROM summaries s JOIN sources src ON s.source_id = src.id
    WHERE s.source_id = NEW.source_id;
END;

-- Entity mentions resolved against the glossary
CREATE TABLE IF NOT EXISTS source_entities (
    source_id TEXT REFERENCES sources(id),
    entity_id TEXT NOT NULL,
    mention_text TEXT NOT NULL,
    confidence REAL,
    PRIMARY KEY (source_id, entity_id, mention_text)
);

-- Entities awaiting human resolution
CREATE TABLE IF NOT EXISTS pending_entities (
    id INTEGER PRIMARY KEY,
    mention_text TEXT NOT NULL,
    source_id TEXT REFERENCES sources(id),
    suggested_entity TEXT,
    confidence REAL,
    status TEXT DEFAULT 'pending',    -- pending, resolved, rejected
    resolution TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Structured digests from conversations
CREATE TABLE IF NOT EXISTS extractions (
    source_id TEXT PRIMARY KEY REFERENCES sources(id),
    summary TEXT,
    arc TEXT,                         -- JSON: started_with, key_turns, ended_at
    builds TEXT,                      -- JSON array
    learnings TEXT,                   -- JSON array
    friction TEXT,                    -- JSON array
    patterns TEXT,                    -- JSON array
    open_threads TEXT,                -- JSON array
    model_used TEXT,
    extracted_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Files touched per source, for file-based search
CREATE TABLE IF NOT EXISTS file_mentions (
    id INTEGER PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id),
    file_path TEXT NOT NULL,
    operation TEXT,                   -- 'read', 'edit', 'write', or NULL
    UNIQUE(source_id, file_path)
);

CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    file_path,
    content='file_mentions',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS file_mentions_ai AFTER INSERT ON file_mentions BEGIN
    INSERT INTO files_fts(rowid, file_path) VALUES (NEW.id, NEW.file_path);
END;

CREATE TRIGGER IF NOT EXISTS file_mentions_ad AFTER DELETE ON file_mentions BEGIN
    INSERT INTO files_fts(files_fts, rowid, file_path) VALUES('delete', OLD.id, OLD.file_path);
END;

-- Indexes
CREATE INDEX IF NOT EXISTS idx_sources_type ON sources(source_type);
CREATE INDEX IF NOT EXISTS idx_sources_status ON sources(status);
CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_entities(status);
CREATE INDEX IF NOT EXISTS idx_source_entities_entity ON source_entities(entity_id);
CREATE INDEX IF NOT EXISTS idx_extractions_model ON extractions(model_used);
CREATE INDEX IF NOT EXISTS idx_file_mentions_source ON file_mentions(source_id);
"#;

/// A search hit from the summaries FTS index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub source_id: String,
    pub source_type: String,
    pub title: Option<String>,
    pub summary_text: String,
    pub created_at: Option<String>,
    /// BM25 relevance; zero is a perfect match, scores grow negative.
    pub rank: f64,
}

/// Search filters and limits.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub source_type: Option<SourceType>,
    /// Substring predicate on `sources.project_path`.
    pub project_path: Option<String>,
    pub limit: usize,
    /// Half-life in days for recency decay; `None` disables it.
    pub recency_half_life: Option<i64>,
}

/// A hit from the file-path search index.
#[derive(Debug, Clone)]
pub struct FileHit {
    pub source_id: String,
    pub file_path: String,
    pub operation: Option<String>,
    pub source_type: String,
    pub title: Option<String>,
    pub created_at: Option<String>,
}

/// A persisted source row.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: String,
    pub source_type: String,
    pub title: Option<String>,
    pub path: Option<String>,
    pub content_hash: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub is_subagent: bool,
    pub project_path: Option<String>,
    pub metadata: Option<Value>,
    pub processed_at: Option<String>,
    pub status: String,
}

/// A pending entity awaiting resolution.
#[derive(Debug, Clone)]
pub struct PendingEntity {
    pub id: i64,
    pub mention_text: String,
    pub source_id: Option<String>,
    pub suggested_entity: Option<String>,
    pub confidence: Option<f64>,
    pub source_title: Option<String>,
}

/// Database statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_sources: i64,
    pub by_type: Vec<(String, i64)>,
    pub by_status: Vec<(String, i64)>,
    pub summaries: i64,
    pub extractions: i64,
    pub file_mentions: i64,
    pub pending_entities: i64,
}

/// Result of an FTS consistency check.
#[derive(Debug, Clone, Default)]
pub struct FtsReport {
    pub summaries: i64,
    pub fts_entries: i64,
    /// In FTS but no longer in summaries.
    pub orphaned: Vec<String>,
    /// In summaries but absent from FTS.
    pub missing: Vec<String>,
}

impl FtsReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.missing.is_empty() && self.summaries == self.fts_entries
    }
}

/// Single-writer database handle. One connection per process; triggers keep
/// the FTS mirrors in lock-step with every base-table write in the same
/// transaction.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database at `path`, creating parent directories,
    /// and run the idempotent schema + migration set.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database, MemoirError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let mut db = Database {
            conn,
            path: Some(path),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Database, MemoirError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Database { conn, path: None };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&mut self) -> Result<(), MemoirError> {
        self.conn.execute("PRAGMA foreign_keys = ON", [])?;
        self.conn.execute_batch(SCHEMA)?;
        self.migrate_schema()?;
        Ok(())
    }

    /// Idempotent, order-independent migrations: each is an additive
    /// alteration guarded by try-and-ignore, so running the set against any
    /// prior schema version converges on the current one.
    fn migrate_schema(&mut self) -> Result<(), MemoirError> {
        // Migration 1: metadata column on sources.
        let _ = self
            .conn
            .execute("ALTER TABLE sources ADD COLUMN metadata TEXT", []);

        // Migration 2: raw_text column on summaries.
        let _ = self
            .conn
            .execute("ALTER TABLE summaries ADD COLUMN raw_text TEXT", []);

        // Migration 3: repair summary triggers written for external-content
        // mode. The old delete trigger used INSERT ... VALUES('delete', ...),
        // which corrupts a standalone FTS5 table. Detect the old form by its
        // stored definition and recreate both triggers atomically.
        let old_form: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='trigger' AND name='summaries_ad'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if old_form.is_some_and(|sql| sql.contains("VALUES('delete'")) {
            self.conn.execute_batch(
                r#"
                DROP TRIGGER IF EXISTS summaries_ad;
                DROP TRIGGER IF EXISTS summaries_au;
                CREATE TRIGGER summaries_ad AFTER DELETE ON summaries BEGIN
                    DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
                END;
                CREATE TRIGGER summaries_au AFTER UPDATE ON summaries BEGIN
                    DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
                    INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
                    SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
                    FROM summaries s JOIN sources src ON s.source_id = src.id
                    WHERE s.source_id = NEW.source_id;
                END;
                "#,
            )?;
        }

        Ok(())
    }

    // ── Source operations ────────────────────────────────────────────────────

    /// Insert or update a source from a record.
    pub fn upsert_source(&self, record: &Record) -> Result<(), MemoirError> {
        upsert_source_tx(&self.conn, record)
    }

    pub fn get_source(&self, source_id: &str) -> Result<Option<SourceRow>, MemoirError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, source_type, title, path, content_hash, created_at, updated_at,
                        is_subagent, project_path, metadata, processed_at, status
                 FROM sources WHERE id = ?1",
                params![source_id],
                map_source_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn source_exists(&self, source_id: &str) -> Result<bool, MemoirError> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sources WHERE id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    pub fn list_sources(
        &self,
        source_type: Option<SourceType>,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRow>, MemoirError> {
        let mut sql = String::from(
            "SELECT id, source_type, title, path, content_hash, created_at, updated_at,
                    is_subagent, project_path, metadata, processed_at, status
             FROM sources WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(t) = source_type {
            sql.push_str(" AND source_type = ?");
            args.push(Box::new(t.as_str().to_string()));
        }
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(s.to_string()));
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), map_source_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_processed(&self, source_id: &str) -> Result<(), MemoirError> {
        mark_processed_tx(&self.conn, source_id)
    }

    /// Mark a source stale (its path no longer exists). Summaries and
    /// extractions are preserved for continued search value.
    pub fn mark_stale(&self, source_id: &str) -> Result<bool, MemoirError> {
        let changed = self.conn.execute(
            "UPDATE sources SET status = 'stale' WHERE id = ?1",
            params![source_id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_stale_batch(&self, source_ids: &[String]) -> Result<usize, MemoirError> {
        let mut count = 0;
        let mut stmt = self
            .conn
            .prepare("UPDATE sources SET status = 'stale' WHERE id = ?1")?;
        for id in source_ids {
            count += stmt.execute(params![id])?;
        }
        Ok(count)
    }

    /// Delete a source and every row referencing it, child-first, in one
    /// transaction. The summary delete fires the FTS cleanup trigger.
    pub fn delete_source(&mut self, source_id: &str) -> Result<bool, MemoirError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM file_mentions WHERE source_id = ?1",
            params![source_id],
        )?;
        tx.execute(
            "DELETE FROM pending_entities WHERE source_id = ?1",
            params![source_id],
        )?;
        tx.execute(
            "DELETE FROM source_entities WHERE source_id = ?1",
            params![source_id],
        )?;
        tx.execute(
            "DELETE FROM extractions WHERE source_id = ?1",
            params![source_id],
        )?;
        tx.execute(
            "DELETE FROM summaries WHERE source_id = ?1",
            params![source_id],
        )?;
        let deleted = tx.execute("DELETE FROM sources WHERE id = ?1", params![source_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Sources that carry a filesystem path, for the prune operation.
    pub fn get_sources_with_paths(
        &self,
        source_type: Option<SourceType>,
        include_stale: bool,
    ) -> Result<Vec<SourceRow>, MemoirError> {
        let mut sql = String::from(
            "SELECT id, source_type, title, path, content_hash, created_at, updated_at,
                    is_subagent, project_path, metadata, processed_at, status
             FROM sources WHERE path IS NOT NULL",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !include_stale {
            sql.push_str(" AND (status IS NULL OR status != 'stale')");
        }
        if let Some(t) = source_type {
            sql.push_str(" AND source_type = ?");
            args.push(Box::new(t.as_str().to_string()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), map_source_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Summary operations ───────────────────────────────────────────────────

    /// Insert or update a summary. `raw_text` is capped at [`RAW_TEXT_CAP`];
    /// a missing title is denormalized from the source row.
    pub fn upsert_summary(
        &self,
        source_id: &str,
        summary_text: &str,
        has_presummary: bool,
        raw_text: Option<&str>,
        title: Option<&str>,
    ) -> Result<(), MemoirError> {
        upsert_summary_tx(
            &self.conn,
            source_id,
            summary_text,
            has_presummary,
            raw_text,
            title,
        )
    }

    pub fn get_raw_text(&self, source_id: &str) -> Result<Option<String>, MemoirError> {
        let row: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT raw_text FROM summaries WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.flatten())
    }

    /// Overwrite just the searchable summary text; the update trigger
    /// refreshes the FTS row.
    pub fn update_summary_text(
        &self,
        source_id: &str,
        summary_text: &str,
    ) -> Result<bool, MemoirError> {
        let changed = self.conn.execute(
            "UPDATE summaries SET summary_text = ?1 WHERE source_id = ?2",
            params![summary_text, source_id],
        )?;
        Ok(changed > 0)
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    /// Write one record's source, summary, and file mentions and mark it
    /// processed, all in a single transaction. A mid-write failure leaves
    /// the prior state intact.
    pub fn ingest_record(&mut self, record: &Record) -> Result<(), MemoirError> {
        let tx = self.conn.transaction()?;
        upsert_source_tx(&tx, record)?;
        upsert_summary_tx(
            &tx,
            &record.source_id,
            &record.summary_text,
            record.has_presummary,
            Some(record.full_text.as_str()),
            Some(record.title.as_str()),
        )?;
        if !record.files_touched.is_empty() {
            add_file_mentions_tx(&tx, &record.source_id, &record.files_touched, None)?;
        }
        mark_processed_tx(&tx, &record.source_id)?;
        tx.commit()?;
        Ok(())
    }

    // ── Extraction operations ────────────────────────────────────────────────

    /// Insert or update a structured digest. A non-empty digest summary is
    /// also copied into `summaries.summary_text`, which re-fires the summary
    /// triggers and refreshes the FTS row.
    pub fn upsert_extraction(
        &mut self,
        source_id: &str,
        extraction: &Extraction,
    ) -> Result<(), MemoirError> {
        fn json_or_null(values: &[Value]) -> Option<String> {
            if values.is_empty() {
                None
            } else {
                serde_json::to_string(values).ok()
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO extractions (
                source_id, summary, arc, builds, learnings,
                friction, patterns, open_threads, model_used
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(source_id) DO UPDATE SET
                summary = excluded.summary,
                arc = excluded.arc,
                builds = excluded.builds,
                learnings = excluded.learnings,
                friction = excluded.friction,
                patterns = excluded.patterns,
                open_threads = excluded.open_threads,
                model_used = excluded.model_used,
                extracted_at = CURRENT_TIMESTAMP",
            params![
                source_id,
                extraction.summary,
                extraction
                    .arc
                    .as_ref()
                    .and_then(|v| serde_json::to_string(v).ok()),
                json_or_null(&extraction.builds),
                json_or_null(&extraction.learnings),
                json_or_null(&extraction.friction),
                json_or_null(&extraction.patterns),
                json_or_null(&extraction.open_threads),
                extraction.model_used,
            ],
        )?;

        if let Some(summary) = &extraction.summary {
            if !summary.is_empty() {
                tx.execute(
                    "UPDATE summaries SET summary_text = ?1 WHERE source_id = ?2",
                    params![summary, source_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_extraction(&self, source_id: &str) -> Result<Option<Extraction>, MemoirError> {
        fn parse_array(text: Option<String>) -> Vec<Value> {
            text.and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default()
        }

        let row = self
            .conn
            .query_row(
                "SELECT summary, arc, builds, learnings, friction, patterns,
                        open_threads, model_used, extracted_at
                 FROM extractions WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok(Extraction {
                        summary: row.get(0)?,
                        arc: row
                            .get::<_, Option<String>>(1)?
                            .and_then(|t| serde_json::from_str(&t).ok()),
                        builds: parse_array(row.get(2)?),
                        learnings: parse_array(row.get(3)?),
                        friction: parse_array(row.get(4)?),
                        patterns: parse_array(row.get(5)?),
                        open_threads: parse_array(row.get(6)?),
                        model_used: row.get(7)?,
                        extracted_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn has_extraction(&self, source_id: &str) -> Result<bool, MemoirError> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM extractions WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Processed sources that still lack an extraction, oldest first.
    pub fn sources_without_extraction(
        &self,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<SourceRow>, MemoirError> {
        let mut sql = String::from(
            "SELECT s.id, s.source_type, s.title, s.path, s.content_hash, s.created_at,
                    s.updated_at, s.is_subagent, s.project_path, s.metadata, s.processed_at,
                    s.status
             FROM sources s
             LEFT JOIN extractions e ON s.id = e.source_id
             WHERE e.source_id IS NULL AND s.status = 'processed'",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(t) = source_type {
            sql.push_str(" AND s.source_type = ?");
            args.push(Box::new(t.as_str().to_string()));
        }
        sql.push_str(" ORDER BY s.created_at ASC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), map_source_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Source ids that have an extraction, for the sync-fts maintenance pass.
    pub fn sources_with_extraction(&self) -> Result<Vec<String>, MemoirError> {
        let mut stmt = self.conn.prepare("SELECT source_id FROM extractions")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    // ── Search operations ────────────────────────────────────────────────────

    /// Full-text search over summaries. `query` must already be compiled
    /// (see [`crate::query::compile`]).
    ///
    /// With a recency half-life, 20× the limit is fetched and re-ranked by
    /// `rank * 0.5^(age_days / half_life)` before truncation; rows with an
    /// unparsable `created_at` keep their original rank.
    pub fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>, MemoirError> {
        let limit = if opts.limit == 0 { 5 } else { opts.limit };

        let mut sql = String::from(
            "SELECT s.source_id, src.source_type, src.title, s.summary_text,
                    src.created_at, bm25(summaries_fts) AS rank
             FROM summaries_fts
             JOIN summaries s ON summaries_fts.rowid = s.rowid
             JOIN sources src ON s.source_id = src.id
             WHERE summaries_fts MATCH ?",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.to_string())];

        if let Some(t) = opts.source_type {
            sql.push_str(" AND src.source_type = ?");
            args.push(Box::new(t.as_str().to_string()));
        }
        if let Some(project) = &opts.project_path {
            sql.push_str(" AND src.project_path LIKE ?");
            args.push(Box::new(format!("%{project}%")));
        }

        let fetch_limit = if opts.recency_half_life.is_some() {
            limit * 20
        } else {
            limit
        };
        sql.push_str(" ORDER BY rank LIMIT ?");
        args.push(Box::new(fetch_limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut results = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(SearchResult {
                    source_id: row.get(0)?,
                    source_type: row.get(1)?,
                    title: row.get(2)?,
                    summary_text: row.get(3)?,
                    created_at: row.get(4)?,
                    rank: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(half_life) = opts.recency_half_life {
            let now = Utc::now();
            for r in &mut results {
                if let Some(created) = r.created_at.as_deref() {
                    if let Ok(parsed) = DateTime::parse_from_rfc3339(created) {
                        let days_old = (now - parsed.with_timezone(&Utc)).num_days();
                        let decay = 0.5f64.powf(days_old as f64 / half_life as f64);
                        // BM25 scores are negative (closer to zero = better),
                        // so decay multiplies toward zero for old rows.
                        r.rank *= decay;
                    }
                }
            }
            results.sort_by(|a, b| a.rank.total_cmp(&b.rank));
            results.truncate(limit);
        }

        Ok(results)
    }

    /// Search sources by file path. A query containing a `.` is wrapped in
    /// quotes so extensions read as literals, not FTS syntax.
    pub fn search_files(&self, query: &str, limit: usize) -> Result<Vec<FileHit>, MemoirError> {
        let query = if query.contains('.') && !query.starts_with('"') {
            format!("\"{query}\"")
        } else {
            query.to_string()
        };

        let mut stmt = self.conn.prepare(
            "SELECT fm.source_id, fm.file_path, fm.operation,
                    src.source_type, src.title, src.created_at
             FROM files_fts
             JOIN file_mentions fm ON files_fts.rowid = fm.id
             JOIN sources src ON fm.source_id = src.id
             WHERE files_fts MATCH ?1
             ORDER BY src.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![query, limit as i64], |row| {
                Ok(FileHit {
                    source_id: row.get(0)?,
                    file_path: row.get(1)?,
                    operation: row.get(2)?,
                    source_type: row.get(3)?,
                    title: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── File mention operations ──────────────────────────────────────────────

    /// Add file mentions for a source, ignoring duplicates. Returns the
    /// number of new rows.
    pub fn add_file_mentions_batch(
        &self,
        source_id: &str,
        file_paths: &[String],
        operation: Option<&str>,
    ) -> Result<usize, MemoirError> {
        add_file_mentions_tx(&self.conn, source_id, file_paths, operation)
    }

    pub fn get_files_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<(String, Option<String>)>, MemoirError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, operation FROM file_mentions
             WHERE source_id = ?1 ORDER BY file_path",
        )?;
        let rows = stmt
            .query_map(params![source_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Entity operations ────────────────────────────────────────────────────

    pub fn add_source_entity(
        &self,
        source_id: &str,
        entity_id: &str,
        mention_text: &str,
        confidence: f64,
    ) -> Result<(), MemoirError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO source_entities
             (source_id, entity_id, mention_text, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![source_id, entity_id, mention_text, confidence],
        )?;
        Ok(())
    }

    /// Queue an entity mention for later resolution; returns its row id.
    pub fn queue_pending_entity(
        &self,
        mention_text: &str,
        source_id: &str,
        suggested_entity: Option<&str>,
        confidence: f64,
    ) -> Result<i64, MemoirError> {
        self.conn.execute(
            "INSERT INTO pending_entities
             (mention_text, source_id, suggested_entity, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![mention_text, source_id, suggested_entity, confidence],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_pending_entities(&self, limit: usize) -> Result<Vec<PendingEntity>, MemoirError> {
        let mut stmt = self.conn.prepare(
            "SELECT pe.id, pe.mention_text, pe.source_id, pe.suggested_entity,
                    pe.confidence, src.title
             FROM pending_entities pe
             LEFT JOIN sources src ON pe.source_id = src.id
             WHERE pe.status = 'pending'
             ORDER BY pe.confidence DESC, pe.created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PendingEntity {
                    id: row.get(0)?,
                    mention_text: row.get(1)?,
                    source_id: row.get(2)?,
                    suggested_entity: row.get(3)?,
                    confidence: row.get(4)?,
                    source_title: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn resolve_pending_entity(
        &self,
        pending_id: i64,
        resolution: Option<&str>,
        status: &str,
    ) -> Result<(), MemoirError> {
        self.conn.execute(
            "UPDATE pending_entities SET status = ?1, resolution = ?2 WHERE id = ?3",
            params![status, resolution, pending_id],
        )?;
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    pub fn get_stats(&self) -> Result<Stats, MemoirError> {
        let count = |sql: &str| -> Result<i64, rusqlite::Error> {
            self.conn.query_row(sql, [], |row| row.get(0))
        };

        let grouped = |sql: &str| -> Result<Vec<(String, i64)>, rusqlite::Error> {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };

        Ok(Stats {
            total_sources: count("SELECT COUNT(*) FROM sources")?,
            by_type: grouped(
                "SELECT source_type, COUNT(*) FROM sources GROUP BY source_type ORDER BY 2 DESC",
            )?,
            by_status: grouped("SELECT status, COUNT(*) FROM sources GROUP BY status")?,
            summaries: count("SELECT COUNT(*) FROM summaries")?,
            extractions: count("SELECT COUNT(*) FROM extractions")?,
            file_mentions: count("SELECT COUNT(*) FROM file_mentions")?,
            pending_entities: count(
                "SELECT COUNT(*) FROM pending_entities WHERE status = 'pending'",
            )?,
        })
    }

    /// Check the summaries FTS mirror against its base table.
    pub fn verify_fts(&self) -> Result<FtsReport, MemoirError> {
        let summaries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))?;
        let fts_entries: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM summaries_fts", [], |row| row.get(0))?;

        let collect = |sql: &str| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        };

        Ok(FtsReport {
            summaries,
            fts_entries,
            orphaned: collect(
                "SELECT source_id FROM summaries_fts
                 WHERE source_id NOT IN (SELECT source_id FROM summaries)",
            )?,
            missing: collect(
                "SELECT source_id FROM summaries
                 WHERE source_id NOT IN (SELECT source_id FROM summaries_fts)",
            )?,
        })
    }

    /// Rebuild the summaries FTS mirror from scratch: drop table and
    /// triggers, recreate, repopulate with one INSERT..SELECT. Returns the
    /// number of rows indexed.
    pub fn rebuild_fts(&mut self) -> Result<i64, MemoirError> {
        self.conn.execute_batch(
            r#"
            DROP TRIGGER IF EXISTS summaries_ai;
            DROP TRIGGER IF EXISTS summaries_ad;
            DROP TRIGGER IF EXISTS summaries_au;
            DROP TABLE IF EXISTS summaries_fts;
            CREATE VIRTUAL TABLE summaries_fts USING fts5(
                source_id,
                title,
                summary_text,
                raw_text
            );
            CREATE TRIGGER summaries_ai AFTER INSERT ON summaries BEGIN
                INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
                SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
                FROM summaries s JOIN sources src ON s.source_id = src.id
                WHERE s.source_id = NEW.source_id;
            END;
            CREATE TRIGGER summaries_ad AFTER DELETE ON summaries BEGIN
                DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
            END;
            CREATE TRIGGER summaries_au AFTER UPDATE ON summaries BEGIN
                DELETE FROM summaries_fts WHERE rowid = OLD.rowid;
                INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
                SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
                FROM summaries s JOIN sources src ON s.source_id = src.id
                WHERE s.source_id = NEW.source_id;
            END;
            INSERT INTO summaries_fts(rowid, source_id, title, summary_text, raw_text)
            SELECT s.rowid, s.source_id, src.title, s.summary_text, s.raw_text
            FROM summaries s
            JOIN sources src ON s.source_id = src.id;
            "#,
        )?;

        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM summaries_fts", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ── Transaction-scoped write helpers ─────────────────────────────────────────

fn upsert_source_tx(conn: &Connection, record: &Record) -> Result<(), MemoirError> {
    let metadata_json = if record.metadata.is_null() {
        None
    } else {
        Some(serde_json::to_string(&record.metadata)?)
    };

    conn.execute(
        "INSERT INTO sources (id, source_type, title, path, created_at, updated_at,
                              is_subagent, project_path, content_hash, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             path = excluded.path,
             updated_at = excluded.updated_at,
             content_hash = excluded.content_hash,
             metadata = excluded.metadata",
        params![
            record.source_id,
            record.source_type.as_str(),
            record.title,
            record.path,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
            record.is_subagent,
            record.project_path,
            record.content_hash,
            metadata_json,
        ],
    )?;
    Ok(())
}

fn upsert_summary_tx(
    conn: &Connection,
    source_id: &str,
    summary_text: &str,
    has_presummary: bool,
    raw_text: Option<&str>,
    title: Option<&str>,
) -> Result<(), MemoirError> {
    let word_count = summary_text.split_whitespace().count() as i64;
    let raw_text = raw_text.map(cap_raw_text).unwrap_or_default();

    let title = match title {
        Some(t) => Some(t.to_string()),
        None => conn
            .query_row(
                "SELECT title FROM sources WHERE id = ?1",
                params![source_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten(),
    };

    conn.execute(
        "INSERT INTO summaries (source_id, summary_text, has_presummary, word_count, raw_text, title)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(source_id) DO UPDATE SET
             summary_text = excluded.summary_text,
             has_presummary = excluded.has_presummary,
             word_count = excluded.word_count,
             raw_text = excluded.raw_text,
             title = excluded.title",
        params![source_id, summary_text, has_presummary, word_count, raw_text, title],
    )?;
    Ok(())
}

fn add_file_mentions_tx(
    conn: &Connection,
    source_id: &str,
    file_paths: &[String],
    operation: Option<&str>,
) -> Result<usize, MemoirError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO file_mentions (source_id, file_path, operation)
         VALUES (?1, ?2, ?3)",
    )?;
    let mut added = 0;
    for path in file_paths {
        added += stmt.execute(params![source_id, path, operation])?;
    }
    Ok(added)
}

fn mark_processed_tx(conn: &Connection, source_id: &str) -> Result<(), MemoirError> {
    conn.execute(
        "UPDATE sources SET status = 'processed', processed_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), source_id],
    )?;
    Ok(())
}

/// Truncate raw text to the storage cap on a character boundary.
fn cap_raw_text(text: &str) -> String {
    if text.len() <= RAW_TEXT_CAP {
        return text.to_string();
    }
    let mut end = RAW_TEXT_CAP;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn map_source_row(row: &rusqlite::Row<'_>) -> Result<SourceRow, rusqlite::Error> {
    Ok(SourceRow {
        id: row.get(0)?,
        source_type: row.get(1)?,
        title: row.get(2)?,
        path: row.get(3)?,
        content_hash: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        is_subagent: row.get(7)?,
        project_path: row.get(8)?,
        metadata: row
            .get::<_, Option<String>>(9)?
            .and_then(|t| serde_json::from_str(&t).ok()),
        processed_at: row.get(10)?,
        status: row.get(11)?,
    })
}
