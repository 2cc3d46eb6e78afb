//! Ingest pipeline: discovery, change detection, upserts, prune, backfill.
//!
//! Each scan pass walks every adapter (or one, when filtered), compares
//! each record's change key against the stored source, and writes changed
//! records in a per-source transaction. Individual failures are counted
//! and reported; a pass never aborts because one artifact was malformed.

use std::path::Path;

use crate::adapter;
use crate::adapter::session_log;
use crate::config::Config;
use crate::db::{Database, SourceRow};
use crate::error::MemoirError;
use crate::extraction::{Extraction, flatten_for_fts};
use crate::llm::{ExtractOptions, Summarizer, extract_digest};
use crate::record::{SourceType, truncate_title};

/// Per-type scan outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
}

/// Outcome of a whole scan pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub by_type: Vec<(SourceType, ScanCounts)>,
}

impl ScanReport {
    pub fn total_processed(&self) -> usize {
        self.by_type
            .iter()
            .map(|(_, c)| c.new + c.updated + c.unchanged)
            .sum()
    }

    pub fn total_errors(&self) -> usize {
        self.by_type.iter().map(|(_, c)| c.errors).sum()
    }
}

/// Discover and index every configured source.
///
/// A record whose `content_hash` matches the stored source is counted as
/// unchanged and skipped entirely. With `dry_run`, intended actions are
/// reported and nothing is written.
pub fn scan(
    db: &mut Database,
    config: &Config,
    filter: Option<SourceType>,
    dry_run: bool,
) -> Result<ScanReport, MemoirError> {
    let mut report = ScanReport::default();

    for adapter in adapter::all() {
        let source_type = adapter.source_type();
        if filter.is_some_and(|f| f != source_type) {
            continue;
        }

        eprintln!("Scanning {source_type}...");
        let mut counts = ScanCounts::default();

        for record in adapter.discover(config) {
            let existing = match db.get_source(&record.source_id) {
                Ok(row) => row,
                Err(e) => {
                    eprintln!("  error: {}: {e}", record.source_id);
                    counts.errors += 1;
                    continue;
                }
            };

            if let (Some(hash), Some(existing)) = (&record.content_hash, &existing) {
                if existing.content_hash.as_deref() == Some(hash.as_str()) {
                    counts.unchanged += 1;
                    continue;
                }
            }

            if dry_run {
                let action = if existing.is_some() { "update" } else { "new" };
                eprintln!(
                    "  [{action}] {}: {}",
                    record.source_id,
                    truncate_title(&record.title)
                );
                if existing.is_some() {
                    counts.updated += 1;
                } else {
                    counts.new += 1;
                }
                continue;
            }

            match db.ingest_record(&record) {
                Ok(()) => {
                    if existing.is_some() {
                        counts.updated += 1;
                    } else {
                        counts.new += 1;
                        eprintln!("  + {}", truncate_title(&record.title));
                    }
                }
                Err(e) => {
                    eprintln!("  error: {}: {e}", record.source_id);
                    counts.errors += 1;
                }
            }
        }

        eprintln!(
            "  {source_type}: {} new, {} updated, {} unchanged, {} errors",
            counts.new, counts.updated, counts.unchanged, counts.errors
        );
        report.by_type.push((source_type, counts));
    }

    Ok(report)
}

/// Sources whose filesystem path no longer exists. Virtual sources carry
/// no path and are never candidates; already-stale sources are excluded.
pub fn find_stale(
    db: &Database,
    source_type: Option<SourceType>,
) -> Result<Vec<SourceRow>, MemoirError> {
    let sources = db.get_sources_with_paths(source_type, false)?;
    Ok(sources
        .into_iter()
        .filter(|s| s.path.as_deref().is_some_and(|p| !Path::new(p).exists()))
        .collect())
}

/// Mark stale sources, or hard-delete them with all derived rows.
/// Returns the number of sources affected.
pub fn prune(
    db: &mut Database,
    stale: &[SourceRow],
    hard_delete: bool,
) -> Result<usize, MemoirError> {
    if hard_delete {
        let mut deleted = 0;
        for row in stale {
            if db.delete_source(&row.id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    } else {
        let ids: Vec<String> = stale.iter().map(|s| s.id.clone()).collect();
        db.mark_stale_batch(&ids)
    }
}

/// Run the extraction pipeline for one source and persist the digest.
///
/// Local session logs are re-parsed when still on disk so the chunker gets
/// message structure; everything else extracts from the stored raw text
/// with paragraph-split fallback. After a successful extraction the full
/// flatten replaces the searchable summary.
pub fn extract_source(
    db: &mut Database,
    config: &Config,
    oracle: &dyn Summarizer,
    source_id: &str,
) -> Result<Extraction, MemoirError> {
    let source = db
        .get_source(source_id)?
        .ok_or_else(|| MemoirError::SourceNotFound(source_id.to_string()))?;

    let reparse = source.source_type == SourceType::ClaudeCode.as_str();
    let (content, messages) = match source.path.as_deref() {
        Some(path) if reparse && Path::new(path).exists() => {
            let record = session_log::parse(Path::new(path))?;
            (record.full_text, record.messages)
        }
        _ => {
            let raw = db
                .get_raw_text(source_id)?
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    MemoirError::Other(format!("no indexed text for {source_id}; run scan first"))
                })?;
            (raw, Vec::new())
        }
    };

    let opts = ExtractOptions::from_config(&config.processing);
    let extraction = extract_digest(oracle, &content, &messages, &opts)?;
    db.upsert_extraction(source_id, &extraction)?;

    let flattened = flatten_for_fts(&extraction);
    if !flattened.is_empty() {
        db.update_summary_text(source_id, &flattened)?;
    }

    Ok(extraction)
}

/// Extract digests for processed sources that have none yet. Summarizer
/// failures are fatal per source, counted, and the batch continues.
/// Returns `(extracted, failed)`.
pub fn backfill(
    db: &mut Database,
    config: &Config,
    oracle: &dyn Summarizer,
    source_type: Option<SourceType>,
    limit: usize,
    dry_run: bool,
) -> Result<(usize, usize), MemoirError> {
    let candidates = db.sources_without_extraction(source_type, limit)?;

    if dry_run {
        for row in &candidates {
            eprintln!("  [pending] {}: {}", row.id, row.title.as_deref().unwrap_or(""));
        }
        return Ok((0, 0));
    }

    let mut extracted = 0;
    let mut failed = 0;
    for row in &candidates {
        match extract_source(db, config, oracle, &row.id) {
            Ok(_) => extracted += 1,
            Err(e) => {
                eprintln!("  error: {}: {e}", row.id);
                failed += 1;
            }
        }
    }
    Ok((extracted, failed))
}

/// Re-flatten every stored extraction into its searchable summary.
/// Returns the number of summaries updated.
pub fn sync_fts(db: &mut Database) -> Result<usize, MemoirError> {
    let ids = db.sources_with_extraction()?;
    let mut updated = 0;
    for id in ids {
        if let Some(extraction) = db.get_extraction(&id)? {
            let text = flatten_for_fts(&extraction);
            if !text.is_empty() && db.update_summary_text(&id, &text)? {
                updated += 1;
            }
        }
    }
    Ok(updated)
}
