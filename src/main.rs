//! CLI entry point for memoir.
//!
//! `main.rs` is the thin coordination layer between the CLI surface and the
//! library crate: parse arguments with `clap`, load configuration, open the
//! database, dispatch to the right library operation, and print results.
//! All functions return `Result<(), MemoirError>`; `main()` prints the
//! error to stderr and exits 1, so reporting stays consistent regardless of
//! which path failed.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::str::FromStr;

use clap::{Parser as ClapParser, Subcommand};

use memoir::config::{self, Config};
use memoir::db::{Database, SearchOptions};
use memoir::error::MemoirError;
use memoir::glossary::Glossary;
use memoir::llm::{ClaudeCli, DEFAULT_MODEL};
use memoir::record::SourceType;
use memoir::{query, scan};

#[derive(ClapParser)]
#[command(name = "memoir", about = "Searchable memory over AI coding sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover and index all configured sources
    Scan {
        /// Report intended actions without writing
        #[arg(long)]
        dry_run: bool,
        /// Only scan one source type (e.g. claude_code, handoff)
        #[arg(long = "type")]
        source_type: Option<String>,
    },
    /// Full-text search over indexed summaries
    Search {
        query: Vec<String>,
        #[arg(short = 't', long = "type")]
        source_type: Option<String>,
        /// Substring filter on the project path
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Recency half-life in days; recent results rank higher
        #[arg(long)]
        half_life: Option<i64>,
    },
    /// Search conversations by file path
    Files {
        query: String,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// List indexed sources
    List {
        #[arg(long = "type")]
        source_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Database statistics
    Status,
    /// Mark sources stale when their files are gone, or delete them
    Prune {
        #[arg(long)]
        dry_run: bool,
        #[arg(long = "type")]
        source_type: Option<String>,
        /// Hard-delete instead of marking stale (loses extractions)
        #[arg(long)]
        delete: bool,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Extract a structured digest for one source
    Extract {
        source_id: String,
        /// Model name passed to the summarizer
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Extract digests for processed sources that have none
    Backfill {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long = "type")]
        source_type: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Re-flatten stored digests into the search index
    SyncFts,
    /// Rebuild the FTS index from scratch
    RebuildFts,
    /// Verify the FTS index against the summaries table
    VerifyFts,
    /// Create a default config file
    Init,
    /// Get a config value (e.g. `memoir get sources.claude_code.path`)
    Get { key: Option<String> },
    /// Set a config value
    Set { key: String, value: String },
    /// Remove a config value
    Unset { key: String },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn parse_type(value: Option<&str>) -> Result<Option<SourceType>, MemoirError> {
    value
        .map(|s| SourceType::from_str(s).map_err(MemoirError::Other))
        .transpose()
}

fn run(cli: Cli) -> Result<(), MemoirError> {
    // Config subcommands never touch the database.
    match &cli.command {
        Command::Init => return config::init(),
        Command::Get { key } => {
            return match key {
                Some(k) => config::get_value(k),
                None => config::list_values(),
            };
        }
        Command::Set { key, value } => return config::set_value(key, value),
        Command::Unset { key } => return config::unset_value(key),
        _ => {}
    }

    let config = Config::load();
    let mut db = Database::open(config.db_path())?;

    match cli.command {
        Command::Scan {
            dry_run,
            source_type,
        } => {
            let filter = parse_type(source_type.as_deref())?;
            let report = scan::scan(&mut db, &config, filter, dry_run)?;
            let processed = report.total_processed();
            let errors = report.total_errors();
            eprintln!("\nDone: {processed} records, {errors} errors");
            if processed == 0 && errors > 0 {
                return Err(MemoirError::Other("no records could be processed".into()));
            }
            Ok(())
        }

        Command::Search {
            query,
            source_type,
            project,
            limit,
            half_life,
        } => {
            let raw = query.join(" ");
            if raw.trim().is_empty() {
                return Err(MemoirError::Other("empty query".into()));
            }

            let glossary = Glossary::load();
            let compiled = query::compile(&raw, &glossary);
            if compiled != raw {
                eprintln!("Search: {compiled}");
            }

            let opts = SearchOptions {
                source_type: parse_type(source_type.as_deref())?,
                project_path: project,
                limit: limit.unwrap_or(config.search.default_results),
                recency_half_life: half_life,
            };
            let results = db.search(&compiled, &opts)?;

            if results.is_empty() {
                eprintln!("No results.");
                return Ok(());
            }
            for r in &results {
                println!(
                    "{:>7.1}  [{}] {} ({})",
                    r.rank,
                    r.source_type,
                    r.title.as_deref().unwrap_or("(untitled)"),
                    short_date(r.created_at.as_deref()),
                );
                println!(
                    "         {}",
                    snippet(&r.summary_text, config.search.snippet_chars)
                );
            }
            Ok(())
        }

        Command::Files { query, limit } => {
            let hits = db.search_files(&query, limit)?;
            if hits.is_empty() {
                eprintln!("No results.");
                return Ok(());
            }

            // Group by source, show up to three matching paths each.
            let mut grouped: BTreeMap<&str, Vec<&memoir::db::FileHit>> = BTreeMap::new();
            let mut order: Vec<&str> = Vec::new();
            for hit in &hits {
                if !grouped.contains_key(hit.source_id.as_str()) {
                    order.push(&hit.source_id);
                }
                grouped.entry(&hit.source_id).or_default().push(hit);
            }
            for source_id in order {
                let group = &grouped[source_id];
                let first = group[0];
                println!(
                    "[{}] {} ({})",
                    first.source_type,
                    first.title.as_deref().unwrap_or(source_id),
                    short_date(first.created_at.as_deref()),
                );
                for hit in group.iter().take(3) {
                    println!("    {}", hit.file_path);
                }
                if group.len() > 3 {
                    println!("    ... and {} more", group.len() - 3);
                }
            }
            Ok(())
        }

        Command::List {
            source_type,
            status,
            limit,
        } => {
            let filter = parse_type(source_type.as_deref())?;
            let rows = db.list_sources(filter, status.as_deref(), limit)?;
            for row in rows {
                println!(
                    "{:<14} {:<10} {}  {}",
                    row.source_type,
                    row.status,
                    short_date(row.updated_at.as_deref()),
                    row.title.as_deref().unwrap_or(&row.id),
                );
            }
            Ok(())
        }

        Command::Status => {
            let stats = db.get_stats()?;
            println!("Sources: {}", stats.total_sources);
            for (source_type, count) in &stats.by_type {
                println!("  {source_type}: {count}");
            }
            println!("Status:");
            for (status, count) in &stats.by_status {
                println!("  {status}: {count}");
            }
            println!("Summaries: {}", stats.summaries);
            println!("Extractions: {}", stats.extractions);
            println!("File mentions: {}", stats.file_mentions);
            println!("Pending entities: {}", stats.pending_entities);
            Ok(())
        }

        Command::Prune {
            dry_run,
            source_type,
            delete,
            yes,
        } => {
            let filter = parse_type(source_type.as_deref())?;
            let stale = scan::find_stale(&db, filter)?;
            if stale.is_empty() {
                eprintln!("All source paths are valid.");
                return Ok(());
            }

            let mut by_type: BTreeMap<&str, Vec<&memoir::db::SourceRow>> = BTreeMap::new();
            for row in &stale {
                by_type.entry(&row.source_type).or_default().push(row);
            }
            eprintln!("Stale sources (path no longer exists):");
            for (source_type, rows) in &by_type {
                eprintln!("  {source_type}: {}", rows.len());
                for row in rows.iter().take(3) {
                    eprintln!("    - {}", row.title.as_deref().unwrap_or(&row.id));
                }
                if rows.len() > 3 {
                    eprintln!("    ... and {} more", rows.len() - 3);
                }
            }

            let action = if delete { "delete" } else { "mark stale" };
            if dry_run {
                eprintln!("\nDry run: would {action} {} sources.", stale.len());
                return Ok(());
            }

            if !yes {
                let warning = if delete {
                    " (this also deletes summaries and extractions!)"
                } else {
                    ""
                };
                eprint!("\n{} {} sources{warning}? [y/N] ", capitalize(action), stale.len());
                if !confirm()? {
                    eprintln!("Aborted.");
                    return Ok(());
                }
            }

            let affected = scan::prune(&mut db, &stale, delete)?;
            let verb = if delete { "Deleted" } else { "Marked stale" };
            eprintln!("{verb} {affected} sources.");
            Ok(())
        }

        Command::Extract { source_id, model } => {
            let oracle = oracle_from(&config, model);
            let extraction = scan::extract_source(&mut db, &config, &oracle, &source_id)?;
            match &extraction.summary {
                Some(summary) => println!("{summary}"),
                None => eprintln!("Extraction stored (no summary returned)."),
            }
            Ok(())
        }

        Command::Backfill {
            limit,
            source_type,
            dry_run,
            model,
        } => {
            let filter = parse_type(source_type.as_deref())?;
            let oracle = oracle_from(&config, model);
            let (extracted, failed) =
                scan::backfill(&mut db, &config, &oracle, filter, limit, dry_run)?;
            if !dry_run {
                eprintln!("Backfill: {extracted} extracted, {failed} failed");
            }
            Ok(())
        }

        Command::SyncFts => {
            let updated = scan::sync_fts(&mut db)?;
            eprintln!("Synced {updated} summaries from extractions.");
            Ok(())
        }

        Command::RebuildFts => {
            let count = db.rebuild_fts()?;
            eprintln!("FTS index rebuilt with {count} entries.");
            Ok(())
        }

        Command::VerifyFts => {
            let report = db.verify_fts()?;
            eprintln!("Summaries: {}", report.summaries);
            eprintln!("FTS entries: {}", report.fts_entries);
            if !report.orphaned.is_empty() {
                eprintln!("Orphaned FTS entries (no summary): {}", report.orphaned.len());
            }
            if !report.missing.is_empty() {
                eprintln!("Missing FTS entries (have summary): {}", report.missing.len());
            }
            if report.is_consistent() {
                eprintln!("FTS index is in sync with summaries.");
                Ok(())
            } else {
                Err(MemoirError::Other(
                    "FTS index is out of sync; run `memoir rebuild-fts`".into(),
                ))
            }
        }

        Command::Init | Command::Get { .. } | Command::Set { .. } | Command::Unset { .. } => {
            unreachable!("config subcommands handled above")
        }
    }
}

fn oracle_from(config: &Config, model: Option<String>) -> ClaudeCli {
    let model = model
        .or_else(|| config.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    ClaudeCli::new(model, config.processing.oracle_timeout_secs)
}

fn confirm() -> Result<bool, MemoirError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn short_date(date: Option<&str>) -> &str {
    let date = date.unwrap_or("unknown");
    if date.len() >= 10 && date.is_char_boundary(10) {
        &date[..10]
    } else {
        date
    }
}

fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max {
        return flat;
    }
    let mut end = max;
    while !flat.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &flat[..end])
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
