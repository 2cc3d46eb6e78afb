//! memoir: a local conversation memory index.
//!
//! Memoir discovers artifacts produced by AI coding tools — per-project
//! session logs, cloud sessions and conversations, handoff notes, issue
//! trackers, curated knowledge, local notebooks — normalizes them into a
//! uniform record shape, stores them in an embedded SQLite database with an
//! FTS5 mirror, and serves ranked search plus structured digests.
//!
//! ```text
//! Adapters → Records → Ingest → SQLite (+ FTS5 triggers) → Search
//!                         ↓
//!                Semantic chunker → summarizer subprocess → Extractions
//! ```
//!
//! The crate is single-process and single-writer: one database connection,
//! all operations synchronous, FTS mirrors mutated only by triggers (and
//! the explicit rebuild operation).

pub mod adapter;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod glossary;
pub mod llm;
pub mod query;
pub mod record;
pub mod scan;
