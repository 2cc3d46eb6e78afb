//! Curated knowledge articles.
//!
//! Same on-disk shape as local notebooks, different contract: knowledge
//! files are already distilled (agent self-knowledge, curated docs,
//! hand-written memory entries), so they carry `has_presummary = true` and
//! the extraction pipeline never runs over them.

use crate::adapter::{Adapter, local_md};
use crate::config::Config;
use crate::record::{Record, SourceType};

pub struct KnowledgeAdapter;

impl Adapter for KnowledgeAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Knowledge
    }

    fn discover(&self, config: &Config) -> Vec<Record> {
        local_md::discover_roots(&config.sources.knowledge, SourceType::Knowledge, true)
    }
}
