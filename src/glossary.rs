//! Glossary loading and entity resolution.
//!
//! The glossary maps alternative names and aliases to canonical entity keys.
//! The query engine uses it to expand a search term into a disjunction over
//! an entity's canonical name and aliases. Lives at
//! `~/.config/memoir/glossary.toml`; a missing file is an empty glossary.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Deserialize;

/// One glossary entity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// On-disk glossary shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlossaryData {
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    /// Alias → entity key mappings accumulated outside the curated set.
    #[serde(default)]
    pub auto_mappings: BTreeMap<String, String>,
}

/// Entity glossary with a case-insensitive alias index.
#[derive(Debug, Default)]
pub struct Glossary {
    entities: BTreeMap<String, Entity>,
    alias_index: HashMap<String, String>,
}

impl Glossary {
    pub fn new(data: GlossaryData) -> Glossary {
        let mut alias_index = HashMap::new();

        for (key, entity) in &data.entities {
            if !entity.name.is_empty() {
                alias_index.insert(entity.name.to_lowercase(), key.clone());
            }
            for alias in &entity.aliases {
                alias_index.insert(alias.to_lowercase(), key.clone());
            }
        }
        for (alias, key) in &data.auto_mappings {
            alias_index.insert(alias.to_lowercase(), key.clone());
        }

        Glossary {
            entities: data.entities,
            alias_index,
        }
    }

    /// Load the glossary from disk; a missing or unparsable file yields an
    /// empty glossary rather than an error.
    pub fn load() -> Glossary {
        let Some(path) = glossary_path() else {
            return Glossary::default();
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Glossary::default();
        };
        let data: GlossaryData = toml::from_str(&content).unwrap_or_default();
        Glossary::new(data)
    }

    /// Resolve a mention to its canonical entity key.
    pub fn resolve(&self, mention: &str) -> Option<&str> {
        self.alias_index.get(&mention.to_lowercase()).map(String::as_str)
    }

    /// Get entity data by key.
    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.alias_index.is_empty()
    }
}

fn glossary_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/memoir/glossary.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Glossary {
        let data: GlossaryData = toml::from_str(
            r#"
[entities.workspace-mcp]
name = "Workspace MCP"
aliases = ["wmcp", "workspace server"]

[entities.drawdown]
name = "Drawdown"
aliases = ["draw-down pattern"]

[auto_mappings]
"the server" = "workspace-mcp"
"#,
        )
        .unwrap();
        Glossary::new(data)
    }

    #[test]
    fn test_resolve_canonical_name() {
        let g = sample();
        assert_eq!(g.resolve("Workspace MCP"), Some("workspace-mcp"));
    }

    #[test]
    fn test_resolve_alias_case_insensitive() {
        let g = sample();
        assert_eq!(g.resolve("WMCP"), Some("workspace-mcp"));
    }

    #[test]
    fn test_resolve_auto_mapping() {
        let g = sample();
        assert_eq!(g.resolve("THE SERVER"), Some("workspace-mcp"));
    }

    #[test]
    fn test_resolve_unknown() {
        let g = sample();
        assert_eq!(g.resolve("nonexistent"), None);
    }

    #[test]
    fn test_get_entity() {
        let g = sample();
        let e = g.get("drawdown").unwrap();
        assert_eq!(e.name, "Drawdown");
        assert_eq!(e.aliases, vec!["draw-down pattern"]);
    }

    #[test]
    fn test_empty_glossary() {
        let g = Glossary::default();
        assert!(g.is_empty());
        assert_eq!(g.resolve("anything"), None);
    }
}
