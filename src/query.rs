//! FTS5 query compilation.
//!
//! User queries are free text; FTS5 has operator syntax that trips on it.
//! Compilation applies three transformations, in order:
//!
//! 1. Auto-quote bare hyphenated tokens so `-` is not parsed as NOT.
//! 2. Glossary expansion: a query matching a known entity becomes a quoted
//!    disjunction over the canonical name and up to three aliases.
//! 3. When step 2 did not expand, suffix simple tokens with `*` for recall.

use std::sync::LazyLock;

use regex::Regex;

use crate::glossary::Glossary;

static HYPHENATED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+(?:-\w+)+").unwrap());
static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*"|\S+"#).unwrap());

/// Compile a raw user query into an FTS5 match expression.
pub fn compile(raw: &str, glossary: &Glossary) -> String {
    let quoted = auto_quote_hyphenated(raw);
    let expanded = expand(&quoted, glossary);
    if expanded != quoted {
        expanded
    } else {
        add_wildcard_suffix(&quoted)
    }
}

/// Quote hyphenated terms outside existing quotes.
///
/// FTS5 reads an unquoted `-` as the NOT operator, so `draw-down` would
/// exclude `down` instead of matching the literal token.
pub fn auto_quote_hyphenated(query: &str) -> String {
    let mut result = String::with_capacity(query.len() + 8);
    let mut in_quotes = false;
    let mut rest = query;

    while let Some(c) = rest.chars().next() {
        if c == '"' {
            in_quotes = !in_quotes;
            result.push(c);
            rest = &rest[1..];
        } else if !in_quotes {
            if let Some(m) = HYPHENATED.find(rest) {
                result.push('"');
                result.push_str(m.as_str());
                result.push('"');
                rest = &rest[m.end()..];
            } else {
                result.push(c);
                rest = &rest[c.len_utf8()..];
            }
        } else {
            result.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }

    result
}

/// Expand the query through the glossary when it names a known entity.
pub fn expand(query: &str, glossary: &Glossary) -> String {
    let Some(key) = glossary.resolve(query.trim_matches('"')) else {
        return query.to_string();
    };
    let Some(entity) = glossary.get(key) else {
        return query.to_string();
    };

    let mut terms: Vec<&str> = Vec::new();
    if !entity.name.is_empty() {
        terms.push(&entity.name);
    }
    terms.extend(entity.aliases.iter().take(3).map(String::as_str));
    if terms.is_empty() {
        return query.to_string();
    }

    terms
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Suffix simple terms with `*` so `Reckitt` also matches `Reckitts`.
///
/// Quoted phrases, existing wildcards, FTS5 operators, and column-prefixed
/// terms (`title:foo`) pass through untouched.
pub fn add_wildcard_suffix(query: &str) -> String {
    const OPERATORS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];

    TOKEN
        .find_iter(query)
        .map(|m| {
            let token = m.as_str();
            if token.starts_with('"')
                || token.ends_with('*')
                || OPERATORS.contains(&token.to_uppercase().as_str())
                || token.contains(':')
            {
                token.to_string()
            } else {
                format!("{token}*")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::GlossaryData;

    fn sample_glossary() -> Glossary {
        let data: GlossaryData = toml::from_str(
            r#"
[entities.workspace-mcp]
name = "Workspace MCP"
aliases = ["wmcp", "workspace server", "ws", "extra alias"]
"#,
        )
        .unwrap();
        Glossary::new(data)
    }

    #[test]
    fn test_auto_quote_hyphenated_term() {
        assert_eq!(auto_quote_hyphenated("claude-memory"), "\"claude-memory\"");
    }

    #[test]
    fn test_auto_quote_mixed_query() {
        assert_eq!(
            auto_quote_hyphenated("claude-memory foo"),
            "\"claude-memory\" foo"
        );
    }

    #[test]
    fn test_auto_quote_leaves_quoted_alone() {
        assert_eq!(
            auto_quote_hyphenated("\"already-quoted\" bar"),
            "\"already-quoted\" bar"
        );
    }

    #[test]
    fn test_auto_quote_multi_hyphen() {
        assert_eq!(auto_quote_hyphenated("a-b-c"), "\"a-b-c\"");
    }

    #[test]
    fn test_wildcard_simple_term() {
        assert_eq!(add_wildcard_suffix("Reckitt"), "Reckitt*");
    }

    #[test]
    fn test_wildcard_preserves_operators() {
        assert_eq!(add_wildcard_suffix("OAuth OR JWT"), "OAuth* OR JWT*");
        assert_eq!(add_wildcard_suffix("OAuth NOT old"), "OAuth* NOT old*");
    }

    #[test]
    fn test_wildcard_skips_quoted_and_prefixed() {
        assert_eq!(add_wildcard_suffix("\"OAuth refresh\""), "\"OAuth refresh\"");
        assert_eq!(add_wildcard_suffix("title:foo"), "title:foo");
        assert_eq!(add_wildcard_suffix("done*"), "done*");
    }

    #[test]
    fn test_expand_known_entity_caps_aliases() {
        let g = sample_glossary();
        let expanded = expand("wmcp", &g);
        assert_eq!(
            expanded,
            "\"Workspace MCP\" OR \"wmcp\" OR \"workspace server\" OR \"ws\""
        );
    }

    #[test]
    fn test_expand_unknown_unchanged() {
        let g = sample_glossary();
        assert_eq!(expand("nothing here", &g), "nothing here");
    }

    #[test]
    fn test_compile_expansion_suppresses_wildcard() {
        let g = sample_glossary();
        let compiled = compile("wmcp", &g);
        assert!(compiled.contains("OR"));
        assert!(!compiled.contains("wmcp*"));
    }

    #[test]
    fn test_compile_hyphen_then_wildcard() {
        let g = Glossary::default();
        // Hyphenated token gets quoted, the plain token gets a wildcard.
        assert_eq!(compile("draw-down pattern", &g), "\"draw-down\" pattern*");
    }

    #[test]
    fn test_compile_plain_query() {
        let g = Glossary::default();
        assert_eq!(compile("pandas", &g), "pandas*");
    }
}
