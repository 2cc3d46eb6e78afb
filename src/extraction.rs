//! Structured digests extracted from conversations.
//!
//! An [`Extraction`] is the per-source structured digest the summarizer
//! produces: a short summary, the narrative arc, and arrays of builds,
//! learnings, friction, patterns, and open threads. The nested fields stay
//! opaque (`serde_json::Value`) — this type is the single in-code shape at
//! the storage boundary, and downstream consumers address fields by key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured digest of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub summary: Option<String>,
    /// The journey: `started_with`, `key_turns`, `ended_at`.
    #[serde(default)]
    pub arc: Option<Value>,
    /// Things created or modified: `{what, details, outcome?}`.
    #[serde(default)]
    pub builds: Vec<Value>,
    /// Insights: `{insight, why_it_matters, context}`.
    #[serde(default)]
    pub learnings: Vec<Value>,
    /// Problems encountered: `{problem, resolution}`.
    #[serde(default)]
    pub friction: Vec<Value>,
    #[serde(default)]
    pub patterns: Vec<Value>,
    #[serde(default)]
    pub open_threads: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
}

impl Extraction {
    /// Recover a digest from raw summarizer output.
    ///
    /// The response may carry a preamble or trailing prose; the digest is
    /// whatever sits between the outermost braces. Any parse failure yields
    /// an empty-but-well-formed digest rather than an error.
    pub fn from_response(response: &str) -> Extraction {
        let Some(start) = response.find('{') else {
            return Extraction::default();
        };
        let Some(end) = response.rfind('}') else {
            return Extraction::default();
        };
        if end < start {
            return Extraction::default();
        }

        match serde_json::from_str::<Value>(&response[start..=end]) {
            Ok(value) => Extraction::from_value(&value),
            Err(_) => Extraction::default(),
        }
    }

    /// Build a digest from a parsed JSON object, tolerating missing or
    /// mistyped fields.
    pub fn from_value(value: &Value) -> Extraction {
        fn array(value: &Value, key: &str) -> Vec<Value> {
            value
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        }

        Extraction {
            summary: value
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string),
            arc: value.get("arc").filter(|v| !v.is_null()).cloned(),
            builds: array(value, "builds"),
            learnings: array(value, "learnings"),
            friction: array(value, "friction"),
            patterns: array(value, "patterns"),
            open_threads: array(value, "open_threads"),
            model_used: None,
            extracted_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.arc.is_none()
            && self.builds.is_empty()
            && self.learnings.is_empty()
            && self.friction.is_empty()
            && self.patterns.is_empty()
            && self.open_threads.is_empty()
    }
}

fn field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Flatten a digest into one searchable multi-paragraph string: the summary,
/// each learning (insight and why it matters), each build (what and
/// outcome), and each friction problem. Callers write the result back as the
/// source's `summary_text` so the whole digest becomes searchable.
pub fn flatten_for_fts(extraction: &Extraction) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(summary) = &extraction.summary {
        if !summary.is_empty() {
            parts.push(summary.clone());
        }
    }

    for item in &extraction.learnings {
        if let Some(insight) = field(item, "insight") {
            parts.push(format!("Learning: {insight}"));
            if let Some(why) = field(item, "why_it_matters") {
                parts.push(why.to_string());
            }
        } else if let Some(text) = item.as_str() {
            parts.push(format!("Learning: {text}"));
        }
    }

    for item in &extraction.builds {
        if let Some(what) = field(item, "what") {
            parts.push(format!("Built: {what}"));
            if let Some(outcome) = field(item, "outcome") {
                parts.push(outcome.to_string());
            }
        } else if let Some(text) = item.as_str() {
            parts.push(format!("Built: {text}"));
        }
    }

    for item in &extraction.friction {
        if let Some(problem) = field(item, "problem") {
            parts.push(format!("Friction: {problem}"));
        } else if let Some(text) = item.as_str() {
            parts.push(format!("Friction: {text}"));
        }
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_response_with_preamble() {
        let response = r#"Here is the digest you asked for:
{"summary": "Fixed the auth flow", "builds": [{"what": "token refresh"}]}
Let me know if you need more."#;
        let e = Extraction::from_response(response);
        assert_eq!(e.summary.as_deref(), Some("Fixed the auth flow"));
        assert_eq!(e.builds.len(), 1);
    }

    #[test]
    fn test_from_response_garbage_yields_empty() {
        let e = Extraction::from_response("not json at all");
        assert!(e.is_empty());
        let e = Extraction::from_response("{broken json");
        assert!(e.is_empty());
    }

    #[test]
    fn test_from_value_tolerates_mistyped_fields() {
        let value = json!({
            "summary": 42,
            "builds": "not an array",
            "learnings": [{"insight": "x"}],
        });
        let e = Extraction::from_value(&value);
        assert!(e.summary.is_none());
        assert!(e.builds.is_empty());
        assert_eq!(e.learnings.len(), 1);
    }

    #[test]
    fn test_flatten_includes_all_sections() {
        let e = Extraction {
            summary: Some("Refactored the parser".to_string()),
            learnings: vec![json!({
                "insight": "serde untagged enums are slow",
                "why_it_matters": "hot path in line parsing",
            })],
            builds: vec![json!({"what": "streaming reader", "outcome": "2x faster"})],
            friction: vec![json!({"problem": "flaky CI runner"})],
            ..Default::default()
        };
        let text = flatten_for_fts(&e);
        assert!(text.contains("Refactored the parser"));
        assert!(text.contains("Learning: serde untagged enums are slow"));
        assert!(text.contains("hot path in line parsing"));
        assert!(text.contains("Built: streaming reader"));
        assert!(text.contains("2x faster"));
        assert!(text.contains("Friction: flaky CI runner"));
    }

    #[test]
    fn test_flatten_accepts_bare_strings() {
        let e = Extraction {
            learnings: vec![json!("bare learning")],
            friction: vec![json!("bare friction")],
            ..Default::default()
        };
        let text = flatten_for_fts(&e);
        assert!(text.contains("Learning: bare learning"));
        assert!(text.contains("Friction: bare friction"));
    }

    #[test]
    fn test_empty_digest_flattens_to_empty() {
        assert_eq!(flatten_for_fts(&Extraction::default()), "");
    }
}
