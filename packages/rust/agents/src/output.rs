//! Tolerant interpretation of model output.
//!
//! Models are asked for bare JSON but regularly wrap it in Markdown fences,
//! drop keys, or answer in prose. None of this is an error: it produces
//! [`AgentOutput::Degraded`], which keeps the raw text and the reason.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

/// Matches a whole response wrapped in a Markdown code fence.
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```$").expect("valid regex")
});

/// Result of one capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// Parsed mapping containing every expected key.
    Structured(Map<String, Value>),
    /// Output that could not be interpreted.
    Degraded { raw: String, reason: String },
}

impl AgentOutput {
    pub fn degraded(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Degraded {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Why the output was degraded, if it was.
    pub fn degradation_reason(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    /// JSON value persisted as the stage's content field.
    ///
    /// Degraded output becomes `{"error": reason, "raw_output": raw}`.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Structured(map) => Value::Object(map.clone()),
            Self::Degraded { raw, reason } => json!({
                "error": reason,
                "raw_output": raw,
            }),
        }
    }

    /// String value of `key`, when structured and present.
    pub fn text_field(&self, key: &str) -> Option<String> {
        match self {
            Self::Structured(map) => map.get(key).map(value_to_text),
            Self::Degraded { .. } => None,
        }
    }

    /// Translation map for `target`.
    ///
    /// Degraded output is kept as best-effort text under the target key.
    pub fn translations(&self, target: &str) -> BTreeMap<String, String> {
        let text = match self {
            Self::Structured(map) => map.get(target).map(value_to_text),
            Self::Degraded { raw, .. } => Some(raw.clone()),
        };
        text.into_iter()
            .map(|t| (target.to_string(), t))
            .collect()
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Remove a Markdown code fence wrapping the whole text, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Parse model output as a JSON object carrying every key in `expected_keys`.
///
/// Never fails; anything else is reported as [`AgentOutput::Degraded`].
pub fn parse_structured(raw: &str, expected_keys: &[&str]) -> AgentOutput {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return AgentOutput::degraded(raw, "empty response");
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return AgentOutput::degraded(raw, format!("Failed to parse JSON: {e}")),
    };

    let Value::Object(map) = value else {
        return AgentOutput::degraded(raw, "expected a JSON object");
    };

    let missing: Vec<&str> = expected_keys
        .iter()
        .copied()
        .filter(|k| !map.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return AgentOutput::degraded(raw, format!("missing keys: {}", missing.join(", ")));
    }

    AgentOutput::Structured(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"category\": \"Agriculture\"}\n```";
        assert_eq!(strip_code_fence(raw), r#"{"category": "Agriculture"}"#);
    }

    #[test]
    fn strips_bare_fence_and_whitespace() {
        let raw = "  ```\n{\"a\": 1}```  ";
        assert_eq!(strip_code_fence(raw), r#"{"a": 1}"#);
        assert_eq!(strip_code_fence(" {\"a\": 1} "), r#"{"a": 1}"#);
    }

    #[test]
    fn structured_when_all_keys_present() {
        let out = parse_structured(
            "```json\n{\"summary\": \"s\", \"lesson\": \"l\", \"moral\": \"m\", \"quiz_questions\": []}\n```",
            &["summary", "lesson", "moral", "quiz_questions"],
        );
        assert!(!out.is_degraded());
        assert_eq!(out.text_field("summary").as_deref(), Some("s"));
    }

    #[test]
    fn invalid_json_degrades_with_raw_output() {
        let out = parse_structured("Sure! Here is the JSON you asked for", &["category"]);
        assert!(out.is_degraded());
        let payload = out.to_payload();
        assert_eq!(payload["raw_output"], "Sure! Here is the JSON you asked for");
        assert!(payload["error"].as_str().unwrap().starts_with("Failed to parse JSON"));
    }

    #[test]
    fn non_object_and_missing_keys_degrade() {
        let out = parse_structured("[1, 2, 3]", &["category"]);
        assert_eq!(out.degradation_reason(), Some("expected a JSON object"));

        let out = parse_structured(r#"{"details": {}}"#, &["knowledge_type", "details"]);
        assert_eq!(out.degradation_reason(), Some("missing keys: knowledge_type"));
    }

    #[test]
    fn empty_response_degrades() {
        let out = parse_structured("   ", &["en"]);
        assert_eq!(out.degradation_reason(), Some("empty response"));
    }

    #[test]
    fn translations_from_structured_and_degraded() {
        let out = parse_structured(r#"{"en": "The river spirit"}"#, &["en"]);
        assert_eq!(out.translations("en")["en"], "The river spirit");

        let out = AgentOutput::degraded("L'esprit du fleuve", "Failed to parse JSON");
        assert_eq!(out.translations("en")["en"], "L'esprit du fleuve");
    }
}
