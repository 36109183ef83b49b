use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::AgentError;
use serde_json::Value;

use super::{Capability, KnowledgeAgent, complete};
use crate::llm::TextGenerator;
use crate::output::{AgentOutput, parse_structured};

/// Cultural domains a record can be filed under.
pub const CATEGORIES: [&str; 5] = [
    "Folk Medicine",
    "Agriculture",
    "Folklore & Stories",
    "Cultural Rituals",
    "Life Advice & Ethics",
];

/// Category recorded when the model's answer cannot be used.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Files a transcript under one of [`CATEGORIES`].
pub struct CategorizationAgent {
    llm: Arc<dyn TextGenerator>,
}

impl CategorizationAgent {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

fn prompt(text: &str) -> String {
    let choices = CATEGORIES
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Categorize the following text into a cultural domain.\n\
         Text: {text}\n\n\
         Choose ONE from: {choices}.\n\n\
         Return the output in STRICT JSON format with the following key:\n\
         - category (str)\n\n\
         Do not add any markdown formatting."
    )
}

/// Map the model's label onto the canonical spelling, ignoring case.
fn canonical_category(label: &str) -> Option<&'static str> {
    let label = label.trim();
    CATEGORIES
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(label))
}

#[async_trait]
impl KnowledgeAgent for CategorizationAgent {
    fn capability(&self) -> Capability {
        Capability::Categorization
    }

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError> {
        let raw = complete(self.llm.as_ref(), self.capability(), prompt(text), 0.0).await?;
        let mut out = parse_structured(&raw, &["category"]);

        if let AgentOutput::Structured(map) = &mut out {
            let label = map.get("category").and_then(Value::as_str).unwrap_or("");
            match canonical_category(label) {
                Some(canonical) => {
                    map.insert("category".into(), Value::String(canonical.into()));
                }
                None => {
                    let reason = format!("unknown category '{label}'");
                    return Ok(AgentOutput::degraded(raw, reason));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ScriptedLlm;
    use super::*;

    #[tokio::test]
    async fn normalizes_known_category() {
        let llm = ScriptedLlm::reply(r#"{"category": "folk medicine"}"#);
        let out = CategorizationAgent::new(llm).process("neem for fever").await.unwrap();
        assert_eq!(out.text_field("category").as_deref(), Some("Folk Medicine"));
    }

    #[tokio::test]
    async fn unknown_category_degrades() {
        let llm = ScriptedLlm::reply(r#"{"category": "Cooking"}"#);
        let out = CategorizationAgent::new(llm).process("a recipe").await.unwrap();
        assert_eq!(out.degradation_reason(), Some("unknown category 'Cooking'"));
        assert_eq!(out.to_payload()["raw_output"], r#"{"category": "Cooking"}"#);
    }

    #[tokio::test]
    async fn prose_answer_degrades() {
        let llm = ScriptedLlm::reply("This is clearly about agriculture.");
        let out = CategorizationAgent::new(llm).process("planting").await.unwrap();
        assert!(out.is_degraded());
    }
}
