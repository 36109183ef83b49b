use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::AgentError;

use super::{Capability, KnowledgeAgent, complete};
use crate::llm::TextGenerator;
use crate::output::{AgentOutput, parse_structured};

const EXPECTED_KEYS: &[&str] = &["knowledge_type", "details", "cultural_context"];

/// Pulls the knowledge entities (remedy, ritual, story...) out of a transcript.
pub struct ExtractionAgent {
    llm: Arc<dyn TextGenerator>,
}

impl ExtractionAgent {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

fn prompt(text: &str) -> String {
    format!(
        "Extract key cultural knowledge entities from the following text: {text}\n\n\
         Return the output in STRICT JSON format with the following keys:\n\
         - knowledge_type (str): e.g., \"folk_remedy\", \"ritual\", \"story\", \"other\"\n\
         - details (dict): Key details extracted (ingredients, steps, characters, etc.)\n\
         - cultural_context (str): The cultural significance or context.\n\n\
         Do not add any markdown formatting. Just the raw JSON string."
    )
}

#[async_trait]
impl KnowledgeAgent for ExtractionAgent {
    fn capability(&self) -> Capability {
        Capability::Extraction
    }

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError> {
        let raw = complete(self.llm.as_ref(), self.capability(), prompt(text), 0.0).await?;
        Ok(parse_structured(&raw, EXPECTED_KEYS))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ScriptedLlm;
    use super::*;

    #[tokio::test]
    async fn parses_fenced_extraction() {
        let llm = ScriptedLlm::reply(
            "```json\n{\"knowledge_type\": \"folk_remedy\", \"details\": {\"ingredients\": [\"turmeric\"]}, \"cultural_context\": \"wedding\"}\n```",
        );
        let agent = ExtractionAgent::new(llm.clone());
        let out = agent.process("turmeric paste before the wedding").await.unwrap();

        assert_eq!(out.text_field("knowledge_type").as_deref(), Some("folk_remedy"));
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, 0.0);
        assert!(requests[0].prompt.contains("turmeric paste before the wedding"));
    }

    #[tokio::test]
    async fn service_failure_propagates() {
        let llm = ScriptedLlm::new(vec![Err(AgentError::transient("timeout"))]);
        let err = ExtractionAgent::new(llm).process("x").await.unwrap_err();
        assert!(matches!(err, AgentError::Transient { .. }));
    }
}
