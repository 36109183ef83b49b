use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::AgentError;
use serde_json::{Map, Value};

use super::{Capability, KnowledgeAgent, complete};
use crate::llm::TextGenerator;
use crate::output::AgentOutput;

/// Free-text analysis of cultural significance. The answer is kept verbatim.
pub struct ContextAgent {
    llm: Arc<dyn TextGenerator>,
}

impl ContextAgent {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl KnowledgeAgent for ContextAgent {
    fn capability(&self) -> Capability {
        Capability::Context
    }

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError> {
        let prompt = format!(
            "Analyze the cultural context and significance of the following text: {text}"
        );
        let raw = complete(self.llm.as_ref(), self.capability(), prompt, 0.0).await?;

        let analysis = raw.trim();
        if analysis.is_empty() {
            return Ok(AgentOutput::degraded(raw, "empty response"));
        }

        let mut map = Map::new();
        map.insert("context_analysis".into(), Value::String(analysis.to_string()));
        Ok(AgentOutput::Structured(map))
    }
}
