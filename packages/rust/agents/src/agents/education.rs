use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::AgentError;

use super::{Capability, KnowledgeAgent, complete};
use crate::llm::TextGenerator;
use crate::output::{AgentOutput, parse_structured};

const EXPECTED_KEYS: &[&str] = &["summary", "lesson", "moral", "quiz_questions"];

/// Builds a short lesson, moral and quiz from a transcript.
pub struct EducationAgent {
    llm: Arc<dyn TextGenerator>,
}

impl EducationAgent {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

fn prompt(text: &str) -> String {
    format!(
        "Generate educational content based on this cultural text: {text}\n\n\
         Return the output in STRICT JSON format with the following keys:\n\
         - summary (str): A simplified summary.\n\
         - lesson (str): A short lesson derived from the text.\n\
         - moral (str): The moral or key takeaway.\n\
         - quiz_questions (list): 3 simple questions with answers.\n\n\
         Do not add any markdown formatting."
    )
}

#[async_trait]
impl KnowledgeAgent for EducationAgent {
    fn capability(&self) -> Capability {
        Capability::Education
    }

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError> {
        let raw = complete(self.llm.as_ref(), self.capability(), prompt(text), 0.7).await?;
        Ok(parse_structured(&raw, EXPECTED_KEYS))
    }
}
