use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::AgentError;

use super::{Capability, KnowledgeAgent, complete};
use crate::llm::TextGenerator;
use crate::output::{AgentOutput, parse_structured};

/// Translates a transcript into the archive's target language.
///
/// The result is keyed by the target language code.
pub struct TranslationAgent {
    llm: Arc<dyn TextGenerator>,
    target_language: String,
}

impl TranslationAgent {
    pub fn new(llm: Arc<dyn TextGenerator>, target_language: &str) -> Self {
        Self {
            llm,
            target_language: target_language.trim().to_lowercase(),
        }
    }
}

fn prompt(text: &str, target: &str) -> String {
    format!(
        "Translate the following text into the language with ISO-639-1 code \"{target}\".\n\
         If the text is already in that language, return it exactly as is.\n\n\
         Text: {text}\n\n\
         Return the output in STRICT JSON format with the following key:\n\
         - {target} (str): The translation.\n\n\
         Do not add any markdown formatting."
    )
}

#[async_trait]
impl KnowledgeAgent for TranslationAgent {
    fn capability(&self) -> Capability {
        Capability::Translation
    }

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError> {
        let target = self.target_language.as_str();
        let raw = complete(self.llm.as_ref(), self.capability(), prompt(text, target), 0.3).await?;
        Ok(parse_structured(&raw, &[target]))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ScriptedLlm;
    use super::*;

    #[tokio::test]
    async fn keyed_by_target_language() {
        let llm = ScriptedLlm::reply(r#"{"en": "Once upon a time"}"#);
        let agent = TranslationAgent::new(llm.clone(), "EN");

        let out = agent.process("Il était une fois").await.unwrap();
        assert_eq!(out.translations("en")["en"], "Once upon a time");
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, 0.3);
        assert!(requests[0].prompt.contains("code \"en\""));
    }

    #[tokio::test]
    async fn wrong_key_degrades_to_raw_text() {
        let llm = ScriptedLlm::reply(r#"{"english": "Once upon a time"}"#);
        let out = TranslationAgent::new(llm, "en").process("x").await.unwrap();
        assert_eq!(out.degradation_reason(), Some("missing keys: en"));
        assert_eq!(out.translations("en")["en"], r#"{"english": "Once upon a time"}"#);
    }
}
