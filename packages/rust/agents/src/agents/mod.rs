//! Knowledge agents and their registry.
//!
//! Each agent turns a transcript into a structured result for one
//! [`Capability`]. The set is closed: the [`AgentRegistry`] holds exactly one
//! agent per capability and lookups are exhaustive matches.

mod categorization;
mod context;
mod education;
mod extraction;
mod translation;

use std::sync::Arc;

use async_trait::async_trait;
use heritix_shared::{AgentError, HeritixError, Stage};

use crate::llm::{GenerationRequest, TextGenerator};
use crate::output::AgentOutput;

pub use categorization::{CATEGORIES, CategorizationAgent, UNCATEGORIZED};
pub use context::ContextAgent;
pub use education::EducationAgent;
pub use extraction::ExtractionAgent;
pub use translation::TranslationAgent;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A kind of knowledge derived from a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Extraction,
    Categorization,
    Context,
    Education,
    Translation,
}

impl Capability {
    /// Pipeline order.
    pub const ALL: [Capability; 5] = [
        Self::Extraction,
        Self::Categorization,
        Self::Context,
        Self::Education,
        Self::Translation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Categorization => "categorization",
            Self::Context => "context",
            Self::Education => "education",
            Self::Translation => "translation",
        }
    }

    /// Log stage this capability runs under.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Extraction => Stage::Extraction,
            Self::Categorization => Stage::Categorization,
            Self::Context => Stage::Context,
            Self::Education => Stage::Education,
            Self::Translation => Stage::Translation,
        }
    }

    fn slot(&self) -> usize {
        match self {
            Self::Extraction => 0,
            Self::Categorization => 1,
            Self::Context => 2,
            Self::Education => 3,
            Self::Translation => 4,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// KnowledgeAgent
// ---------------------------------------------------------------------------

/// One capability implementation.
///
/// `process` fails only when the external service fails. Output that cannot
/// be interpreted is returned as [`AgentOutput::Degraded`].
#[async_trait]
pub trait KnowledgeAgent: Send + Sync {
    fn capability(&self) -> Capability;

    async fn process(&self, text: &str) -> Result<AgentOutput, AgentError>;
}

/// Send one prompt and hand back the raw completion.
async fn complete(
    llm: &dyn TextGenerator,
    capability: Capability,
    prompt: String,
    temperature: f32,
) -> Result<String, AgentError> {
    let raw = llm
        .generate(&GenerationRequest::new(prompt, temperature))
        .await?;
    tracing::debug!(%capability, chars = raw.len(), "agent output received");
    Ok(raw)
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// Exactly one agent per capability.
#[derive(Clone)]
pub struct AgentRegistry {
    extraction: Arc<dyn KnowledgeAgent>,
    categorization: Arc<dyn KnowledgeAgent>,
    context: Arc<dyn KnowledgeAgent>,
    education: Arc<dyn KnowledgeAgent>,
    translation: Arc<dyn KnowledgeAgent>,
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    /// The LLM-backed agent set, all sharing one client.
    pub fn standard(llm: Arc<dyn TextGenerator>, target_language: &str) -> Self {
        Self {
            extraction: Arc::new(ExtractionAgent::new(llm.clone())),
            categorization: Arc::new(CategorizationAgent::new(llm.clone())),
            context: Arc::new(ContextAgent::new(llm.clone())),
            education: Arc::new(EducationAgent::new(llm.clone())),
            translation: Arc::new(TranslationAgent::new(llm, target_language)),
        }
    }

    pub fn get(&self, capability: Capability) -> &Arc<dyn KnowledgeAgent> {
        match capability {
            Capability::Extraction => &self.extraction,
            Capability::Categorization => &self.categorization,
            Capability::Context => &self.context,
            Capability::Education => &self.education,
            Capability::Translation => &self.translation,
        }
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry").finish_non_exhaustive()
    }
}

/// Collects agents and checks the set is complete.
#[derive(Default)]
pub struct AgentRegistryBuilder {
    slots: [Option<Arc<dyn KnowledgeAgent>>; 5],
    errors: Vec<String>,
}

impl AgentRegistryBuilder {
    /// Place `agent` under `capability`.
    pub fn register(mut self, capability: Capability, agent: Arc<dyn KnowledgeAgent>) -> Self {
        if agent.capability() != capability {
            self.errors.push(format!(
                "{} agent registered under {capability}",
                agent.capability()
            ));
        }
        let slot = &mut self.slots[capability.slot()];
        if slot.is_some() {
            self.errors
                .push(format!("{capability} agent registered more than once"));
        }
        *slot = Some(agent);
        self
    }

    pub fn build(self) -> heritix_shared::Result<AgentRegistry> {
        let mut errors = self.errors;
        for capability in Capability::ALL {
            if self.slots[capability.slot()].is_none() {
                errors.push(format!("no {capability} agent registered"));
            }
        }
        if !errors.is_empty() {
            return Err(HeritixError::config(format!(
                "invalid agent registry: {}",
                errors.join("; ")
            )));
        }

        let [Some(extraction), Some(categorization), Some(context), Some(education), Some(translation)] =
            self.slots
        else {
            return Err(HeritixError::config("invalid agent registry"));
        };

        Ok(AgentRegistry {
            extraction,
            categorization,
            context,
            education,
            translation,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Returns canned completions in order and records every request.
    pub(crate) struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, AgentError>>>,
        pub(crate) requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(replies: Vec<Result<String, AgentError>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn reply(text: &str) -> Arc<Self> {
            Self::new(vec![Ok(text.to_string())])
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, AgentError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(AgentError::fatal("script exhausted")))
        }
    }
}
