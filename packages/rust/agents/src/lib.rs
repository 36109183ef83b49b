//! Knowledge agents and the external services they call.
//!
//! - [`llm`]: the [`TextGenerator`] seam and its OpenAI-compatible client
//! - [`output`]: tolerant parsing of model output into [`AgentOutput`]
//! - [`agents`]: the five capability implementations and [`AgentRegistry`]
//! - [`stt`]: the [`SpeechToText`] seam and its Whisper client

pub mod agents;
pub mod llm;
pub mod output;
pub mod stt;

pub use agents::{
    AgentRegistry, AgentRegistryBuilder, CATEGORIES, Capability, CategorizationAgent,
    ContextAgent, EducationAgent, ExtractionAgent, KnowledgeAgent, TranslationAgent,
    UNCATEGORIZED,
};
pub use llm::{GenerationRequest, OpenAiCompatibleClient, TextGenerator};
pub use output::{AgentOutput, parse_structured, strip_code_fence};
pub use stt::{SpeechToText, Transcription, WhisperClient, normalize_language};
