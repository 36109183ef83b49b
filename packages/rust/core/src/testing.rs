//! In-process fakes for orchestrator tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use heritix_agents::{
    AgentOutput, AgentRegistry, Capability, KnowledgeAgent, SpeechToText, Transcription,
};
use heritix_shared::{AgentError, AppConfig};
use heritix_storage::Storage;

use crate::audio::LocalAudioStore;

/// What a fake agent does on each call.
#[derive(Clone)]
pub(crate) enum Behaviour {
    Reply(AgentOutput),
    /// Fail transiently for the first `n` calls, then reply.
    FlakyThen(u32, AgentOutput),
    AlwaysTransient,
    Fatal,
    Panic,
}

pub(crate) struct FakeAgent {
    capability: Capability,
    behaviour: Behaviour,
    pub(crate) calls: Arc<AtomicU32>,
}

impl FakeAgent {
    pub(crate) fn new(capability: Capability, behaviour: Behaviour) -> Self {
        Self {
            capability,
            behaviour,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl KnowledgeAgent for FakeAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn process(&self, _text: &str) -> Result<AgentOutput, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behaviour {
            Behaviour::Reply(out) => Ok(out.clone()),
            Behaviour::FlakyThen(n, out) if call > *n => Ok(out.clone()),
            Behaviour::FlakyThen(..) | Behaviour::AlwaysTransient => Err(AgentError::transient(
                format!("{} service unavailable (call {call})", self.capability),
            )),
            Behaviour::Fatal => Err(AgentError::fatal("401 invalid api key")),
            Behaviour::Panic => panic!("{} agent exploded", self.capability),
        }
    }
}

pub(crate) fn structured(value: Value) -> AgentOutput {
    match value {
        Value::Object(map) => AgentOutput::Structured(map),
        other => AgentOutput::degraded(other.to_string(), "expected a JSON object"),
    }
}

pub(crate) fn default_output(capability: Capability) -> AgentOutput {
    structured(match capability {
        Capability::Extraction => json!({
            "knowledge_type": "folk_remedy",
            "details": {"ingredients": ["turmeric"]},
            "cultural_context": "pre-wedding ritual"
        }),
        Capability::Categorization => json!({"category": "Cultural Rituals"}),
        Capability::Context => json!({"context_analysis": "Turmeric symbolises purity."}),
        Capability::Education => json!({
            "summary": "Turmeric paste is applied before weddings.",
            "lesson": "Rituals carry meaning.",
            "moral": "Respect tradition.",
            "quiz_questions": []
        }),
        Capability::Translation => json!({"en": "Turmeric paste before the wedding."}),
    })
}

/// Registry of well-behaved agents, with `overrides` replacing individual slots.
/// Returns the call counter of every slot in capability order.
pub(crate) fn registry(overrides: Vec<FakeAgent>) -> (Arc<AgentRegistry>, Vec<Arc<AtomicU32>>) {
    let mut overrides = overrides;
    let mut builder = AgentRegistry::builder();
    let mut counters = Vec::new();
    for capability in Capability::ALL {
        let agent = match overrides.iter().position(|a| a.capability == capability) {
            Some(idx) => overrides.remove(idx),
            None => FakeAgent::new(capability, Behaviour::Reply(default_output(capability))),
        };
        counters.push(agent.calls.clone());
        builder = builder.register(capability, Arc::new(agent));
    }
    (Arc::new(builder.build().expect("complete registry")), counters)
}

/// Speech-to-text fake returning a fixed transcript after an optional delay.
pub(crate) struct FakeStt {
    pub(crate) text: String,
    pub(crate) language: String,
    pub(crate) delay: Duration,
    pub(crate) fail: bool,
}

impl FakeStt {
    pub(crate) fn speaking(language: &str) -> Self {
        Self {
            text: "Turmeric paste is applied to the bride before the wedding.".into(),
            language: language.into(),
            delay: Duration::ZERO,
            fail: false,
        }
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, audio: &[u8], _file_name: &str) -> Result<Transcription, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(AgentError::fatal("unsupported audio"));
        }
        assert!(!audio.is_empty(), "pipeline must pass the stored audio");
        Ok(Transcription {
            text: self.text.clone(),
            language: self.language.clone(),
        })
    }
}

pub(crate) async fn temp_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("hx_test_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

pub(crate) fn temp_audio_store() -> Arc<LocalAudioStore> {
    let dir = std::env::temp_dir().join(format!("hx_audio_{}", Uuid::now_v7()));
    Arc::new(LocalAudioStore::new(dir).expect("audio store"))
}

/// Defaults with millisecond backoff.
pub(crate) fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.base_delay_ms = 1;
    config.pipeline.max_delay_ms = 5;
    config
}
