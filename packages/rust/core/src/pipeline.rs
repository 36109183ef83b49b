//! Knowledge pipeline orchestrator.
//!
//! Drives one record through the fixed stage sequence:
//! speech-to-text → extraction → categorization → context → education →
//! translation (skipped when the recording is already in the target
//! language) → completion.
//!
//! Each stage appends `started`, runs through the [`StageExecutor`], persists
//! its result, then appends `success`. The first terminal failure moves the
//! record to `failed`, appends `failed` for that stage and stops. Results
//! already persisted are left in place.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use heritix_agents::{AgentOutput, AgentRegistry, Capability, SpeechToText, UNCATEGORIZED};
use heritix_shared::{
    AgentError, ContentField, HeritixError, KnowledgeId, LogOutcome, ProcessingStatus, Stage,
};
use heritix_storage::Storage;

use crate::audio::AudioStore;
use crate::audit::AuditLog;
use crate::executor::StageExecutor;

/// Message recorded when a run is stopped by request.
pub const CANCELLED_MESSAGE: &str = "pipeline cancelled";

/// How a run ended. No other error escapes the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { stage: Stage, message: String },
}

/// Terminal failure of one stage.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Attribute a store or agent error to `stage`.
fn at<E: std::fmt::Display>(stage: Stage) -> impl FnOnce(E) -> StageFailure {
    move |e| StageFailure::new(stage, e.to_string())
}

/// Everything one run needs, shared across runs.
pub struct Pipeline {
    storage: Arc<Storage>,
    audit: AuditLog,
    agents: Arc<AgentRegistry>,
    stt: Arc<dyn SpeechToText>,
    audio: Arc<dyn AudioStore>,
    executor: StageExecutor,
    target_language: String,
}

impl Pipeline {
    pub fn new(
        storage: Arc<Storage>,
        agents: Arc<AgentRegistry>,
        stt: Arc<dyn SpeechToText>,
        audio: Arc<dyn AudioStore>,
        executor: StageExecutor,
        target_language: &str,
    ) -> Self {
        Self {
            audit: AuditLog::new(storage.clone()),
            storage,
            agents,
            stt,
            audio,
            executor,
            target_language: target_language.trim().to_lowercase(),
        }
    }

    /// Run every stage for a record already moved to `processing`.
    #[instrument(skip_all, fields(record_id = %id))]
    pub async fn run(&self, id: &KnowledgeId, cancel: &CancellationToken) -> RunOutcome {
        info!("pipeline started");
        match self.execute(id, cancel).await {
            Ok(()) => {
                info!("pipeline completed");
                RunOutcome::Completed
            }
            Err(failure) => {
                self.record_failure(id, &failure).await;
                RunOutcome::Failed {
                    stage: failure.stage,
                    message: failure.message,
                }
            }
        }
    }

    async fn execute(&self, id: &KnowledgeId, cancel: &CancellationToken) -> Result<(), StageFailure> {
        self.audit
            .success(id, Stage::PipelineStart, None)
            .await
            .map_err(at(Stage::Pipeline))?;

        let meta = self
            .storage
            .get_metadata(id)
            .await
            .map_err(at(Stage::Pipeline))?
            .ok_or_else(|| StageFailure::new(Stage::Pipeline, HeritixError::not_found(id).to_string()))?;

        // --- Speech-to-text ---
        checkpoint(cancel, Stage::SpeechToText)?;
        self.started(id, Stage::SpeechToText).await?;
        let audio = self
            .audio
            .fetch(&meta.audio_url)
            .await
            .map_err(at(Stage::SpeechToText))?;
        let transcription = self
            .executor
            .run(Stage::SpeechToText, || {
                self.stt.transcribe(&audio, &meta.original_filename)
            })
            .await
            .map_err(at(Stage::SpeechToText))?;
        self.storage
            .set_transcription(id, &transcription.text, &transcription.language)
            .await
            .map_err(at(Stage::SpeechToText))?;
        self.succeeded(id, Stage::SpeechToText, None).await?;
        info!(language = %transcription.language, "transcription stored");

        let transcript = transcription.text;

        // --- Knowledge stages ---
        for capability in [
            Capability::Extraction,
            Capability::Categorization,
            Capability::Context,
            Capability::Education,
        ] {
            let stage = capability.stage();
            checkpoint(cancel, stage)?;
            self.started(id, stage).await?;
            let output = self.invoke(capability, &transcript).await.map_err(at(stage))?;
            self.persist(id, capability, &output).await.map_err(at(stage))?;
            self.succeeded(id, stage, output.degradation_reason()).await?;
        }

        // --- Translation ---
        checkpoint(cancel, Stage::Translation)?;
        if same_language(&transcription.language, &self.target_language) {
            info!(language = %transcription.language, "translation skipped, already in target language");
            self.audit
                .record(id, Stage::Translation, LogOutcome::SkippedEn, None)
                .await
                .map_err(at(Stage::Translation))?;
        } else {
            self.started(id, Stage::Translation).await?;
            let output = self
                .invoke(Capability::Translation, &transcript)
                .await
                .map_err(at(Stage::Translation))?;
            self.persist(id, Capability::Translation, &output)
                .await
                .map_err(at(Stage::Translation))?;
            self.succeeded(id, Stage::Translation, output.degradation_reason())
                .await?;
        }

        // --- Completion ---
        self.storage
            .touch_processed_at(id)
            .await
            .map_err(at(Stage::Pipeline))?;
        let moved = self
            .storage
            .transition_status(id, ProcessingStatus::Processing, ProcessingStatus::Completed)
            .await
            .map_err(at(Stage::Pipeline))?;
        if !moved {
            return Err(StageFailure::new(
                Stage::Pipeline,
                "record left processing state during the run",
            ));
        }
        self.audit
            .record(id, Stage::Pipeline, LogOutcome::Completed, None)
            .await
            .map_err(at(Stage::Pipeline))?;
        Ok(())
    }

    /// Fail a run that ended without an outcome, e.g. because its task panicked.
    pub(crate) async fn abort(&self, id: &KnowledgeId, message: String) -> RunOutcome {
        let failure = StageFailure::new(Stage::Pipeline, message);
        self.record_failure(id, &failure).await;
        RunOutcome::Failed {
            stage: failure.stage,
            message: failure.message,
        }
    }

    /// Call one capability through the executor.
    pub(crate) async fn invoke(
        &self,
        capability: Capability,
        text: &str,
    ) -> Result<AgentOutput, AgentError> {
        let agent = self.agents.get(capability);
        let output = self
            .executor
            .run(capability.stage(), || agent.process(text))
            .await?;
        if let Some(reason) = output.degradation_reason() {
            warn!(%capability, %reason, "agent output degraded");
        }
        Ok(output)
    }

    async fn persist(
        &self,
        id: &KnowledgeId,
        capability: Capability,
        output: &AgentOutput,
    ) -> heritix_shared::Result<()> {
        let payload = output.to_payload();
        match capability {
            Capability::Extraction => {
                self.storage
                    .set_content_field(id, ContentField::Extraction, &payload)
                    .await
            }
            Capability::Categorization => {
                let category = output
                    .text_field("category")
                    .unwrap_or_else(|| UNCATEGORIZED.to_string());
                self.storage
                    .set_content_field(id, ContentField::Categorization, &payload)
                    .await?;
                self.storage.set_category(id, &category).await
            }
            Capability::Context => {
                self.storage
                    .set_content_field(id, ContentField::Context, &payload)
                    .await
            }
            Capability::Education => {
                self.storage
                    .set_content_field(id, ContentField::Education, &payload)
                    .await
            }
            Capability::Translation => {
                self.storage
                    .merge_translations(
                        id,
                        &output.translations(&self.target_language),
                        output.degradation_reason(),
                    )
                    .await
            }
        }
    }

    async fn started(&self, id: &KnowledgeId, stage: Stage) -> Result<(), StageFailure> {
        self.audit.started(id, stage).await.map_err(at(stage))?;
        Ok(())
    }

    async fn succeeded(
        &self,
        id: &KnowledgeId,
        stage: Stage,
        note: Option<&str>,
    ) -> Result<(), StageFailure> {
        self.audit.success(id, stage, note).await.map_err(at(stage))?;
        Ok(())
    }

    /// Move to `failed` and log the stage failure. Store errors here are only logged.
    async fn record_failure(&self, id: &KnowledgeId, failure: &StageFailure) {
        error!(stage = %failure.stage, message = %failure.message, "pipeline failed");

        match self
            .storage
            .transition_status(id, ProcessingStatus::Processing, ProcessingStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("record was not in processing state when failing"),
            Err(e) => error!(error = %e, "could not mark record failed"),
        }

        if let Err(e) = self.audit.failed(id, failure.stage, &failure.message).await {
            error!(error = %e, "could not write failure entry");
        }
    }
}

fn checkpoint(cancel: &CancellationToken, stage: Stage) -> Result<(), StageFailure> {
    if cancel.is_cancelled() {
        return Err(StageFailure::new(stage, CANCELLED_MESSAGE));
    }
    Ok(())
}

fn same_language(detected: &str, target: &str) -> bool {
    detected.trim().eq_ignore_ascii_case(target.trim())
}
