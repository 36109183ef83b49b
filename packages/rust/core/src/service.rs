//! Knowledge service: the operations exposed to callers.
//!
//! - [`KnowledgeService::upload`] validates and stores a recording
//! - [`KnowledgeService::start_processing`] schedules a detached pipeline run
//! - [`KnowledgeService::get_status`] and [`KnowledgeService::search`] are read-only
//! - [`KnowledgeService::analyze_text`] runs every agent over raw text without persisting

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use heritix_agents::{AgentRegistry, Capability, SpeechToText};
use heritix_shared::{
    AppConfig, HeritixError, KnowledgeId, ProcessingStatus, Result, RetryConfig, SearchFilters,
    Stage, UploadPolicy,
};
use heritix_storage::{NewKnowledge, SearchHit, Storage};

use crate::audio::AudioStore;
use crate::audit::AuditLog;
use crate::executor::StageExecutor;
use crate::pipeline::Pipeline;
use crate::runner::{PipelineJob, PipelineRunner};
use crate::status::{self, StatusReport};

/// Contributor recorded when none is given.
const ANONYMOUS: &str = "Anonymous";

/// A recording submitted for archiving.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub audio: Vec<u8>,
    /// Declared MIME type, checked against the allow-list.
    pub content_type: String,
    pub file_name: String,
    pub contributor: String,
    pub consent: bool,
    /// Defaults to `Recording YYYY-MM-DD HH:MM`.
    pub title: Option<String>,
}

/// Every capability's result for one text.
#[derive(Debug, Clone, Serialize)]
pub struct TextAnalysis {
    pub original_text: String,
    pub extraction: Value,
    pub categorization: Value,
    pub context: Value,
    pub education: Value,
    pub translation: Value,
}

pub struct KnowledgeService {
    storage: Arc<Storage>,
    audit: AuditLog,
    audio: Arc<dyn AudioStore>,
    pipeline: Arc<Pipeline>,
    runner: PipelineRunner,
    policy: UploadPolicy,
    status_log_limit: u32,
    search_limit: u32,
}

impl KnowledgeService {
    pub fn new(
        storage: Arc<Storage>,
        agents: Arc<AgentRegistry>,
        stt: Arc<dyn SpeechToText>,
        audio: Arc<dyn AudioStore>,
        config: &AppConfig,
    ) -> Self {
        let executor = StageExecutor::new(RetryConfig::from(config));
        let pipeline = Arc::new(Pipeline::new(
            storage.clone(),
            agents,
            stt,
            audio.clone(),
            executor,
            &config.pipeline.target_language,
        ));
        Self {
            audit: AuditLog::new(storage.clone()),
            runner: PipelineRunner::new(pipeline.clone(), config.pipeline.max_concurrent_runs),
            storage,
            audio,
            pipeline,
            policy: UploadPolicy::from(config),
            status_log_limit: config.pipeline.status_log_limit,
            search_limit: config.pipeline.search_limit,
        }
    }

    /// Validate and store a recording, creating its record in `uploaded` state.
    ///
    /// Nothing is written when validation fails.
    #[instrument(skip_all, fields(file = %request.file_name, bytes = request.audio.len()))]
    pub async fn upload(&self, request: UploadRequest) -> Result<KnowledgeId> {
        self.validate(&request)?;

        let id = KnowledgeId::new();
        let original_filename = sanitize_filename(&request.file_name);
        let audio_url = self
            .audio
            .store(&request.audio, &format!("{id}_{original_filename}"))
            .await?;

        let contributor = match request.contributor.trim() {
            "" => ANONYMOUS.to_string(),
            name => name.to_string(),
        };
        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Utc::now().format("Recording %Y-%m-%d %H:%M").to_string());

        let record = NewKnowledge {
            id: id.clone(),
            title,
            contributor,
            consent: request.consent,
            audio_url,
            original_filename,
        };
        if let Err(e) = self.storage.insert_record(&record).await {
            if let Err(cleanup) = self.audio.remove(&record.audio_url).await {
                warn!(error = %cleanup, "could not remove audio of rejected upload");
            }
            return Err(e);
        }
        // The record exists from here on; a missing log entry does not undo it
        if let Err(e) = self.audit.success(&id, Stage::Upload, None).await {
            warn!(record_id = %id, error = %e, "upload log entry not written");
        }

        info!(record_id = %id, "upload stored");
        Ok(id)
    }

    fn validate(&self, request: &UploadRequest) -> Result<()> {
        if !request.consent {
            return Err(HeritixError::validation(
                "User consent is required to process audio.",
            ));
        }
        let content_type = request.content_type.trim().to_ascii_lowercase();
        if !self.policy.allowed_types.iter().any(|t| *t == content_type) {
            return Err(HeritixError::validation(format!(
                "Invalid file type '{}'. Allowed: {}",
                request.content_type,
                self.policy.allowed_types.join(", ")
            )));
        }
        if request.audio.len() > self.policy.max_bytes {
            return Err(HeritixError::validation(format!(
                "File too large. Limit: {}MB",
                self.policy.max_bytes / (1024 * 1024)
            )));
        }
        if request.audio.is_empty() {
            return Err(HeritixError::validation("Audio file is empty."));
        }
        Ok(())
    }

    /// Move a record to `processing` and start its pipeline in the background.
    ///
    /// Only records in `uploaded` state can start. Of concurrent starts for one
    /// record exactly one succeeds.
    #[instrument(skip_all, fields(record_id = %id))]
    pub async fn start_processing(&self, id: &KnowledgeId) -> Result<PipelineJob> {
        let meta = self
            .storage
            .get_metadata(id)
            .await?
            .ok_or_else(|| HeritixError::not_found(id))?;

        let claimed = self
            .storage
            .transition_status(id, ProcessingStatus::Uploaded, ProcessingStatus::Processing)
            .await?;
        if !claimed {
            let from = self
                .storage
                .get_metadata(id)
                .await?
                .map_or(meta.processing_status, |m| m.processing_status);
            return Err(HeritixError::InvalidTransition {
                id: id.clone(),
                from,
                to: ProcessingStatus::Processing,
            });
        }

        info!("processing scheduled");
        Ok(self.runner.submit(id.clone()))
    }

    pub async fn get_status(&self, id: &KnowledgeId) -> Result<StatusReport> {
        status::aggregate(&self.storage, id, self.status_log_limit).await
    }

    pub async fn search(&self, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        self.storage.search(filters, self.search_limit).await
    }

    /// Request cancellation of a running pipeline. Returns whether one was active.
    pub fn cancel(&self, id: &KnowledgeId) -> bool {
        self.runner.cancel(id)
    }

    /// Runs submitted and not yet finished.
    pub fn active_runs(&self) -> usize {
        self.runner.active_runs()
    }

    /// Run every capability over `text`. Nothing is persisted.
    #[instrument(skip_all, fields(chars = text.len()))]
    pub async fn analyze_text(&self, text: &str) -> Result<TextAnalysis> {
        if text.trim().is_empty() {
            return Err(HeritixError::validation("Text to analyze is empty."));
        }

        let mut payloads = Vec::with_capacity(Capability::ALL.len());
        for capability in Capability::ALL {
            let output = self.pipeline.invoke(capability, text).await?;
            payloads.push(output.to_payload());
        }
        let [extraction, categorization, context, education, translation] =
            <[Value; 5]>::try_from(payloads)
                .map_err(|_| HeritixError::Pipeline("missing capability result".into()))?;

        Ok(TextAnalysis {
            original_text: text.to_string(),
            extraction,
            categorization,
            context,
            education,
            translation,
        })
    }
}

/// Reduce a user-supplied file name to `[A-Za-z0-9._-]`, dropping any path.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    match cleaned.trim_matches(|c| c == '.' || c == '_') {
        "" => "audio".to_string(),
        safe => safe.to_string(),
    }
}
