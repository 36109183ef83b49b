//! Read-only status view of one knowledge record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use heritix_shared::{
    HeritixError, KnowledgeContent, KnowledgeId, KnowledgeMetadata, ProcessingLogEntry,
    ProcessingStatus, Result, Stage,
};
use heritix_storage::Storage;

/// Characters of transcript shown in the status view.
const TRANSCRIPT_PREVIEW_CHARS: usize = 100;

/// Metadata, content presence and recent log entries for one record.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub record_id: KnowledgeId,
    pub status: ProcessingStatus,
    pub metadata: StatusMetadata,
    pub content_preview: ContentPreview,
    /// Newest first.
    pub logs: Vec<ProcessingLogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMetadata {
    pub title: String,
    pub contributor: String,
    pub language: Option<String>,
    pub category: Option<String>,
    pub transcript_preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which content fields have been written so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentPreview {
    pub has_extraction: bool,
    pub has_categorization: bool,
    pub has_context: bool,
    pub has_education: bool,
    /// Language codes with a translation.
    pub translations: Vec<String>,
    /// Stages whose stored result is raw model output that could not be parsed.
    pub degraded: Vec<String>,
}

impl StatusReport {
    /// The most recent log entry, if any.
    pub fn latest(&self) -> Option<&ProcessingLogEntry> {
        self.logs.first()
    }
}

impl From<&KnowledgeContent> for ContentPreview {
    fn from(content: &KnowledgeContent) -> Self {
        let mut degraded: Vec<String> = [
            (Stage::Extraction, &content.extraction_data),
            (Stage::Categorization, &content.categorization_data),
            (Stage::Context, &content.context_data),
            (Stage::Education, &content.education_data),
        ]
        .into_iter()
        .filter(|(_, value)| is_degraded(value))
        .map(|(stage, _)| stage.to_string())
        .collect();
        if !content.translation_errors.is_empty() {
            degraded.push(Stage::Translation.to_string());
        }

        Self {
            has_extraction: present(&content.extraction_data),
            has_categorization: present(&content.categorization_data),
            has_context: present(&content.context_data),
            has_education: present(&content.education_data),
            translations: content.translations.keys().cloned().collect(),
            degraded,
        }
    }
}

/// Degraded results are stored as `{"error", "raw_output"}`.
fn is_degraded(value: &Option<serde_json::Value>) -> bool {
    matches!(
        value,
        Some(serde_json::Value::Object(map)) if map.contains_key("error") && map.contains_key("raw_output")
    )
}

fn present(value: &Option<serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

fn summarize(meta: &KnowledgeMetadata) -> StatusMetadata {
    StatusMetadata {
        title: meta.title.clone(),
        contributor: meta.contributor.clone(),
        language: meta.detected_language.clone(),
        category: meta.category.clone(),
        transcript_preview: meta
            .transcript
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(TRANSCRIPT_PREVIEW_CHARS)
            .collect(),
        created_at: meta.created_at,
        updated_at: meta.updated_at,
    }
}

/// Build the status view. Never writes.
pub async fn aggregate(storage: &Storage, id: &KnowledgeId, log_limit: u32) -> Result<StatusReport> {
    let meta = storage
        .get_metadata(id)
        .await?
        .ok_or_else(|| HeritixError::not_found(id))?;
    let content_preview = storage
        .get_content(id)
        .await?
        .as_ref()
        .map(ContentPreview::from)
        .unwrap_or_default();
    let logs = storage.recent_logs(id, log_limit).await?;

    Ok(StatusReport {
        record_id: meta.id.clone(),
        status: meta.processing_status,
        metadata: summarize(&meta),
        content_preview,
        logs,
    })
}
