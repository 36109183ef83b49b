//! Core domain types for Heritix knowledge records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// KnowledgeId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for knowledge record identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeId(pub Uuid);

impl KnowledgeId {
    /// Generate a new time-sortable record identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for KnowledgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a knowledge record.
///
/// Legal edges: `Uploaded → Processing → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uploaded, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown processing status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage / LogOutcome
// ---------------------------------------------------------------------------

/// Named step recorded in the processing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    PipelineStart,
    #[serde(rename = "stt")]
    SpeechToText,
    Extraction,
    Categorization,
    Context,
    Education,
    Translation,
    /// Whole-run entries: completion, and failures outside any single stage.
    Pipeline,
}

impl Stage {
    /// Log and storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::PipelineStart => "pipeline_start",
            Self::SpeechToText => "stt",
            Self::Extraction => "extraction",
            Self::Categorization => "categorization",
            Self::Context => "context",
            Self::Education => "education",
            Self::Translation => "translation",
            Self::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "pipeline_start" => Ok(Self::PipelineStart),
            "stt" => Ok(Self::SpeechToText),
            "extraction" => Ok(Self::Extraction),
            "categorization" => Ok(Self::Categorization),
            "context" => Ok(Self::Context),
            "education" => Ok(Self::Education),
            "translation" => Ok(Self::Translation),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Outcome recorded for one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Started,
    Success,
    Failed,
    /// Translation skipped because the source is already in the target language.
    #[serde(rename = "skipped_en")]
    SkippedEn,
    /// Terminal entry of a run that went through every stage.
    Completed,
}

impl LogOutcome {
    /// Log and storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::SkippedEn => "skipped_en",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped_en" => Ok(Self::SkippedEn),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown log outcome '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Metadata row of a knowledge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    pub id: KnowledgeId,
    pub title: String,
    pub contributor: String,
    pub consent: bool,
    /// Retrievable location of the stored audio.
    pub audio_url: String,
    /// Sanitized name of the uploaded file.
    pub original_filename: String,
    /// Set by the speech-to-text stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// ISO-639-1 code set by the speech-to-text stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    /// Set by the categorization stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub processing_status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enrichment results of a knowledge record, filled stage by stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeContent {
    pub knowledge_id: KnowledgeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education_data: Option<serde_json::Value>,
    /// Language code → translated text.
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    /// Language code → reason, for translations kept as raw model output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translation_errors: BTreeMap<String, String>,
    pub processed_at: DateTime<Utc>,
}

/// One append-only entry of the processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    /// Insertion sequence; breaks ties between equal timestamps.
    pub seq: i64,
    pub knowledge_id: KnowledgeId,
    pub stage: Stage,
    pub outcome: LogOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Single-field content update written by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentField {
    Extraction,
    Categorization,
    Context,
    Education,
}

impl ContentField {
    /// Column name in the content table.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction_data",
            Self::Categorization => "categorization_data",
            Self::Context => "context_data",
            Self::Education => "education_data",
        }
    }
}

/// Optional filters for archive search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Exact category; `"All"` disables the filter.
    pub category: Option<String>,
    /// Detected language code.
    pub language: Option<String>,
    /// Case-insensitive match on title or transcript.
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_id_roundtrip() {
        let id = KnowledgeId::new();
        let s = id.to_string();
        let parsed: KnowledgeId = s.parse().expect("parse KnowledgeId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_transitions() {
        use ProcessingStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Uploaded.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Uploaded));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Uploaded));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn storage_keys_parse_back() {
        for stage in [
            Stage::Upload,
            Stage::PipelineStart,
            Stage::SpeechToText,
            Stage::Extraction,
            Stage::Categorization,
            Stage::Context,
            Stage::Education,
            Stage::Translation,
            Stage::Pipeline,
        ] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("skipped_en".parse::<LogOutcome>().unwrap(), LogOutcome::SkippedEn);
        assert!("paused".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn serde_names_match_storage_keys() {
        assert_eq!(serde_json::to_string(&Stage::SpeechToText).unwrap(), r#""stt""#);
        assert_eq!(
            serde_json::to_string(&LogOutcome::SkippedEn).unwrap(),
            r#""skipped_en""#
        );
        assert_eq!(
            serde_json::to_string(&ProcessingStatus::Uploaded).unwrap(),
            r#""uploaded""#
        );
    }
}
