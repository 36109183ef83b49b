//! Core orchestration for Heritix.
//!
//! This crate ties together storage, the knowledge agents and speech-to-text
//! into the upload → process → status workflow exposed by [`KnowledgeService`].

pub mod audio;
pub mod audit;
pub mod executor;
pub mod pipeline;
pub mod runner;
pub mod service;
pub mod status;

#[cfg(test)]
mod testing;

pub use audio::{AudioStore, LocalAudioStore};
pub use audit::AuditLog;
pub use executor::StageExecutor;
pub use pipeline::{CANCELLED_MESSAGE, Pipeline, RunOutcome, StageFailure};
pub use runner::{PipelineJob, PipelineRunner};
pub use service::{KnowledgeService, TextAnalysis, UploadRequest, sanitize_filename};
pub use status::{ContentPreview, StatusMetadata, StatusReport};
