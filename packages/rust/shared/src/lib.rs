//! Shared types, error model, and configuration for Heritix.
//!
//! This crate is the foundation depended on by all other Heritix crates.
//! It provides:
//! - [`HeritixError`] and [`AgentError`], the error types
//! - Domain types ([`KnowledgeMetadata`], [`KnowledgeContent`], [`ProcessingLogEntry`])
//! - Configuration ([`AppConfig`], [`RetryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LlmConfig, PipelineConfig, RetryConfig, StorageConfig, UploadConfig, UploadPolicy,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{AgentError, HeritixError, Result, RetryPolicy};
pub use types::{
    ContentField, KnowledgeContent, KnowledgeId, KnowledgeMetadata, LogOutcome,
    ProcessingLogEntry, ProcessingStatus, SearchFilters, Stage,
};
