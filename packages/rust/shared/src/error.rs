//! Error types for Heritix.
//!
//! Library crates use [`HeritixError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Failures of the external text-generation and speech-to-text services are
//! reported as [`AgentError`], which carries a [`RetryPolicy`] so the stage
//! executor can decide whether another attempt is worthwhile.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{KnowledgeId, ProcessingStatus};

/// Top-level error type for all Heritix operations.
#[derive(Debug, thiserror::Error)]
pub enum HeritixError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Rejected upload input (missing consent, disallowed type, oversized file).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The referenced knowledge record does not exist.
    #[error("knowledge record {id} not found")]
    NotFound { id: KnowledgeId },

    /// The record is not in a state that permits the requested transition.
    #[error("knowledge record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: KnowledgeId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    /// Network/HTTP error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A detached pipeline run could not be observed (task panicked or was aborted).
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A capability or transcription call failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HeritixError>;

impl HeritixError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a record id.
    pub fn not_found(id: &KnowledgeId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Whether a failed call is safe to retry and, if so, after what delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The call may be retried.
    ///
    /// `after` is the minimum delay requested by the service (e.g. from a
    /// `Retry-After` header). `None` means use the executor's own schedule.
    Retryable { after: Option<Duration> },
    /// The call must not be retried.
    NonRetryable,
}

/// Failure of an external capability call.
///
/// Malformed model output is never an `AgentError`; agents downgrade it to a
/// degraded result instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// Recoverable condition: transport failure, rate limit, server error.
    #[error("transient service error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Condition that will not improve on retry (bad credentials, bad request).
    #[error("service error: {message}")]
    Fatal { message: String },
}

impl AgentError {
    /// Create a transient error with no retry hint.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient {
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Create a non-retryable error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal {
            message: msg.into(),
        }
    }

    /// Retry classification for the stage executor.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Fatal { .. } => RetryPolicy::NonRetryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HeritixError::validation("User consent is required to process audio.");
        assert_eq!(
            err.to_string(),
            "validation error: User consent is required to process audio."
        );

        let id: KnowledgeId = "0190c0de-0000-7000-8000-000000000001".parse().unwrap();
        let err = HeritixError::InvalidTransition {
            id,
            from: ProcessingStatus::Completed,
            to: ProcessingStatus::Processing,
        };
        assert!(err.to_string().contains("from completed to processing"));
    }

    #[test]
    fn agent_error_retry_policy() {
        let err = AgentError::Transient {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            err.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            AgentError::fatal("401 unauthorized").retry_policy(),
            RetryPolicy::NonRetryable
        );
    }

    #[test]
    fn agent_error_converts_transparently() {
        let err: HeritixError = AgentError::fatal("bad request").into();
        assert_eq!(err.to_string(), "service error: bad request");
    }
}
