//! Error types for quarry-core.
//!
//! One hierarchical enum so callers can pattern-match on the failure class.
//! Low-layer failures (per-file parse, per-item LLM calls) are recovered
//! where they occur and recorded; mid-layer failures (a whole phase, a
//! search request) surface to the caller through this type.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all quarry-core operations.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Malformed query, invalid option, or unsupported language.
    /// Surfaced to the caller; never retried.
    #[error("invalid input: {message}")]
    Input {
        /// What was wrong with the input.
        message: String,
    },

    /// Tree-sitter failed for a specific file. Ingestion swallows this,
    /// emits at least the file unit, and continues.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// I/O or schema issue in the persistent stores. Partial writes are
    /// rolled back at the transaction boundary.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding inference failed for a document.
    #[error("embedding error: {message}")]
    Embedding {
        /// Human-readable error description.
        message: String,
    },

    /// An LLM call failed. The sub-kind decides retry behaviour.
    #[error("llm error ({kind:?}): {message}")]
    Llm {
        /// Retry classification of the failure.
        kind: LlmErrorKind,
        /// Human-readable error description.
        message: String,
    },

    /// LLM output failed JSON validation or was too short to be usable.
    /// Counted as a non-recoverable item failure.
    #[error("invalid LLM response: {message}")]
    InvalidResponse {
        /// What was wrong with the response.
        message: String,
    },

    /// A batch or phase exceeded its time budget. The affected item is
    /// marked failed; the phase continues.
    #[error("timeout after {elapsed_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// How long the operation ran before being cut off.
        elapsed_ms: u64,
    },

    /// A benchmark phase executor threw. The run is marked failed and
    /// downstream phases are blocked.
    #[error("phase '{phase}' failed: {message}")]
    Phase {
        /// Name of the failed phase.
        phase: String,
        /// Human-readable error description.
        message: String,
    },

    /// User cancellation. Current work stops cleanly with state persisted.
    #[error("operation aborted")]
    Aborted,

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Retry classification for LLM failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Provider signalled a rate limit; the caller should back off.
    RateLimited,
    /// Transient failure worth retrying with backoff.
    Recoverable,
    /// Failure that will not succeed on retry; the item is counted failed.
    NonRecoverable,
}

impl QuarryError {
    /// Construct an [`QuarryError::Input`] from anything stringy.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input { message: message.into() }
    }

    /// Construct a rate-limit error with a suggested retry delay.
    pub fn rate_limited(message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::Llm {
            kind: LlmErrorKind::RateLimited,
            message: format!("{} (retry after {retry_after_ms}ms)", message.into()),
        }
    }

    /// Whether this failure should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Llm { kind: LlmErrorKind::RateLimited | LlmErrorKind::Recoverable, .. }
        )
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for Results in quarry-core.
pub type QuarryResult<T> = Result<T, QuarryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let rate = QuarryError::rate_limited("slow down", 500);
        assert!(rate.is_retryable());

        let hard = QuarryError::Llm {
            kind: LlmErrorKind::NonRecoverable,
            message: "model gone".into(),
        };
        assert!(!hard.is_retryable());

        assert!(!QuarryError::Aborted.is_retryable());
    }
}
