//! Error types for Rowboat.
//!
//! Library crates use [`RowboatError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Rowboat operations.
#[derive(Debug, thiserror::Error)]
pub enum RowboatError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error (timeouts, connection failures, 5xx responses).
    #[error("network error: {0}")]
    Network(String),

    /// The remote service rejected the call due to throughput (429-equivalent).
    #[error("throttled: {0}")]
    Throttled(String),

    /// Search provider rejected the request (bad credentials, malformed query).
    #[error("search error: {0}")]
    Search(String),

    /// Model provider rejected the request (bad credentials, malformed request,
    /// unusable response body).
    #[error("model error: {0}")]
    Model(String),

    /// Database or cache store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Structured output did not conform to the declared schema.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Dataset read/write error (CSV parsing, missing columns).
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A row exceeded its wall-clock budget.
    #[error("row timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RowboatError>;

impl RowboatError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry can reasonably be expected to succeed.
    ///
    /// Network failures, throttling, and storage hiccups are transient;
    /// everything else (bad credentials, malformed requests, schema
    /// violations) is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Throttled(_) | Self::Storage(_)
        )
    }
}
