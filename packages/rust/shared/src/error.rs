//! Error types for Briefwise.
//!
//! Library crates use [`BriefwiseError`] via `thiserror`. Pipeline steps never
//! let it escape: they fold it into a step outcome instead.

use std::path::PathBuf;

/// Top-level error type for all Briefwise operations.
#[derive(Debug, thiserror::Error)]
pub enum BriefwiseError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP error talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// LLM collaborator error (API status, exhausted retries).
    #[error("llm error: {0}")]
    Llm(String),

    /// Collaborator output did not match the expected structure.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Rejected job inputs. Displays the bare message, which is what ends
    /// up in a job's `errors`.
    #[error("{message}")]
    Validation { message: String },

    /// Pipeline graph definition error, raised at build time.
    #[error("graph error: {message}")]
    Graph { message: String },

    /// Job store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unknown job identifier.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BriefwiseError>;

impl BriefwiseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a graph definition error.
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph {
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

    /// Whether retrying the same collaborator call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
