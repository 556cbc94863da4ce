//! Error types for the cache and pipeline
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Chain Error Enum ==
/// Unified error type for caches, pipelines and generation calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// Misuse detected at the call site (missing template value, bad options)
    #[error("Validation error: {0}")]
    Validation(String),

    /// An array-only operation received something else
    #[error("Type mismatch: {operation} requires array input, got {found}")]
    TypeMismatch {
        operation: &'static str,
        found: &'static str,
    },

    /// A step did not finish within its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The cancellation signal fired; never retried, never swallowed
    #[error("Operation cancelled")]
    Cancelled,

    /// Any other failure reported by the generation service
    #[error("{0}")]
    Generation(String),

    /// The token budget would be exceeded by the next request
    #[error("Token limit would be exceeded: {requested} requested, {remaining} remaining")]
    TokenLimitExceeded { requested: usize, remaining: i64 },

    /// A debounced call was replaced by a newer one before it ran
    #[error("Superseded by a later debounced call")]
    Superseded,

    /// Durable storage failed; logged by the cache, never returned from it
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Failure raised by a caller-supplied pipeline step
    #[error("Step failed: {0}")]
    Step(String),
}

impl ChainError {
    /// Shorthand for a step failure with a message.
    pub fn step(msg: impl Into<String>) -> Self {
        ChainError::Step(msg.into())
    }

    /// Shorthand for a validation failure with a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        ChainError::Validation(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChainError::Cancelled)
    }

    /// Everything except cancellation and debounce supersession may be
    /// attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChainError::Cancelled | ChainError::Superseded)
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Persistence(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, ChainError>;
