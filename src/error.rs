//! Error types shared across the meeting engine.
//!
//! The taxonomy maps one-to-one onto the HTTP surface: validation errors are
//! 4xx and never mutate state, conflicts are 409, LLM auth/quota/fatal errors
//! carry their own status codes, and store failures mark the meeting failed.

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// Top-level error for engine, runner, and surface operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input or an operation invalid for the meeting's state.
    #[error("{0}")]
    Validation(String),

    /// A second run was requested while one is in flight.
    #[error("a run is already in flight for meeting {0}")]
    Conflict(String),

    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// An LLM call failed after retries were exhausted.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The persistent store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Shorthand for a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Shorthand for a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}
