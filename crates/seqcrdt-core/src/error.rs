//! Error types for the sequence engine.

use thiserror::Error;

/// Errors raised synchronously at the offending call. None is retried
/// internally; none leaves index state partially mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    /// The handle was used before being attached to a document context.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Malformed input, or an identity not resolvable against local state.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resolvable boundaries that are inconsistent with document order.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CrdtError {
    fn from(err: serde_json::Error) -> Self {
        CrdtError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CrdtError>;
