//! Error types for the wire protocol vocabulary.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while assembling or interpreting wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message or fragment had the wrong JSON shape.
    #[error("malformed message: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
    },

    /// The same named-uuid placeholder would be bound to two different
    /// real identifiers within one transaction.
    #[error("duplicate uuid name {name:?}")]
    DuplicateUuidName {
        /// The offending placeholder.
        name: String,
    },

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
