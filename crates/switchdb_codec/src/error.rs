//! Error types for the value codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting between wire and native values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The wire value's shape does not match the column type.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// What the column type called for.
        expected: String,
        /// What was found instead.
        got: String,
    },

    /// A numeric coercion would lose information.
    #[error("numeric value {value} cannot be represented exactly as {target}")]
    ConversionOutOfRange {
        /// Textual form of the offending number.
        value: String,
        /// The declared kind it was coerced to.
        target: String,
    },

    /// An identifier string is not a canonical 36-character uuid.
    #[error("malformed uuid {text:?}")]
    MalformedUuid {
        /// The offending text.
        text: String,
    },

    /// A decoded value violates the column's domain constraints.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// What was violated.
        message: String,
    },
}

impl CodecError {
    /// Builds a [`CodecError::TypeMismatch`].
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        CodecError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
