//! Error types for schema parsing and validation.

use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while parsing or validating a database schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document is not valid JSON or has the wrong shape.
    #[error("malformed schema: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The schema version is not a valid `x.y.z` string.
    #[error("invalid schema version {version:?}")]
    InvalidVersion {
        /// The offending version string.
        version: String,
    },

    /// A table was looked up that the schema does not declare.
    #[error("unknown table {table:?}")]
    UnknownTable {
        /// Name of the missing table.
        table: String,
    },

    /// A column was looked up that the table does not declare.
    #[error("unknown column {column:?} in table {table:?}")]
    UnknownColumn {
        /// Table that was searched.
        table: String,
        /// Name of the missing column.
        column: String,
    },

    /// A column type declaration is internally inconsistent.
    #[error("invalid type for column {column:?}: {message}")]
    InvalidColumnType {
        /// The offending column.
        column: String,
        /// What is wrong with the declaration.
        message: String,
    },

    /// A mutator is not legal for the column it targets.
    #[error("mutator {mutator:?} is not allowed on column {column:?}: {message}")]
    IllegalMutator {
        /// The offending column.
        column: String,
        /// The rejected mutator.
        mutator: String,
        /// Why the mutator is rejected.
        message: String,
    },

    /// A condition function is not legal for the column it targets.
    #[error("condition {function:?} is not allowed on column {column:?}: {message}")]
    IllegalCondition {
        /// The offending column.
        column: String,
        /// The rejected condition function.
        function: String,
        /// Why the function is rejected.
        message: String,
    },
}
