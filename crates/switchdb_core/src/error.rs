//! Error types for models, the mapper, the cache, and the update engine.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SwitchDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema parsing or legality error.
    #[error("schema error: {0}")]
    Schema(#[from] switchdb_schema::SchemaError),

    /// Wire value conversion error.
    #[error("codec error: {0}")]
    Codec(#[from] switchdb_codec::CodecError),

    /// Wire message error.
    #[error("protocol error: {0}")]
    Protocol(#[from] switchdb_protocol::ProtocolError),

    /// A table is not part of the schema or the registry.
    #[error("unknown table {table:?}")]
    UnknownTable {
        /// The missing table.
        table: String,
    },

    /// A column name does not belong to the model it was used with.
    #[error("unknown column {column:?} for table {table:?}")]
    UnknownColumn {
        /// The model's table.
        table: String,
        /// The foreign column name.
        column: String,
    },

    /// A model field's static type disagrees with the schema.
    #[error("schema violation on {table}.{column}: {message}")]
    SchemaViolation {
        /// Table of the offending model.
        table: String,
        /// Column whose declaration disagrees.
        column: String,
        /// What disagrees.
        message: String,
    },

    /// Two fields of one model carry the same column tag.
    #[error("duplicate column tag {column:?} on model for table {table:?}")]
    DuplicateColumnTag {
        /// The model's table.
        table: String,
        /// The repeated tag.
        column: String,
    },

    /// A model type was used without being registered.
    #[error("no model registered for table {table:?}")]
    ModelNotRegistered {
        /// The table the model claimed.
        table: String,
    },

    /// No populated unique index could be derived from a model.
    #[error("no usable index for table {table:?}: no unique index is fully populated")]
    IndexUnavailable {
        /// The table whose indexes were tried.
        table: String,
    },

    /// A mutation failed validation.
    #[error("invalid mutation on {table}.{column}: {message}")]
    InvalidMutation {
        /// Target table.
        table: String,
        /// Target column.
        column: String,
        /// What was wrong.
        message: String,
    },

    /// A condition failed validation.
    #[error("invalid condition on {table}.{column}: {message}")]
    InvalidCondition {
        /// Target table.
        table: String,
        /// Target column.
        column: String,
        /// What was wrong.
        message: String,
    },

    /// A lookup found nothing.
    #[error("not found")]
    NotFound,

    /// Two rows would share a unique index tuple.
    #[error("index clash in table {table:?} on index {index:?}")]
    IndexClash {
        /// The table.
        table: String,
        /// The violated index columns.
        index: Vec<String>,
    },

    /// An incoming update disagrees with the cache's present state.
    #[error("cache inconsistent: {message}")]
    CacheInconsistent {
        /// What disagreed.
        message: String,
    },

    /// A strong reference points at a row that does not exist.
    #[error("referential integrity violation: {message}")]
    ReferentialIntegrityViolation {
        /// The dangling reference.
        message: String,
    },

    /// A schema constraint was broken, locally or by a cleanup.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// What was violated.
        message: String,
    },

    /// Two successive row operations cannot be composed.
    #[error("illegal operation sequence: {message}")]
    IllegalSequence {
        /// The rejected composition.
        message: String,
    },
}
