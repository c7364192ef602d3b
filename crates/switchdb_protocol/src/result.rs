//! Per-operation transaction results and the server error taxonomy.

use crate::op::{tagged_uuid, Operation, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The result of one operation inside a `transact` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationResult {
    /// Rows affected, for update/mutate/delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Identifier of an inserted row.
    #[serde(with = "tagged_uuid", skip_serializing_if = "Option::is_none", default)]
    pub uuid: Option<Uuid>,
    /// Rows returned by a select.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Error class, present when the operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Classified server-side transaction error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnErrorKind {
    /// A referenced row does not exist.
    ReferentialIntegrityViolation,
    /// A value broke a schema constraint.
    ConstraintViolation,
    /// The same uuid-name was used twice.
    DuplicateUuidName,
    /// A value fell outside the column's domain.
    DomainError,
    /// A value fell outside a numeric range.
    RangeError,
    /// The server ran out of some resource.
    ResourcesExhausted,
    /// A wait operation timed out.
    TimedOut,
    /// The operation is not supported by this server.
    NotSupported,
    /// The transaction was aborted.
    Aborted,
    /// A lock assertion failed.
    NotOwner,
    /// The server hit an I/O error.
    IoError,
    /// Anything the client does not classify.
    Server,
}

impl TxnErrorKind {
    /// Maps the wire error string to a kind.
    pub fn from_wire(error: &str) -> Self {
        match error {
            "referential integrity violation" => TxnErrorKind::ReferentialIntegrityViolation,
            "constraint violation" => TxnErrorKind::ConstraintViolation,
            "duplicate uuid name" => TxnErrorKind::DuplicateUuidName,
            "domain error" => TxnErrorKind::DomainError,
            "range error" => TxnErrorKind::RangeError,
            "resources exhausted" => TxnErrorKind::ResourcesExhausted,
            "timed out" => TxnErrorKind::TimedOut,
            "not supported" => TxnErrorKind::NotSupported,
            "aborted" => TxnErrorKind::Aborted,
            "not owner" => TxnErrorKind::NotOwner,
            "I/O error" => TxnErrorKind::IoError,
            _ => TxnErrorKind::Server,
        }
    }
}

/// A failed operation inside an otherwise accepted transaction.
#[derive(Debug, Clone, Error)]
#[error("operation {index} ({operation}) failed: {error} {}", .details.as_deref().unwrap_or(""))]
pub struct OperationError {
    /// Index of the failed operation within the transaction.
    pub index: usize,
    /// Wire name of the failed operation, or "?" past the submitted ops.
    pub operation: String,
    /// Classified kind.
    pub kind: TxnErrorKind,
    /// Raw error class from the server.
    pub error: String,
    /// Human-readable details, when the server sent any.
    pub details: Option<String>,
}

/// Checks a transact reply against the submitted operations.
///
/// The overall call succeeded; this inspects each per-operation result and
/// surfaces the first failure, naming the offending operation. The server
/// may append one trailing result describing a transaction-wide failure.
pub fn check_operation_results(
    results: &[OperationResult],
    operations: &[Operation],
) -> Result<(), OperationError> {
    for (index, result) in results.iter().enumerate() {
        if let Some(error) = &result.error {
            let operation = operations
                .get(index)
                .map(|op| op.op_name().to_string())
                .unwrap_or_else(|| "?".to_string());
            return Err(OperationError {
                index,
                operation,
                kind: TxnErrorKind::from_wire(error),
                error: error.clone(),
                details: result.details.clone(),
            });
        }
    }
    Ok(())
}
