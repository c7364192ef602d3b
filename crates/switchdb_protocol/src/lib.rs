//! # SwitchDB Protocol
//!
//! Wire vocabulary for the JSON-RPC management-database protocol:
//! transact operations with their positional condition and mutation
//! triples, per-operation results and the server error taxonomy, monitor
//! requests with both update dialects, the JSON-RPC envelope, and
//! named-uuid placeholder expansion.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod monitor;
mod named_uuid;
mod op;
mod result;
mod rpc;

pub use error::{ProtocolError, ProtocolResult};
pub use monitor::{
    MonitorRequest, MonitorSelect, RowUpdate, RowUpdate2, TableUpdates, TableUpdates2, UpdateBatch,
};
pub use named_uuid::expand_named_uuids;
pub use op::{Condition, Mutation, Operation, Row};
pub use result::{check_operation_results, OperationError, OperationResult, TxnErrorKind};
pub use rpc::{methods, Incoming, Request, Response};
