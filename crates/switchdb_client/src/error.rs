//! Client-side error type.

use switchdb_core::CoreError;
use switchdb_protocol::{OperationError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No live connection to the server.
    #[error("not connected")]
    NotConnected,

    /// The call was abandoned because the connection shut down.
    #[error("call cancelled by connection shutdown")]
    Cancelled,

    /// The call's deadline elapsed before the server answered.
    #[error("{method} timed out")]
    TimedOut {
        /// The method that missed its deadline.
        method: String,
    },

    /// Every endpoint and retry attempt was exhausted.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectFailed {
        /// Connection attempts made before giving up.
        attempts: u32,
    },

    /// An endpoint string could not be parsed.
    #[error("bad endpoint {spec:?}: {reason}")]
    BadEndpoint {
        /// The endpoint as given.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The server does not serve the requested database.
    #[error("database {database:?} not present on server")]
    DatabaseMissing {
        /// The database asked for.
        database: String,
    },

    /// The server is not the leader for the requested database.
    #[error("server is not the leader for {database:?}")]
    NotLeader {
        /// The database asked for.
        database: String,
    },

    /// The requested feature needs configuration the caller did not supply.
    #[error("not supported: {message}")]
    NotSupported {
        /// What is missing.
        message: String,
    },

    /// The server answered a call with a JSON-RPC error.
    #[error("{method} failed: {message}")]
    Rpc {
        /// The failed method.
        method: String,
        /// The server's error value, rendered.
        message: String,
    },

    /// A transact reply reported a failed operation.
    #[error(transparent)]
    Transaction(#[from] OperationError),

    /// A wire payload did not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A cache, mapper, or registry failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The transport failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the client.
pub type ClientResult<T> = Result<T, ClientError>;
