//! # SwitchDB Client
//!
//! Async client for SwitchDB servers: endpoint parsing, byte-exact JSON
//! framing, a JSON-RPC connection with request correlation, and a session
//! that keeps a [`switchdb_core::Cache`] synchronized through monitor
//! notifications, with echo-based liveness and automatic reconnection.
//!
//! ```no_run
//! use switchdb_client::{Client, Endpoint, Options};
//! use switchdb_core::Registry;
//!
//! # async fn run() -> switchdb_client::ClientResult<()> {
//! let endpoints = vec![Endpoint::parse("tcp:127.0.0.1:6640")?];
//! let registry = Registry::new();
//! let client = Client::connect(endpoints, registry, Options::new("TestDb")).await?;
//! let dbs = client.list_dbs().await?;
//! # let _ = dbs;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod transport;

mod client;
mod connection;

pub use client::{Client, TransactOutcome};
pub use codec::JsonCodec;
pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use error::{ClientError, ClientResult};
pub use options::{Backoff, MonitorDialect, Options};
pub use transport::{BoxedTransport, TlsConnector, Transport};
