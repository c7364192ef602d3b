//! # SwitchDB Core
//!
//! The typed heart of the client: model declarations bound to schema
//! columns, the mapper between entities and wire rows, the monitor-fed
//! row cache with its reference graph and garbage collector, the update
//! merge engine, and the conditional query/mutation front-end.
//!
//! Everything here is transport-free; `switchdb_client` feeds the cache
//! and dispatches the operations this crate assembles.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod cache;
mod error;
mod event;
mod mapper;
mod model;
mod registry;
mod update;

pub use api::{Api, Conditional};
pub use cache::Cache;
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventHandler, EventKind, EventProcessor, EventSink};
pub use model::{fields_equal, AtomValue, ColumnField, FieldValue, Model, TypedModel};
pub use registry::{DatabaseModel, ModelEntry, Registry};
pub use update::{
    apply_row_diff, classify_classic, classify_differential, decode_row, merge, row_diff,
    RowChange, RowData, WireRowChange,
};

// The `model!` macro expands to paths under `$crate`.
pub use switchdb_codec::{Atom, Datum};
