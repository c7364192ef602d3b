//! # SwitchDB Schema
//!
//! Parsed representation of a management-database schema.
//!
//! This crate provides:
//! - Parsing of the JSON schema document served by `get_schema`
//! - Per-column type descriptors (atomic kind, set/map shape, cardinality,
//!   mutability, referenced table, reference strength, enum domain)
//! - The native field shape each column maps to in a typed model
//! - Legality checks for mutators and condition functions

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod column;
mod error;
mod ops;
mod schema;
mod table;

pub use atomic::{AtomicKind, BaseType, RefStrength};
pub use column::{ColumnSchema, ColumnType, Max, NativeKind, NativeShape};
pub use error::{SchemaError, SchemaResult};
pub use ops::{ConditionFunction, Mutator};
pub use schema::DatabaseSchema;
pub use table::{TableSchema, UUID_COLUMN, VERSION_COLUMN};
