//! # SwitchDB Codec
//!
//! Bidirectional conversion between the database's tagged wire values and
//! native container types.
//!
//! Wire forms:
//! - atoms are bare JSON values
//! - identifiers are `["uuid", "<36-char id>"]` or `["named-uuid", "<name>"]`
//! - sets are a bare element (exactly one element) or `["set", [elems...]]`
//! - maps are `["map", [[k, v], ...]]`
//!
//! The crate also provides the set/map difference primitives the update
//! engine folds differential monitor changes with.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atom;
mod datum;
mod error;

pub use atom::Atom;
pub use datum::{map_difference, set_symmetric_difference, Datum};
pub use error::{CodecError, CodecResult};
