//! Table declarations.

use crate::atomic::AtomicKind;
use crate::column::ColumnSchema;
use crate::error::{SchemaError, SchemaResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Name of the implicit identifier column present on every table.
pub const UUID_COLUMN: &str = "_uuid";

/// Name of the implicit version column present on every table.
pub const VERSION_COLUMN: &str = "_version";

static UUID_SCHEMA: LazyLock<ColumnSchema> =
    LazyLock::new(|| ColumnSchema::immutable_scalar(AtomicKind::Uuid));

/// A table declaration: columns, uniqueness indexes, and the root-set flag.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    /// Declared columns, keyed by name. The implicit `_uuid` and `_version`
    /// columns are not listed here; [`TableSchema::column`] resolves them.
    pub columns: BTreeMap<String, ColumnSchema>,
    /// Uniqueness indexes, each an ordered list of column names.
    #[serde(default)]
    pub indexes: Vec<Vec<String>>,
    /// Whether rows of this table live without being referenced.
    #[serde(rename = "isRoot", default)]
    pub is_root: bool,
    /// Row-count limit, when the schema declares one.
    #[serde(rename = "maxRows", default)]
    pub max_rows: Option<u64>,
}

impl TableSchema {
    /// Looks up a column by name, resolving the implicit identifier and
    /// version columns.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        if name == UUID_COLUMN || name == VERSION_COLUMN {
            return Some(&UUID_SCHEMA);
        }
        self.columns.get(name)
    }

    /// Like [`TableSchema::column`] but returns a typed error naming the
    /// table on a miss.
    pub fn column_or_err(&self, table: &str, name: &str) -> SchemaResult<&ColumnSchema> {
        self.column(name).ok_or_else(|| SchemaError::UnknownColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
    }

    /// Declared column names in deterministic order, excluding the implicit
    /// columns.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Uniqueness indexes whose columns are all declared by the table.
    ///
    /// A malformed index naming an unknown column is skipped rather than
    /// honored partially.
    pub fn valid_indexes(&self) -> impl Iterator<Item = &[String]> {
        self.indexes
            .iter()
            .filter(|index| {
                !index.is_empty() && index.iter().all(|c| self.column(c).is_some())
            })
            .map(Vec::as_slice)
    }
}
