//! The database schema document.

use crate::column::ColumnSchema;
use crate::error::{SchemaError, SchemaResult};
use crate::table::TableSchema;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A parsed database schema.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSchema {
    /// Database name.
    pub name: String,
    /// Schema version, an `x.y.z` string.
    #[serde(default)]
    pub version: String,
    /// Tables, keyed by name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Parses a schema document from its JSON text.
    pub fn parse(text: &str) -> SchemaResult<Self> {
        let schema: DatabaseSchema = serde_json::from_str(text)?;
        schema.check_version()?;
        Ok(schema)
    }

    /// Parses a schema document from an already-decoded JSON value, as
    /// returned by the `get_schema` RPC.
    pub fn from_value(value: serde_json::Value) -> SchemaResult<Self> {
        let schema: DatabaseSchema = serde_json::from_value(value)?;
        schema.check_version()?;
        Ok(schema)
    }

    fn check_version(&self) -> SchemaResult<()> {
        if self.version.is_empty() {
            return Ok(());
        }
        let ok = {
            let parts: Vec<&str> = self.version.split('.').collect();
            parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        };
        if ok {
            Ok(())
        } else {
            Err(SchemaError::InvalidVersion {
                version: self.version.clone(),
            })
        }
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Like [`DatabaseSchema::table`] but returns a typed error on a miss.
    pub fn table_or_err(&self, name: &str) -> SchemaResult<&TableSchema> {
        self.table(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    /// Looks up a column by table and name.
    pub fn column(&self, table: &str, column: &str) -> SchemaResult<&ColumnSchema> {
        self.table_or_err(table)?.column_or_err(table, column)
    }

    /// Whether `table` belongs to the root set.
    ///
    /// A table is a root when it declares `isRoot`, or when no table in the
    /// schema declares it at all; schemas written before the flag existed
    /// treat every table as a root.
    pub fn is_root(&self, table: &str) -> bool {
        match self.table(table) {
            Some(t) if t.is_root => true,
            Some(_) => self.tables.values().all(|t| !t.is_root),
            None => false,
        }
    }

    /// Table names in deterministic order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
