//! Model registry and schema-checked database model.
//!
//! [`Registry`] collects the model types the caller cares about.
//! [`DatabaseModel`] binds a registry to a parsed schema, verifying every
//! tagged field against the column it names before any wire traffic
//! happens. A model that drifts from the schema fails here, once, instead
//! of corrupting rows later.

use crate::error::{CoreError, CoreResult};
use crate::model::{ColumnField, Model, TypedModel};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use switchdb_schema::{DatabaseSchema, NativeShape, TableSchema};
use tracing::debug;

type ModelFactory = fn() -> Box<dyn Model>;

/// Metadata for one registered model type.
#[derive(Clone)]
pub struct ModelEntry {
    /// The table the model maps.
    pub table: &'static str,
    /// The model's tagged fields.
    pub columns: &'static [ColumnField],
    factory: ModelFactory,
}

impl ModelEntry {
    /// Builds a fresh default instance of the model.
    pub fn instantiate(&self) -> Box<dyn Model> {
        (self.factory)()
    }

    /// Looks up a tagged field by column name.
    pub fn field(&self, column: &str) -> Option<&ColumnField> {
        self.columns.iter().find(|f| f.column == column)
    }
}

/// The set of model types an application maps.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, ModelEntry>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model type for its table.
    ///
    /// Fails on a duplicate column tag within the model or when another
    /// model already claims the table.
    pub fn register<M: TypedModel>(&mut self) -> CoreResult<()> {
        for (i, field) in M::COLUMNS.iter().enumerate() {
            if M::COLUMNS[..i].iter().any(|f| f.column == field.column) {
                return Err(CoreError::DuplicateColumnTag {
                    table: M::TABLE.to_string(),
                    column: field.column.to_string(),
                });
            }
        }
        let entry = ModelEntry {
            table: M::TABLE,
            columns: M::COLUMNS,
            factory: || Box::new(M::default()),
        };
        if self.entries.insert(M::TABLE, entry).is_some() {
            return Err(CoreError::IllegalSequence {
                message: format!("table {:?} already has a registered model", M::TABLE),
            });
        }
        Ok(())
    }

    /// The entry for a table, if registered.
    pub fn entry(&self, table: &str) -> Option<&ModelEntry> {
        self.entries.get(table)
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

/// A registry validated against a concrete database schema.
///
/// Cheap to clone; shared by the mapper, the cache, and the client.
#[derive(Clone)]
pub struct DatabaseModel {
    inner: Arc<DatabaseModelInner>,
}

struct DatabaseModelInner {
    schema: DatabaseSchema,
    registry: Registry,
}

impl fmt::Debug for DatabaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseModel")
            .field("database", &self.inner.schema.name)
            .field("models", &self.inner.registry.entries.len())
            .finish_non_exhaustive()
    }
}

impl DatabaseModel {
    /// Validates every registered model against `schema`.
    pub fn new(schema: DatabaseSchema, registry: Registry) -> CoreResult<Self> {
        for entry in registry.entries.values() {
            let table = schema.table_or_err(entry.table)?;
            validate_entry(entry, table)?;
        }
        debug!(
            database = %schema.name,
            models = registry.entries.len(),
            "database model validated"
        );
        Ok(Self {
            inner: Arc::new(DatabaseModelInner { schema, registry }),
        })
    }

    /// The underlying schema.
    pub fn schema(&self) -> &DatabaseSchema {
        &self.inner.schema
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The entry for `table`, or [`CoreError::ModelNotRegistered`].
    pub fn entry(&self, table: &str) -> CoreResult<&ModelEntry> {
        self.inner
            .registry
            .entry(table)
            .ok_or_else(|| CoreError::ModelNotRegistered {
                table: table.to_string(),
            })
    }

    /// The table schema for `table`, or [`CoreError::UnknownTable`].
    pub fn table(&self, table: &str) -> CoreResult<&TableSchema> {
        Ok(self.inner.schema.table_or_err(table)?)
    }

    /// Builds a fresh model instance for `table`.
    pub fn instantiate(&self, table: &str) -> CoreResult<Box<dyn Model>> {
        Ok(self.entry(table)?.instantiate())
    }
}

fn validate_entry(entry: &ModelEntry, table: &TableSchema) -> CoreResult<()> {
    for field in entry.columns {
        let column = table
            .column(field.column)
            .ok_or_else(|| CoreError::UnknownColumn {
                table: entry.table.to_string(),
                column: field.column.to_string(),
            })?;
        let expected = column.ty.native_shape();
        if !shapes_compatible(expected, field.shape) {
            return Err(CoreError::SchemaViolation {
                table: entry.table.to_string(),
                column: field.column.to_string(),
                message: format!(
                    "field shape {} does not match column shape {expected}",
                    field.shape
                ),
            });
        }
    }
    Ok(())
}

/// An optional column may be mapped by a scalar field when the caller
/// promises the value is always present; the reverse is not allowed.
fn shapes_compatible(column: NativeShape, field: NativeShape) -> bool {
    match (column, field) {
        (c, f) if c == f => true,
        (NativeShape::Optional(ck), NativeShape::Scalar(fk)) => ck == fk,
        _ => false,
    }
}
