//! Entity ↔ wire-row mapping plus condition and mutation builders.
//!
//! All operations run against a validated [`DatabaseModel`], so column
//! lookups that fail here mean the caller named something outside the
//! model, not schema drift.

use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::registry::DatabaseModel;
use switchdb_codec::Datum;
use switchdb_protocol::{Condition, Mutation, Row};
use switchdb_schema::{
    BaseType, ColumnType, ConditionFunction, Max, Mutator, TableSchema, UUID_COLUMN,
    VERSION_COLUMN,
};
use uuid::Uuid;

impl DatabaseModel {
    /// Emits a wire row for `model`.
    ///
    /// Without a selection, every column whose field holds a non-default
    /// value is included. With an explicit selection, exactly those columns
    /// are included, defaults too. The `_uuid` and `_version` columns never
    /// appear in a row.
    pub fn new_row(&self, model: &dyn Model, columns: Option<&[&str]>) -> CoreResult<Row> {
        let table_name = model.table_name();
        let table = self.table(table_name)?;
        let entry = self.entry(table_name)?;

        let mut row = Row::new();
        match columns {
            Some(selection) => {
                for &name in selection {
                    if name == UUID_COLUMN || name == VERSION_COLUMN {
                        continue;
                    }
                    let datum = self.field_datum(model, name)?;
                    self.encode_into(&mut row, table, table_name, name, &datum)?;
                }
            }
            None => {
                for field in entry.columns {
                    if field.column == UUID_COLUMN || field.column == VERSION_COLUMN {
                        continue;
                    }
                    let datum = self.field_datum(model, field.column)?;
                    if datum.is_default() {
                        continue;
                    }
                    self.encode_into(&mut row, table, table_name, field.column, &datum)?;
                }
            }
        }
        Ok(row)
    }

    /// Builds a model instance for `table` from a wire row.
    ///
    /// Columns the model does not map are ignored.
    pub fn model_from_row(&self, table_name: &str, row: &Row) -> CoreResult<Box<dyn Model>> {
        let mut model = self.instantiate(table_name)?;
        self.populate_from_row(model.as_mut(), row)?;
        Ok(model)
    }

    /// Decodes every mapped column present in `row` into `model`.
    pub fn populate_from_row(&self, model: &mut dyn Model, row: &Row) -> CoreResult<()> {
        let table_name = model.table_name();
        let table = self.table(table_name)?;
        let entry = self.entry(table_name)?;

        for (name, wire) in row {
            if entry.field(name).is_none() {
                continue;
            }
            let Some(column) = table.column(name) else {
                continue;
            };
            let datum = Datum::decode(wire, &column.ty)?;
            model.set_datum(name, datum)?;
        }
        Ok(())
    }

    /// Whether two models of the same table agree on the chosen columns.
    ///
    /// With no selection, the identifier decides when populated; otherwise
    /// the first schema index whose fields are all non-default on `a` is
    /// compared, and [`CoreError::IndexUnavailable`] is returned when no
    /// index qualifies.
    pub fn equal_fields(
        &self,
        a: &dyn Model,
        b: &dyn Model,
        columns: Option<&[&str]>,
    ) -> CoreResult<bool> {
        let table_name = a.table_name();
        if b.table_name() != table_name {
            return Ok(false);
        }

        if let Some(selection) = columns {
            for &name in selection {
                let left = self.field_datum(a, name)?;
                let right = self.field_datum(b, name)?;
                if left != right {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        if a.uuid().is_some() {
            return Ok(a.uuid() == b.uuid());
        }

        let index = self.populated_index(a)?;
        for name in index {
            if self.field_datum(a, &name)? != self.field_datum(b, &name)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Derives the best equality condition set for `model`.
    ///
    /// The identifier wins when set; otherwise equality over the first
    /// fully populated schema index.
    pub fn new_condition(&self, model: &dyn Model) -> CoreResult<Vec<Condition>> {
        if let Some(id) = model.uuid() {
            return Ok(vec![Condition::uuid_equals(id)]);
        }

        let table_name = model.table_name();
        let table = self.table(table_name)?;
        let index = self.populated_index(model)?;

        let mut conditions = Vec::with_capacity(index.len());
        for name in index {
            let column = table.column_or_err(table_name, &name)?;
            column
                .validate_condition(&name, ConditionFunction::Equal)
                .map_err(|e| CoreError::InvalidCondition {
                    table: table_name.to_string(),
                    column: name.clone(),
                    message: e.to_string(),
                })?;
            let datum = self.field_datum(model, &name)?;
            let wire = datum.encode(&column.ty)?;
            conditions.push(Condition::new(name, ConditionFunction::Equal, wire));
        }
        Ok(conditions)
    }

    /// An identifier-equality condition for a concrete row.
    pub fn uuid_condition(&self, id: Uuid) -> Vec<Condition> {
        vec![Condition::uuid_equals(id)]
    }

    /// Validates and encodes one mutation against the schema.
    pub fn new_mutation(
        &self,
        table_name: &str,
        column_name: &str,
        mutator: Mutator,
        value: Datum,
    ) -> CoreResult<Mutation> {
        let table = self.table(table_name)?;
        let column = table.column_or_err(table_name, column_name)?;
        column
            .validate_mutator(column_name, mutator)
            .map_err(|e| CoreError::InvalidMutation {
                table: table_name.to_string(),
                column: column_name.to_string(),
                message: e.to_string(),
            })?;

        let value_type = mutation_value_type(&column.ty, mutator, &value).ok_or_else(|| {
            CoreError::InvalidMutation {
                table: table_name.to_string(),
                column: column_name.to_string(),
                message: format!(
                    "{} value does not fit a {} column",
                    value.shape_name(),
                    column.ty.native_shape()
                ),
            }
        })?;
        let wire = value.encode(&value_type)?;
        Ok(Mutation::new(column_name, mutator, wire))
    }

    fn field_datum(&self, model: &dyn Model, column: &str) -> CoreResult<Datum> {
        model
            .datum(column)
            .ok_or_else(|| CoreError::UnknownColumn {
                table: model.table_name().to_string(),
                column: column.to_string(),
            })
    }

    fn encode_into(
        &self,
        row: &mut Row,
        table: &TableSchema,
        table_name: &str,
        name: &str,
        datum: &Datum,
    ) -> CoreResult<()> {
        let column = table.column_or_err(table_name, name)?;
        datum.check_constraints(name, &column.ty)?;
        row.insert(name.to_string(), datum.encode(&column.ty)?);
        Ok(())
    }

    /// The first schema index whose columns the model maps and populates.
    fn populated_index(&self, model: &dyn Model) -> CoreResult<Vec<String>> {
        let table_name = model.table_name();
        let table = self.table(table_name)?;
        for index in table.valid_indexes() {
            let populated = index.iter().all(|name| {
                model
                    .datum(name)
                    .map(|d| !d.is_default())
                    .unwrap_or(false)
            });
            if populated {
                return Ok(index.to_vec());
            }
        }
        Err(CoreError::IndexUnavailable {
            table: table_name.to_string(),
        })
    }
}

/// The column type a mutation value is encoded against.
///
/// Deltas for arithmetic mutators are unconstrained scalars of the key
/// kind. Set and map payloads keep the column's element constraints but
/// drop cardinality bounds, since a mutation carries a partial value.
/// Returns `None` when the value shape cannot serve the mutator.
fn mutation_value_type(ty: &ColumnType, mutator: Mutator, value: &Datum) -> Option<ColumnType> {
    let elements = |key: BaseType, value_type: Option<BaseType>| ColumnType {
        key,
        value: value_type,
        min: 0,
        max: Max::Unlimited,
    };

    match mutator {
        Mutator::Add | Mutator::Subtract | Mutator::Multiply | Mutator::Divide | Mutator::Modulo => {
            match value {
                Datum::Scalar(_) => Some(ColumnType::scalar(ty.key.kind)),
                _ => None,
            }
        }
        Mutator::Insert => match (ty.is_map(), value) {
            (true, Datum::Map(_)) => Some(elements(ty.key.clone(), ty.value.clone())),
            (false, Datum::Set(_) | Datum::Scalar(_)) => Some(elements(ty.key.clone(), None)),
            _ => None,
        },
        Mutator::Delete => match (ty.is_map(), value) {
            // Map deletion takes either exact pairs or bare keys.
            (true, Datum::Map(_)) => Some(elements(ty.key.clone(), ty.value.clone())),
            (true, Datum::Set(_) | Datum::Scalar(_)) => Some(elements(ty.key.clone(), None)),
            (false, Datum::Set(_) | Datum::Scalar(_)) => Some(elements(ty.key.clone(), None)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use serde_json::json;
    use std::collections::BTreeMap;
    use switchdb_codec::Atom;
    use switchdb_schema::DatabaseSchema;

    crate::model! {
        pub struct Parent("Parent") {
            #[column("_uuid")]
            pub uuid: String,
            #[column("name")]
            pub name: String,
            #[column("children")]
            pub children: Vec<String>,
            #[column("extras")]
            pub extras: BTreeMap<String, String>,
        }
    }

    fn db() -> DatabaseModel {
        let schema = DatabaseSchema::parse(
            r#"{
                "name": "TestDb",
                "version": "1.0.0",
                "tables": {
                    "Parent": {
                        "columns": {
                            "name": {"type": "string"},
                            "children": {"type": {
                                "key": {"type": "uuid", "refTable": "Child"},
                                "min": 0, "max": "unlimited"
                            }},
                            "extras": {"type": {
                                "key": "string", "value": "string",
                                "min": 0, "max": "unlimited"
                            }}
                        },
                        "indexes": [["name"]],
                        "isRoot": true
                    },
                    "Child": {
                        "columns": {"name": {"type": "string"}}
                    }
                }
            }"#,
        )
        .unwrap();
        let mut registry = Registry::new();
        registry.register::<Parent>().unwrap();
        DatabaseModel::new(schema, registry).unwrap()
    }

    #[test]
    fn new_row_omits_defaults() {
        let db = db();
        let parent = Parent {
            name: "p".into(),
            ..Default::default()
        };
        let row = db.new_row(&parent, None).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row["name"], json!("p"));
    }

    #[test]
    fn explicit_selection_keeps_defaults() {
        let db = db();
        let parent = Parent {
            name: "p".into(),
            ..Default::default()
        };
        let row = db.new_row(&parent, Some(&["children"])).unwrap();
        assert_eq!(row["children"], json!(["set", []]));
        assert!(!row.contains_key("name"));
    }

    #[test]
    fn uuid_never_lands_in_a_row() {
        let db = db();
        let mut parent = Parent::default();
        parent.set_uuid(Uuid::new_v4()).unwrap();
        parent.name = "p".into();
        let row = db.new_row(&parent, None).unwrap();
        assert!(!row.contains_key("_uuid"));
    }

    #[test]
    fn unknown_selected_column_fails() {
        let db = db();
        let parent = Parent::default();
        assert!(matches!(
            db.new_row(&parent, Some(&["ghost"])),
            Err(CoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn model_from_row_ignores_unknown_columns() {
        let db = db();
        let child = Uuid::new_v4();
        let mut row = Row::new();
        row.insert("name".into(), json!("p"));
        row.insert(
            "children".into(),
            json!(["set", [["uuid", child.to_string()]]]),
        );
        row.insert("from_the_future".into(), json!(42));

        let model = db.model_from_row("Parent", &row).unwrap();
        let parent = model.as_any().downcast_ref::<Parent>().unwrap();
        assert_eq!(parent.name, "p");
        assert_eq!(parent.children, vec![child.to_string()]);
    }

    #[test]
    fn condition_prefers_uuid() {
        let db = db();
        let mut parent = Parent {
            name: "p".into(),
            ..Default::default()
        };
        let id = Uuid::new_v4();
        parent.set_uuid(id).unwrap();

        let conditions = db.new_condition(&parent).unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].column, "_uuid");
    }

    #[test]
    fn condition_falls_back_to_index() {
        let db = db();
        let parent = Parent {
            name: "p".into(),
            ..Default::default()
        };
        let conditions = db.new_condition(&parent).unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].column, "name");
        assert_eq!(conditions[0].function, ConditionFunction::Equal);
        assert_eq!(conditions[0].value, json!("p"));
    }

    #[test]
    fn no_populated_index_is_unavailable() {
        let db = db();
        let parent = Parent::default();
        assert!(matches!(
            db.new_condition(&parent),
            Err(CoreError::IndexUnavailable { .. })
        ));
    }

    #[test]
    fn equal_fields_by_index() {
        let db = db();
        let a = Parent {
            name: "p".into(),
            children: vec!["x".into()],
            ..Default::default()
        };
        let b = Parent {
            name: "p".into(),
            ..Default::default()
        };
        assert!(db.equal_fields(&a, &b, None).unwrap());
        assert!(!db.equal_fields(&a, &b, Some(&["children"])).unwrap());
    }

    #[test]
    fn map_insert_mutation_encodes_pairs() {
        let db = db();
        let value = Datum::Map(vec![(Atom::from("role"), Atom::from("x"))]);
        let mutation = db
            .new_mutation("Parent", "extras", Mutator::Insert, value)
            .unwrap();
        assert_eq!(mutation.column, "extras");
        assert_eq!(mutation.value, json!(["map", [["role", "x"]]]));
    }

    #[test]
    fn arithmetic_on_string_column_rejected() {
        let db = db();
        let err = db
            .new_mutation("Parent", "name", Mutator::Add, Datum::Scalar(Atom::Integer(1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidMutation { .. }));
    }

    #[test]
    fn map_delete_accepts_bare_keys() {
        let db = db();
        let value = Datum::Set(vec![Atom::from("role")]);
        let mutation = db
            .new_mutation("Parent", "extras", Mutator::Delete, value)
            .unwrap();
        assert_eq!(mutation.value, json!("role"));
    }
}
