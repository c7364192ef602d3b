//! The conditional query and mutation front-end.
//!
//! [`Api`] reads the cache and assembles wire operations; it never talks
//! to the server itself. Condition sets are a disjunction of conjunction
//! lists, one wire operation per list.

use crate::cache::Cache;
use crate::error::{CoreError, CoreResult};
use crate::model::{Model, TypedModel};
use std::marker::PhantomData;
use switchdb_codec::{Atom, Datum};
use switchdb_protocol::{Condition, Mutation, Operation};
use switchdb_schema::{ConditionFunction, Mutator, UUID_COLUMN};
use uuid::Uuid;

/// Entry point over a cache.
pub struct Api<'a> {
    cache: &'a Cache,
}

impl<'a> Api<'a> {
    /// Creates an API over the given cache.
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// Fills `prototype` with the first cached row matching its populated
    /// index fields.
    pub fn get<M: TypedModel>(&self, prototype: &mut M) -> CoreResult<()> {
        let db = self.cache.database_model();
        let conditions = db.new_condition(prototype)?;

        let ids = self.cache.matching_rows(M::TABLE, &mut |row| {
            conjunction_matches(self.cache, row, &conditions).unwrap_or(false)
        })?;
        let Some(id) = ids.first() else {
            return Err(CoreError::NotFound);
        };
        let found = self
            .cache
            .row(M::TABLE, *id)?
            .ok_or(CoreError::NotFound)?;
        copy_state(found.as_ref(), prototype)?;
        Ok(())
    }

    /// One insert operation per entity. A populated identifier field that
    /// is not a real identifier becomes the insert's named-uuid
    /// placeholder; a real one pins the new row's identifier.
    pub fn create<M: TypedModel>(&self, entities: &[M]) -> CoreResult<Vec<Operation>> {
        let db = self.cache.database_model();
        let mut ops = Vec::with_capacity(entities.len());
        for entity in entities {
            let row = db.new_row(entity, None)?;
            let text = entity.uuid_text();
            let (uuid_name, uuid) = if text.is_empty() {
                (None, None)
            } else {
                match Uuid::try_parse(&text) {
                    Ok(id) => (None, Some(id)),
                    Err(_) => (Some(text), None),
                }
            };
            ops.push(Operation::Insert {
                table: M::TABLE.to_string(),
                row,
                uuid_name,
                uuid,
            });
        }
        Ok(ops)
    }

    /// Builds a condition set from a model: the derived equality set when
    /// no explicit conditions are given, otherwise one conjunction list per
    /// explicit condition (a disjunction).
    pub fn where_model<M: TypedModel>(
        &self,
        model: &M,
        conditions: Vec<Condition>,
    ) -> CoreResult<Conditional<'a, M>> {
        let sets = if conditions.is_empty() {
            vec![self.cache.database_model().new_condition(model)?]
        } else {
            conditions.into_iter().map(|c| vec![c]).collect()
        };
        self.conditional(sets)
    }

    /// Like [`Api::where_model`], but explicit conditions form a single
    /// conjunction.
    pub fn where_all<M: TypedModel>(
        &self,
        model: &M,
        conditions: Vec<Condition>,
    ) -> CoreResult<Conditional<'a, M>> {
        let set = if conditions.is_empty() {
            self.cache.database_model().new_condition(model)?
        } else {
            conditions
        };
        self.conditional(vec![set])
    }

    /// Evaluates a typed predicate against every live cached row of `M`'s
    /// table and emits one identifier-equality condition per match. The
    /// predicate runs under the cache's shared lock and must not call back
    /// into the cache.
    pub fn where_cache<M, P>(&self, mut predicate: P) -> CoreResult<Conditional<'a, M>>
    where
        M: TypedModel,
        P: FnMut(&M) -> bool,
    {
        // Table inference also verifies M is registered.
        self.cache.database_model().entry(M::TABLE)?;
        let ids = self.cache.matching_rows(M::TABLE, &mut |row| {
            row.as_any()
                .downcast_ref::<M>()
                .is_some_and(|typed| predicate(typed))
        })?;
        let sets = ids
            .into_iter()
            .map(|id| vec![Condition::uuid_equals(id)])
            .collect();
        self.conditional(sets)
    }

    fn conditional<M: TypedModel>(
        &self,
        sets: Vec<Vec<Condition>>,
    ) -> CoreResult<Conditional<'a, M>> {
        self.cache.database_model().entry(M::TABLE)?;
        Ok(Conditional {
            cache: self.cache,
            sets,
            _model: PhantomData,
        })
    }
}

/// A condition set bound to a model type, ready to query or mutate.
pub struct Conditional<'a, M: TypedModel> {
    cache: &'a Cache,
    sets: Vec<Vec<Condition>>,
    _model: PhantomData<M>,
}

impl<M: TypedModel> Conditional<'_, M> {
    /// The condition lists this operation set will carry.
    pub fn condition_sets(&self) -> &[Vec<Condition>] {
        &self.sets
    }

    /// Fills `sink` with every cached entity satisfying the condition set.
    /// A sink with spare reserved capacity stops when that capacity is
    /// reached.
    pub fn list(&self, sink: &mut Vec<M>) -> CoreResult<()> {
        let bound = if sink.capacity() > sink.len() {
            Some(sink.capacity())
        } else {
            None
        };
        let ids = self.cache.matching_rows(M::TABLE, &mut |row| {
            self.matches(row).unwrap_or(false)
        })?;
        for id in ids {
            if bound.is_some_and(|b| sink.len() >= b) {
                break;
            }
            if let Some(row) = self.cache.row(M::TABLE, id)? {
                let mut entity = M::default();
                copy_state(row.as_ref(), &mut entity)?;
                sink.push(entity);
            }
        }
        Ok(())
    }

    /// One update operation per condition list. The row carries either the
    /// entity's non-default fields or exactly the selected columns.
    pub fn update(&self, entity: &M, columns: Option<&[&str]>) -> CoreResult<Vec<Operation>> {
        let row = self
            .cache
            .database_model()
            .new_row(entity, columns)?;
        Ok(self
            .sets
            .iter()
            .map(|clauses| Operation::Update {
                table: M::TABLE.to_string(),
                clauses: clauses.clone(),
                row: row.clone(),
            })
            .collect())
    }

    /// One mutate operation per condition list, each bearing every given
    /// `(column, mutator, value)` triple.
    pub fn mutate(&self, mutations: &[(&str, Mutator, Datum)]) -> CoreResult<Vec<Operation>> {
        let db = self.cache.database_model();
        let wire: Vec<Mutation> = mutations
            .iter()
            .map(|(column, mutator, value)| {
                db.new_mutation(M::TABLE, column, *mutator, value.clone())
            })
            .collect::<CoreResult<_>>()?;
        Ok(self
            .sets
            .iter()
            .map(|clauses| Operation::Mutate {
                table: M::TABLE.to_string(),
                clauses: clauses.clone(),
                mutations: wire.clone(),
            })
            .collect())
    }

    /// One delete operation per condition list.
    pub fn delete(&self) -> CoreResult<Vec<Operation>> {
        Ok(self
            .sets
            .iter()
            .map(|clauses| Operation::Delete {
                table: M::TABLE.to_string(),
                clauses: clauses.clone(),
            })
            .collect())
    }

    /// Whether a cached row satisfies any of the condition lists.
    fn matches(&self, row: &dyn Model) -> CoreResult<bool> {
        for set in &self.sets {
            if conjunction_matches(self.cache, row, set)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn copy_state(from: &dyn Model, to: &mut dyn Model) -> CoreResult<()> {
    for field in from.column_fields() {
        if let Some(value) = from.datum(field.column) {
            to.set_datum(field.column, value)?;
        }
    }
    Ok(())
}

/// Whether a cached row satisfies every condition in one conjunction.
fn conjunction_matches(
    cache: &Cache,
    row: &dyn Model,
    conditions: &[Condition],
) -> CoreResult<bool> {
    for condition in conditions {
        if !condition_matches(cache, row, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn condition_matches(cache: &Cache, row: &dyn Model, condition: &Condition) -> CoreResult<bool> {
    let table_name = row.table_name();
    let db = cache.database_model();
    let table = db.table(table_name)?;
    let column = table.column_or_err(table_name, &condition.column)?;
    column
        .validate_condition(&condition.column, condition.function)
        .map_err(|e| CoreError::InvalidCondition {
            table: table_name.to_string(),
            column: condition.column.clone(),
            message: e.to_string(),
        })?;

    let held = if condition.column == UUID_COLUMN {
        Datum::Scalar(Atom::Str(row.uuid_text()))
    } else {
        row.datum(&condition.column)
            .ok_or_else(|| CoreError::UnknownColumn {
                table: table_name.to_string(),
                column: condition.column.clone(),
            })?
    };
    let wanted = Datum::decode(&condition.value, &column.ty)?;

    Ok(match condition.function {
        ConditionFunction::Equal => flat(&held) == flat(&wanted),
        ConditionFunction::NotEqual => flat(&held) != flat(&wanted),
        ConditionFunction::Includes => includes(&flat(&held), &flat(&wanted)),
        ConditionFunction::Excludes => excludes(&flat(&held), &flat(&wanted)),
        ConditionFunction::LessThan
        | ConditionFunction::LessThanOrEqual
        | ConditionFunction::GreaterThan
        | ConditionFunction::GreaterThanOrEqual => compare(condition.function, &held, &wanted),
    })
}

/// Identifier atoms compare by canonical text regardless of whether they
/// arrived tagged or as plain strings.
fn flat(datum: &Datum) -> Datum {
    match datum {
        Datum::Scalar(a) => Datum::Scalar(a.clone().into_native()),
        Datum::Optional(o) => Datum::Optional(o.clone().map(Atom::into_native)),
        Datum::Set(s) => Datum::Set(s.iter().cloned().map(Atom::into_native).collect()),
        Datum::Map(m) => Datum::Map(
            m.iter()
                .map(|(k, v)| (k.clone().into_native(), v.clone().into_native()))
                .collect(),
        ),
    }
}

fn includes(held: &Datum, wanted: &Datum) -> bool {
    match (held, wanted) {
        (Datum::Set(h), Datum::Set(w)) => w.iter().all(|a| h.contains(a)),
        (Datum::Set(h), Datum::Scalar(a)) => h.contains(a),
        (Datum::Map(h), Datum::Map(w)) => w.iter().all(|pair| h.contains(pair)),
        (Datum::Optional(h), Datum::Scalar(a)) => h.as_ref() == Some(a),
        _ => held == wanted,
    }
}

fn excludes(held: &Datum, wanted: &Datum) -> bool {
    match (held, wanted) {
        (Datum::Set(h), Datum::Set(w)) => w.iter().all(|a| !h.contains(a)),
        (Datum::Set(h), Datum::Scalar(a)) => !h.contains(a),
        (Datum::Map(h), Datum::Map(w)) => w.iter().all(|pair| !h.contains(pair)),
        (Datum::Optional(h), Datum::Scalar(a)) => h.as_ref() != Some(a),
        _ => held != wanted,
    }
}

fn compare(function: ConditionFunction, held: &Datum, wanted: &Datum) -> bool {
    let (Datum::Scalar(h), Datum::Scalar(w)) = (held, wanted) else {
        return false;
    };
    let ordering = match (h, w) {
        (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
        (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
        (Atom::Integer(a), Atom::Real(b)) => (*a as f64).total_cmp(b),
        (Atom::Real(a), Atom::Integer(b)) => a.total_cmp(&(*b as f64)),
        _ => return false,
    };
    match function {
        ConditionFunction::LessThan => ordering.is_lt(),
        ConditionFunction::LessThanOrEqual => ordering.is_le(),
        ConditionFunction::GreaterThan => ordering.is_gt(),
        ConditionFunction::GreaterThanOrEqual => ordering.is_ge(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DatabaseModel, Registry};
    use serde_json::json;
    use std::collections::BTreeMap as Map;
    use switchdb_protocol::TableUpdates;
    use switchdb_protocol::UpdateBatch;
    use switchdb_schema::DatabaseSchema;

    crate::model! {
        pub struct Parent("Parent") {
            #[column("_uuid")]
            pub uuid: String,
            #[column("name")]
            pub name: String,
            #[column("rank")]
            pub rank: i64,
            #[column("extras")]
            pub extras: Map<String, String>,
        }
    }

    fn cache() -> Cache {
        let schema = DatabaseSchema::parse(
            r#"{
                "name": "TestDb",
                "version": "1.0.0",
                "tables": {
                    "Parent": {
                        "columns": {
                            "name": {"type": "string"},
                            "rank": {"type": "integer"},
                            "extras": {"type": {
                                "key": "string", "value": "string",
                                "min": 0, "max": "unlimited"
                            }}
                        },
                        "indexes": [["name"]],
                        "isRoot": true
                    }
                }
            }"#,
        )
        .unwrap();
        let mut registry = Registry::new();
        registry.register::<Parent>().unwrap();
        let db = DatabaseModel::new(schema, registry).unwrap();
        Cache::new(db, None).unwrap()
    }

    fn seed(cache: &Cache, rows: serde_json::Value) {
        let parsed: TableUpdates = serde_json::from_value(rows).unwrap();
        cache.apply_updates(&UpdateBatch::Classic(parsed)).unwrap();
    }

    #[test]
    fn get_copies_the_cached_state() {
        let cache = cache();
        let id = Uuid::new_v4();
        seed(
            &cache,
            json!({"Parent": { id.to_string(): {"new": {
                "name": "p", "extras": ["map", [["team", "a"]]]
            }}}}),
        );

        let api = Api::new(&cache);
        let mut proto = Parent {
            name: "p".into(),
            ..Default::default()
        };
        api.get(&mut proto).unwrap();
        assert_eq!(proto.uuid, id.to_string());
        assert_eq!(proto.extras.get("team").map(String::as_str), Some("a"));
    }

    #[test]
    fn get_misses_with_not_found() {
        let cache = cache();
        let api = Api::new(&cache);
        let mut proto = Parent {
            name: "absent".into(),
            ..Default::default()
        };
        assert!(matches!(api.get(&mut proto), Err(CoreError::NotFound)));
    }

    #[test]
    fn create_uses_placeholder_for_symbolic_ids() {
        let cache = cache();
        let api = Api::new(&cache);
        let with_placeholder = Parent {
            uuid: "row1".into(),
            name: "p".into(),
            ..Default::default()
        };
        let ops = api.create(&[with_placeholder]).unwrap();
        match &ops[0] {
            Operation::Insert {
                uuid_name, uuid, ..
            } => {
                assert_eq!(uuid_name.as_deref(), Some("row1"));
                assert!(uuid.is_none());
            }
            other => panic!("expected insert, got {other:?}"),
        }

        let real = Uuid::new_v4();
        let with_real = Parent {
            uuid: real.to_string(),
            name: "q".into(),
            ..Default::default()
        };
        let ops = api.create(&[with_real]).unwrap();
        match &ops[0] {
            Operation::Insert { uuid_name, uuid, .. } => {
                assert!(uuid_name.is_none());
                assert_eq!(*uuid, Some(real));
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn where_cache_emits_one_uuid_condition_per_match() {
        let cache = cache();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        seed(
            &cache,
            json!({"Parent": {
                a.to_string(): {"new": {"name": "a",
                    "extras": ["map", [["team", "x"]]]}},
                b.to_string(): {"new": {"name": "b",
                    "extras": ["map", [["team", "y"]]]}}
            }}),
        );

        let api = Api::new(&cache);
        let cond = api
            .where_cache(|p: &Parent| p.extras.get("team").is_some_and(|t| t == "x"))
            .unwrap();
        assert_eq!(cond.condition_sets().len(), 1);
        assert_eq!(cond.condition_sets()[0][0].column, "_uuid");

        let ops = cond.delete().unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Delete { clauses, .. } => {
                assert_eq!(clauses[0].value, json!(["uuid", a.to_string()]));
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn list_honors_reserved_capacity() {
        let cache = cache();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut rows = serde_json::Map::new();
        for (i, id) in ids.iter().enumerate() {
            rows.insert(
                id.to_string(),
                json!({"new": {"name": format!("p{i}"),
                    "extras": ["map", [["team", "x"]]]}}),
            );
        }
        seed(&cache, json!({ "Parent": rows }));

        let api = Api::new(&cache);
        let probe = Parent::default();
        let cond = api
            .where_model(
                &probe,
                vec![Condition::new(
                    "extras",
                    ConditionFunction::Includes,
                    json!(["map", [["team", "x"]]]),
                )],
            )
            .unwrap();

        let mut sink: Vec<Parent> = Vec::with_capacity(2);
        cond.list(&mut sink).unwrap();
        assert_eq!(sink.len(), 2);

        let mut unbounded: Vec<Parent> = Vec::new();
        cond.list(&mut unbounded).unwrap();
        assert_eq!(unbounded.len(), 4);
    }

    #[test]
    fn update_emits_one_operation_per_condition_list() {
        let cache = cache();
        let api = Api::new(&cache);
        let probe = Parent::default();
        let cond = api
            .where_model(
                &probe,
                vec![
                    Condition::new("name", ConditionFunction::Equal, json!("a")),
                    Condition::new("name", ConditionFunction::Equal, json!("b")),
                ],
            )
            .unwrap();

        let entity = Parent {
            name: "renamed".into(),
            ..Default::default()
        };
        let ops = cond.update(&entity, None).unwrap();
        assert_eq!(ops.len(), 2);
        for op in &ops {
            match op {
                Operation::Update { clauses, row, .. } => {
                    assert_eq!(clauses.len(), 1);
                    assert_eq!(row["name"], json!("renamed"));
                }
                other => panic!("expected update, got {other:?}"),
            }
        }
    }

    #[test]
    fn ordered_conditions_bound_the_rank() {
        let cache = cache();
        let mut rows = serde_json::Map::new();
        for rank in 1..=4i64 {
            rows.insert(
                Uuid::new_v4().to_string(),
                json!({"new": {"name": format!("p{rank}"), "rank": rank,
                    "extras": ["map", []]}}),
            );
        }
        seed(&cache, json!({ "Parent": rows }));

        let api = Api::new(&cache);
        let probe = Parent::default();
        let cond = api
            .where_all(
                &probe,
                vec![
                    Condition::new("rank", ConditionFunction::GreaterThanOrEqual, json!(2)),
                    Condition::new("rank", ConditionFunction::LessThanOrEqual, json!(3)),
                ],
            )
            .unwrap();

        let mut sink: Vec<Parent> = Vec::new();
        cond.list(&mut sink).unwrap();
        let mut ranks: Vec<i64> = sink.iter().map(|p| p.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![2, 3]);
    }

    #[test]
    fn mutate_validates_and_encodes() {
        let cache = cache();
        let api = Api::new(&cache);
        let probe = Parent {
            name: "p".into(),
            ..Default::default()
        };
        let cond = api.where_all(&probe, Vec::new()).unwrap();
        let ops = cond
            .mutate(&[(
                "extras",
                Mutator::Insert,
                Datum::Map(vec![(Atom::from("role"), Atom::from("x"))]),
            )])
            .unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Mutate { mutations, .. } => {
                assert_eq!(mutations[0].value, json!(["map", [["role", "x"]]]));
            }
            other => panic!("expected mutate, got {other:?}"),
        }
    }
}
