//! Named-uuid placeholder expansion.
//!
//! Insert operations may carry a caller-chosen `uuid-name`; other
//! operations in the same transaction reference the not-yet-existing row as
//! `["named-uuid", name]`. Before dispatch the client allocates a real
//! identifier per placeholder, pins it on the insert, and substitutes every
//! reference in rows, conditions, and mutations. Placeholders live only for
//! the duration of one submission.

use crate::error::{ProtocolError, ProtocolResult};
use crate::op::Operation;
use serde_json::Value as Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Expands every named-uuid placeholder in `operations`.
///
/// Returns the placeholder → identifier binding used, so callers can relate
/// rows they described to the identifiers the transaction created. A
/// placeholder named by two insert operations would bind to two different
/// identifiers and is rejected with [`ProtocolError::DuplicateUuidName`].
pub fn expand_named_uuids(
    operations: &mut [Operation],
) -> ProtocolResult<HashMap<String, Uuid>> {
    let mut bindings: HashMap<String, Uuid> = HashMap::new();

    for op in operations.iter_mut() {
        if let Operation::Insert {
            uuid_name: Some(name),
            uuid,
            ..
        } = op
        {
            if bindings.contains_key(name.as_str()) {
                return Err(ProtocolError::DuplicateUuidName { name: name.clone() });
            }
            let id = uuid.unwrap_or_else(Uuid::new_v4);
            *uuid = Some(id);
            bindings.insert(name.clone(), id);
        }
    }

    if bindings.is_empty() {
        return Ok(bindings);
    }

    for op in operations.iter_mut() {
        match op {
            Operation::Insert { row, .. } => {
                for value in row.values_mut() {
                    substitute(value, &bindings);
                }
            }
            Operation::Update { clauses, row, .. } => {
                for clause in clauses {
                    substitute(&mut clause.value, &bindings);
                }
                for value in row.values_mut() {
                    substitute(value, &bindings);
                }
            }
            Operation::Mutate {
                clauses, mutations, ..
            } => {
                for clause in clauses {
                    substitute(&mut clause.value, &bindings);
                }
                for mutation in mutations {
                    substitute(&mut mutation.value, &bindings);
                }
            }
            Operation::Delete { clauses, .. } | Operation::Select { clauses, .. } => {
                for clause in clauses {
                    substitute(&mut clause.value, &bindings);
                }
            }
            Operation::Wait { clauses, rows, .. } => {
                for clause in clauses {
                    substitute(&mut clause.value, &bindings);
                }
                for row in rows {
                    for value in row.values_mut() {
                        substitute(value, &bindings);
                    }
                }
            }
            Operation::Comment { .. } | Operation::Assert { .. } => {}
        }
    }

    Ok(bindings)
}

/// Rewrites `["named-uuid", p]` to `["uuid", r]` anywhere inside `value`.
fn substitute(value: &mut Json, bindings: &HashMap<String, Uuid>) {
    if let Some(parts) = value.as_array() {
        if parts.len() == 2 && parts[0].as_str() == Some("named-uuid") {
            if let Some(id) = parts[1].as_str().and_then(|name| bindings.get(name)) {
                *value = serde_json::json!(["uuid", id.to_string()]);
            }
            return;
        }
    }
    match value {
        Json::Array(items) => items.iter_mut().for_each(|v| substitute(v, bindings)),
        Json::Object(map) => map.values_mut().for_each(|v| substitute(v, bindings)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Row;
    use serde_json::json;

    fn row(pairs: &[(&str, Json)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn references_are_substituted_across_operations() {
        let mut ops = vec![
            Operation::Insert {
                table: "Child".into(),
                row: row(&[("name", json!("c"))]),
                uuid_name: Some("c1".into()),
                uuid: None,
            },
            Operation::Insert {
                table: "Parent".into(),
                row: row(&[
                    ("name", json!("p")),
                    ("children", json!(["named-uuid", "c1"])),
                ]),
                uuid_name: None,
                uuid: None,
            },
        ];

        let bindings = expand_named_uuids(&mut ops).unwrap();
        let id = bindings["c1"];

        match &ops[0] {
            Operation::Insert { uuid, .. } => assert_eq!(*uuid, Some(id)),
            _ => unreachable!(),
        }
        match &ops[1] {
            Operation::Insert { row, .. } => {
                assert_eq!(row["children"], json!(["uuid", id.to_string()]));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn placeholders_inside_tagged_sets_are_substituted() {
        let mut ops = vec![
            Operation::Insert {
                table: "Child".into(),
                row: Row::new(),
                uuid_name: Some("c1".into()),
                uuid: None,
            },
            Operation::Mutate {
                table: "Parent".into(),
                clauses: vec![],
                mutations: vec![crate::op::Mutation::new(
                    "children",
                    switchdb_schema::Mutator::Insert,
                    json!(["set", [["named-uuid", "c1"]]]),
                )],
            },
        ];
        let bindings = expand_named_uuids(&mut ops).unwrap();
        let id = bindings["c1"];
        match &ops[1] {
            Operation::Mutate { mutations, .. } => {
                assert_eq!(
                    mutations[0].value,
                    json!(["set", [["uuid", id.to_string()]]])
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn duplicate_placeholder_is_rejected() {
        let mut ops = vec![
            Operation::Insert {
                table: "Child".into(),
                row: Row::new(),
                uuid_name: Some("c1".into()),
                uuid: None,
            },
            Operation::Insert {
                table: "Child".into(),
                row: Row::new(),
                uuid_name: Some("c1".into()),
                uuid: None,
            },
        ];
        assert!(matches!(
            expand_named_uuids(&mut ops),
            Err(ProtocolError::DuplicateUuidName { .. })
        ));
    }

    #[test]
    fn unbound_placeholders_pass_through() {
        let mut ops = vec![Operation::Insert {
            table: "Parent".into(),
            row: row(&[("children", json!(["named-uuid", "ghost"]))]),
            uuid_name: None,
            uuid: None,
        }];
        expand_named_uuids(&mut ops).unwrap();
        match &ops[0] {
            Operation::Insert { row, .. } => {
                // Left for the server to reject; nothing binds it locally.
                assert_eq!(row["children"], json!(["named-uuid", "ghost"]));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn caller_pinned_uuid_is_kept() {
        let id = Uuid::new_v4();
        let mut ops = vec![Operation::Insert {
            table: "Child".into(),
            row: Row::new(),
            uuid_name: Some("c1".into()),
            uuid: Some(id),
        }];
        let bindings = expand_named_uuids(&mut ops).unwrap();
        assert_eq!(bindings["c1"], id);
    }
}
