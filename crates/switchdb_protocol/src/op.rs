//! Transact operations, conditions, and mutations.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;
use switchdb_schema::{ConditionFunction, Mutator};
use uuid::Uuid;

/// A wire row: column name to encoded wire value.
pub type Row = serde_json::Map<String, Json>;

/// A single `where` clause entry, spelled `[column, function, value]` on
/// the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Target column.
    pub column: String,
    /// Comparison function.
    pub function: ConditionFunction,
    /// Encoded wire value compared against.
    pub value: Json,
}

impl Condition {
    /// Creates a condition.
    pub fn new(column: impl Into<String>, function: ConditionFunction, value: Json) -> Self {
        Self {
            column: column.into(),
            function,
            value,
        }
    }

    /// Shorthand for a `_uuid == id` condition.
    pub fn uuid_equals(id: Uuid) -> Self {
        Self::new(
            switchdb_schema::UUID_COLUMN,
            ConditionFunction::Equal,
            serde_json::json!(["uuid", id.to_string()]),
        )
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.column)?;
        seq.serialize_element(&self.function)?;
        seq.serialize_element(&self.value)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = Condition;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [column, function, value] triple")
            }
            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Condition, A::Error> {
                let column = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let function = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let value = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                Ok(Condition {
                    column,
                    function,
                    value,
                })
            }
        }
        deserializer.deserialize_seq(V)
    }
}

/// A single mutation, spelled `[column, mutator, value]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Target column.
    pub column: String,
    /// The mutator applied.
    pub mutator: Mutator,
    /// Encoded wire value the mutator consumes.
    pub value: Json,
}

impl Mutation {
    /// Creates a mutation.
    pub fn new(column: impl Into<String>, mutator: Mutator, value: Json) -> Self {
        Self {
            column: column.into(),
            mutator,
            value,
        }
    }
}

impl Serialize for Mutation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.column)?;
        seq.serialize_element(&self.mutator)?;
        seq.serialize_element(&self.value)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Mutation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = Mutation;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [column, mutator, value] triple")
            }
            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Mutation, A::Error> {
                let column = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let mutator = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let value = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                Ok(Mutation {
                    column,
                    mutator,
                    value,
                })
            }
        }
        deserializer.deserialize_seq(V)
    }
}

/// A single operation inside a `transact` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    /// Insert a row.
    Insert {
        /// Target table.
        table: String,
        /// The row's non-default columns.
        row: Row,
        /// Transaction-local placeholder other operations may reference.
        #[serde(rename = "uuid-name", skip_serializing_if = "Option::is_none")]
        uuid_name: Option<String>,
        /// Concrete identifier for the new row, when chosen client-side.
        #[serde(with = "tagged_uuid", skip_serializing_if = "Option::is_none", default)]
        uuid: Option<Uuid>,
    },
    /// Overwrite columns of every matching row.
    Update {
        /// Target table.
        table: String,
        /// Row filter.
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        /// Columns to write.
        row: Row,
    },
    /// Apply mutators to every matching row.
    Mutate {
        /// Target table.
        table: String,
        /// Row filter.
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        /// Mutations applied in order.
        mutations: Vec<Mutation>,
    },
    /// Delete every matching row.
    Delete {
        /// Target table.
        table: String,
        /// Row filter.
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
    },
    /// Read matching rows.
    Select {
        /// Target table.
        table: String,
        /// Row filter.
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        /// Columns to return; all when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
    },
    /// Wait until matching rows reach the given values.
    Wait {
        /// Target table.
        table: String,
        /// Row filter.
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        /// Columns compared.
        columns: Vec<String>,
        /// `==` or `!=`.
        until: String,
        /// Expected rows.
        rows: Vec<Row>,
        /// Wait bound in milliseconds.
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    /// Attach a comment to the transaction log.
    Comment {
        /// The comment text.
        comment: String,
    },
    /// Abort the transaction when reached.
    Assert {
        /// Lock the transaction asserts ownership of.
        lock: String,
    },
}

/// Serde adapter for the tagged `["uuid", s]` identifier form.
pub(crate) mod tagged_uuid {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::ser::Serializer;
    use serde_json::Value as Json;
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(value: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(u) => serializer.collect_seq(["uuid".to_string(), u.to_string()]),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
        let raw = Option::<Json>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(Json::Array(parts))
                if parts.len() == 2 && parts[0].as_str() == Some("uuid") =>
            {
                let text = parts[1]
                    .as_str()
                    .ok_or_else(|| de::Error::custom("uuid text must be a string"))?;
                Uuid::try_parse(text)
                    .map(Some)
                    .map_err(|_| de::Error::custom("malformed uuid"))
            }
            Some(other) => Err(de::Error::custom(format!(
                "expected [\"uuid\", s], got {other}"
            ))),
        }
    }
}

impl Operation {
    /// The operation's table, when it has one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Select { table, .. }
            | Operation::Wait { table, .. } => Some(table),
            Operation::Comment { .. } | Operation::Assert { .. } => None,
        }
    }

    /// Wire name of the operation.
    pub fn op_name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Select { .. } => "select",
            Operation::Wait { .. } => "wait",
            Operation::Comment { .. } => "comment",
            Operation::Assert { .. } => "assert",
        }
    }
}
