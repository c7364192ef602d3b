//! Atomic column kinds and their constraint envelopes.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value as Json;
use std::fmt;

/// The base kind of an atomic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicKind {
    /// 64-bit signed integer.
    Integer,
    /// IEEE double.
    Real,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    String,
    /// Row identifier, possibly constrained to a referenced table.
    Uuid,
}

impl AtomicKind {
    /// Returns `true` for the numeric kinds.
    pub fn is_numeric(self) -> bool {
        matches!(self, AtomicKind::Integer | AtomicKind::Real)
    }
}

impl fmt::Display for AtomicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomicKind::Integer => "integer",
            AtomicKind::Real => "real",
            AtomicKind::Boolean => "boolean",
            AtomicKind::String => "string",
            AtomicKind::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// Reference strength of a uuid column.
///
/// A strong reference keeps the referenced row alive; a weak reference is
/// silently dropped when the referenced row disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefStrength {
    /// The referenced row must exist while the reference does.
    #[default]
    Strong,
    /// The reference is cleaned up when the referenced row goes away.
    Weak,
}

/// An atomic kind together with its domain constraints.
///
/// On the wire this is either a bare kind name (`"string"`) or an object
/// carrying the kind plus constraints (`{"type": "integer", "minInteger": 0}`).
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    /// The atomic kind.
    pub kind: AtomicKind,
    /// Lower bound for integer kinds.
    pub min_integer: Option<i64>,
    /// Upper bound for integer kinds.
    pub max_integer: Option<i64>,
    /// Lower bound for real kinds.
    pub min_real: Option<f64>,
    /// Upper bound for real kinds.
    pub max_real: Option<f64>,
    /// Minimum string length.
    pub min_length: Option<u64>,
    /// Maximum string length.
    pub max_length: Option<u64>,
    /// Enumerated domain, when the column only admits listed atoms.
    pub enum_domain: Option<Vec<Json>>,
    /// Referenced table, for uuid kinds.
    pub ref_table: Option<String>,
    /// Reference strength, for uuid kinds with a `ref_table`.
    pub ref_type: RefStrength,
}

impl BaseType {
    /// Creates an unconstrained base type of the given kind.
    pub fn new(kind: AtomicKind) -> Self {
        Self {
            kind,
            min_integer: None,
            max_integer: None,
            min_real: None,
            max_real: None,
            min_length: None,
            max_length: None,
            enum_domain: None,
            ref_table: None,
            ref_type: RefStrength::Strong,
        }
    }

    /// Returns `true` when this is a uuid kind referring to another table.
    pub fn is_reference(&self) -> bool {
        self.kind == AtomicKind::Uuid && self.ref_table.is_some()
    }

    /// Returns `true` for strong references.
    pub fn is_strong_ref(&self) -> bool {
        self.is_reference() && self.ref_type == RefStrength::Strong
    }

    /// Returns `true` for weak references.
    pub fn is_weak_ref(&self) -> bool {
        self.is_reference() && self.ref_type == RefStrength::Weak
    }
}

impl<'de> Deserialize<'de> for BaseType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Object {
            #[serde(rename = "type")]
            kind: AtomicKind,
            min_integer: Option<i64>,
            max_integer: Option<i64>,
            min_real: Option<f64>,
            max_real: Option<f64>,
            min_length: Option<u64>,
            max_length: Option<u64>,
            #[serde(rename = "enum")]
            enum_domain: Option<Json>,
            ref_table: Option<String>,
            ref_type: Option<RefStrength>,
        }

        let raw = Json::deserialize(deserializer)?;
        match raw {
            Json::String(_) => {
                let kind = AtomicKind::deserialize(raw).map_err(de::Error::custom)?;
                Ok(BaseType::new(kind))
            }
            Json::Object(_) => {
                let obj: Object = serde_json::from_value(raw).map_err(de::Error::custom)?;
                let enum_domain = match obj.enum_domain {
                    None => None,
                    Some(v) => Some(parse_enum_domain(v).map_err(de::Error::custom)?),
                };
                Ok(BaseType {
                    kind: obj.kind,
                    min_integer: obj.min_integer,
                    max_integer: obj.max_integer,
                    min_real: obj.min_real,
                    max_real: obj.max_real,
                    min_length: obj.min_length,
                    max_length: obj.max_length,
                    enum_domain,
                    ref_table: obj.ref_table,
                    ref_type: obj.ref_type.unwrap_or_default(),
                })
            }
            other => Err(de::Error::custom(format!(
                "base type must be a string or object, got {other}"
            ))),
        }
    }
}

/// Parses an enum domain, which is written as either a single atom or a
/// tagged set `["set", [atoms...]]`.
fn parse_enum_domain(value: Json) -> Result<Vec<Json>, String> {
    match &value {
        Json::Array(parts) if parts.len() == 2 && parts[0] == Json::from("set") => {
            match &parts[1] {
                Json::Array(atoms) => Ok(atoms.clone()),
                other => Err(format!("enum set body must be an array, got {other}")),
            }
        }
        Json::Array(_) => Err("enum must be an atom or a tagged set".to_string()),
        _ => Ok(vec![value]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_kind_parses() {
        let bt: BaseType = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(bt.kind, AtomicKind::String);
        assert!(bt.enum_domain.is_none());
    }

    #[test]
    fn constrained_kind_parses() {
        let bt: BaseType = serde_json::from_str(
            r#"{"type": "integer", "minInteger": 0, "maxInteger": 4095}"#,
        )
        .unwrap();
        assert_eq!(bt.kind, AtomicKind::Integer);
        assert_eq!(bt.min_integer, Some(0));
        assert_eq!(bt.max_integer, Some(4095));
    }

    #[test]
    fn reference_parses() {
        let bt: BaseType = serde_json::from_str(
            r#"{"type": "uuid", "refTable": "Child", "refType": "weak"}"#,
        )
        .unwrap();
        assert!(bt.is_weak_ref());
        assert_eq!(bt.ref_table.as_deref(), Some("Child"));
    }

    #[test]
    fn reference_defaults_to_strong() {
        let bt: BaseType =
            serde_json::from_str(r#"{"type": "uuid", "refTable": "Child"}"#).unwrap();
        assert!(bt.is_strong_ref());
    }

    #[test]
    fn enum_domain_parses_from_set() {
        let bt: BaseType = serde_json::from_str(
            r#"{"type": "string", "enum": ["set", ["tcp", "udp"]]}"#,
        )
        .unwrap();
        let domain = bt.enum_domain.unwrap();
        assert_eq!(domain, vec![Json::from("tcp"), Json::from("udp")]);
    }

    #[test]
    fn enum_domain_parses_from_single_atom() {
        let bt: BaseType =
            serde_json::from_str(r#"{"type": "string", "enum": "tcp"}"#).unwrap();
        assert_eq!(bt.enum_domain.unwrap(), vec![Json::from("tcp")]);
    }

    #[test]
    fn bad_shape_is_rejected() {
        assert!(serde_json::from_str::<BaseType>("42").is_err());
    }
}
