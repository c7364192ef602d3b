//! Column type declarations.

use crate::atomic::{AtomicKind, BaseType};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value as Json;
use std::fmt;

/// Upper cardinality bound of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Max {
    /// No bound.
    Unlimited,
    /// At most this many elements.
    N(u64),
}

impl Max {
    /// Returns the bound as a number, `u64::MAX` for unlimited.
    pub fn as_u64(self) -> u64 {
        match self {
            Max::Unlimited => u64::MAX,
            Max::N(n) => n,
        }
    }
}

impl<'de> Deserialize<'de> for Max {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Json::deserialize(deserializer)? {
            Json::String(s) if s == "unlimited" => Ok(Max::Unlimited),
            Json::Number(n) => n
                .as_u64()
                .map(Max::N)
                .ok_or_else(|| de::Error::custom("max must be a non-negative integer")),
            other => Err(de::Error::custom(format!(
                "max must be a number or \"unlimited\", got {other}"
            ))),
        }
    }
}

/// The full type of a column: key kind, optional value kind, and cardinality.
///
/// On the wire this is either a bare atomic kind (`"string"`, shorthand for
/// a scalar) or an object `{"key": ..., "value": ..., "min": ..., "max": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    /// Kind of set elements and map keys.
    pub key: BaseType,
    /// Kind of map values; `None` for atoms and sets.
    pub value: Option<BaseType>,
    /// Minimum cardinality.
    pub min: u64,
    /// Maximum cardinality.
    pub max: Max,
}

impl ColumnType {
    /// Creates a scalar column type (min 1, max 1) of the given kind.
    pub fn scalar(kind: AtomicKind) -> Self {
        Self {
            key: BaseType::new(kind),
            value: None,
            min: 1,
            max: Max::N(1),
        }
    }

    /// Returns `true` when exactly one value is held (min 1, max 1, no map).
    pub fn is_scalar(&self) -> bool {
        self.value.is_none() && self.min == 1 && self.max == Max::N(1)
    }

    /// Returns `true` for the optional-scalar shape (min 0, max 1, no map).
    pub fn is_optional(&self) -> bool {
        self.value.is_none() && self.min == 0 && self.max == Max::N(1)
    }

    /// Returns `true` for multi-element sets (no map, max > 1).
    pub fn is_set(&self) -> bool {
        self.value.is_none() && self.max.as_u64() > 1
    }

    /// Returns `true` for maps.
    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    /// The native shape an entity field bound to this column must have.
    pub fn native_shape(&self) -> NativeShape {
        let key = NativeKind::of(self.key.kind);
        match &self.value {
            Some(value) => NativeShape::Map(key, NativeKind::of(value.kind)),
            None if self.max.as_u64() > 1 => NativeShape::Set(key),
            None if self.min == 0 => NativeShape::Optional(key),
            None => NativeShape::Scalar(key),
        }
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Object {
            key: BaseType,
            value: Option<BaseType>,
            min: Option<u64>,
            max: Option<Max>,
        }

        let raw = Json::deserialize(deserializer)?;
        match raw {
            Json::String(_) => {
                let kind = AtomicKind::deserialize(raw).map_err(de::Error::custom)?;
                Ok(ColumnType::scalar(kind))
            }
            Json::Object(_) => {
                let obj: Object = serde_json::from_value(raw).map_err(de::Error::custom)?;
                let min = obj.min.unwrap_or(1);
                let max = obj.max.unwrap_or(Max::N(1));
                if max.as_u64() == 0 || min > max.as_u64() {
                    return Err(de::Error::custom(format!(
                        "cardinality bounds are inconsistent: min {min}, max {:?}",
                        max
                    )));
                }
                Ok(ColumnType {
                    key: obj.key,
                    value: obj.value,
                    min,
                    max,
                })
            }
            other => Err(de::Error::custom(format!(
                "column type must be a string or object, got {other}"
            ))),
        }
    }
}

/// A column declaration: type plus mutability flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnSchema {
    /// The column's type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether transactions may change the column after insert.
    #[serde(default = "default_true")]
    pub mutable: bool,
    /// Whether the column is excluded from durability.
    #[serde(default)]
    pub ephemeral: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnSchema {
    /// Creates an immutable scalar column of the given kind.
    pub fn immutable_scalar(kind: AtomicKind) -> Self {
        Self {
            ty: ColumnType::scalar(kind),
            mutable: false,
            ephemeral: false,
        }
    }
}

/// Native kind of an entity field, as declared through a column tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    /// `i64`.
    Integer,
    /// `f64`.
    Real,
    /// `bool`.
    Boolean,
    /// `String`; uuid columns also map here, the string holds the identifier.
    String,
}

impl NativeKind {
    /// Maps an atomic kind to the native field kind it decodes into.
    pub fn of(kind: AtomicKind) -> Self {
        match kind {
            AtomicKind::Integer => NativeKind::Integer,
            AtomicKind::Real => NativeKind::Real,
            AtomicKind::Boolean => NativeKind::Boolean,
            AtomicKind::String | AtomicKind::Uuid => NativeKind::String,
        }
    }
}

impl fmt::Display for NativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeKind::Integer => "i64",
            NativeKind::Real => "f64",
            NativeKind::Boolean => "bool",
            NativeKind::String => "String",
        };
        f.write_str(name)
    }
}

/// Native shape of an entity field, as declared through a column tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeShape {
    /// A bare native value.
    Scalar(NativeKind),
    /// `Option<..>` for min-0 max-1 columns.
    Optional(NativeKind),
    /// `Vec<..>` for multi-element sets.
    Set(NativeKind),
    /// `BTreeMap<.., ..>` for maps.
    Map(NativeKind, NativeKind),
}

impl fmt::Display for NativeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeShape::Scalar(k) => write!(f, "{k}"),
            NativeShape::Optional(k) => write!(f, "Option<{k}>"),
            NativeShape::Set(k) => write!(f, "Vec<{k}>"),
            NativeShape::Map(k, v) => write!(f, "BTreeMap<{k}, {v}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_scalar_parses() {
        let ty: ColumnType = serde_json::from_str("\"integer\"").unwrap();
        assert!(ty.is_scalar());
        assert_eq!(ty.native_shape(), NativeShape::Scalar(NativeKind::Integer));
    }

    #[test]
    fn unlimited_set_parses() {
        let ty: ColumnType = serde_json::from_str(
            r#"{"key": {"type": "uuid", "refTable": "Child"}, "min": 0, "max": "unlimited"}"#,
        )
        .unwrap();
        assert!(ty.is_set());
        assert_eq!(ty.max, Max::Unlimited);
        assert_eq!(ty.native_shape(), NativeShape::Set(NativeKind::String));
    }

    #[test]
    fn optional_scalar_shape() {
        let ty: ColumnType =
            serde_json::from_str(r#"{"key": "string", "min": 0, "max": 1}"#).unwrap();
        assert!(ty.is_optional());
        assert_eq!(ty.native_shape(), NativeShape::Optional(NativeKind::String));
    }

    #[test]
    fn map_shape() {
        let ty: ColumnType = serde_json::from_str(
            r#"{"key": "string", "value": "string", "min": 0, "max": "unlimited"}"#,
        )
        .unwrap();
        assert!(ty.is_map());
        assert_eq!(
            ty.native_shape(),
            NativeShape::Map(NativeKind::String, NativeKind::String)
        );
    }

    #[test]
    fn inconsistent_bounds_rejected() {
        let err = serde_json::from_str::<ColumnType>(r#"{"key": "string", "min": 3, "max": 2}"#);
        assert!(err.is_err());
    }

    #[test]
    fn column_defaults() {
        let col: ColumnSchema = serde_json::from_str(r#"{"type": "string"}"#).unwrap();
        assert!(col.mutable);
        assert!(!col.ephemeral);
    }
}
