//! Typed models: user structs bound to tables through column tags.
//!
//! A model is a plain struct whose fields carry `#[column("name")]` tags
//! inside the [`model!`](crate::model!) macro. The macro generates the
//! [`Model`] implementation; column identity travels with the generated
//! accessors, so a foreign column name fails loudly instead of silently
//! matching the wrong field.

use crate::error::{CoreError, CoreResult};
use std::any::Any;
use std::collections::BTreeMap;
use switchdb_codec::{Atom, Datum};
use switchdb_schema::{NativeKind, NativeShape, UUID_COLUMN};
use uuid::Uuid;

/// One tagged field of a model: its column name and native shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnField {
    /// The column tag.
    pub column: &'static str,
    /// The field's static native shape.
    pub shape: NativeShape,
}

/// Dynamic access to a model instance.
///
/// Implemented by the [`model!`](crate::model!) macro; not intended for
/// manual implementation.
pub trait Model: Any + Send + Sync {
    /// The table this model represents.
    fn table_name(&self) -> &'static str;

    /// The model's tagged fields.
    fn column_fields(&self) -> &'static [ColumnField];

    /// Reads a field by column tag; `None` for foreign names.
    fn datum(&self, column: &str) -> Option<Datum>;

    /// Writes a field by column tag.
    fn set_datum(&mut self, column: &str, value: Datum) -> CoreResult<()>;

    /// Clones the instance behind the trait object.
    fn clone_model(&self) -> Box<dyn Model>;

    /// Upcast for typed downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The row identifier, when the `_uuid` field holds a real one.
    fn uuid(&self) -> Option<Uuid> {
        match self.datum(UUID_COLUMN) {
            Some(Datum::Scalar(Atom::Str(s))) => Uuid::try_parse(&s).ok(),
            _ => None,
        }
    }

    /// The raw `_uuid` field text; placeholders come back verbatim.
    fn uuid_text(&self) -> String {
        match self.datum(UUID_COLUMN) {
            Some(Datum::Scalar(Atom::Str(s))) => s,
            _ => String::new(),
        }
    }

    /// Sets the row identifier.
    fn set_uuid(&mut self, id: Uuid) -> CoreResult<()> {
        self.set_datum(UUID_COLUMN, Datum::Scalar(Atom::Str(id.to_string())))
    }
}

/// Compile-time metadata for a model type.
pub trait TypedModel: Model + Default + Clone {
    /// The table this model type represents.
    const TABLE: &'static str;
    /// The type's tagged fields.
    const COLUMNS: &'static [ColumnField];
}

/// Field-level equality over the given columns.
pub fn fields_equal(a: &dyn Model, b: &dyn Model, columns: &[&str]) -> bool {
    columns.iter().all(|c| a.datum(c) == b.datum(c))
}

/// A scalar value usable as a model field, set element, or map key/value.
pub trait AtomValue: Sized {
    /// The native kind this type declares.
    const KIND: NativeKind;
    /// Converts into an atom.
    fn to_atom(&self) -> Atom;
    /// Converts back from an atom.
    fn from_atom(atom: Atom) -> CoreResult<Self>;
}

fn atom_mismatch(expected: &str, got: &Atom) -> CoreError {
    CoreError::Codec(switchdb_codec::CodecError::TypeMismatch {
        expected: expected.to_string(),
        got: got.kind_name().to_string(),
    })
}

impl AtomValue for i64 {
    const KIND: NativeKind = NativeKind::Integer;
    fn to_atom(&self) -> Atom {
        Atom::Integer(*self)
    }
    fn from_atom(atom: Atom) -> CoreResult<Self> {
        match atom {
            Atom::Integer(n) => Ok(n),
            other => Err(atom_mismatch("integer", &other)),
        }
    }
}

impl AtomValue for f64 {
    const KIND: NativeKind = NativeKind::Real;
    fn to_atom(&self) -> Atom {
        Atom::Real(*self)
    }
    fn from_atom(atom: Atom) -> CoreResult<Self> {
        match atom {
            Atom::Real(r) => Ok(r),
            Atom::Integer(n) => Ok(n as f64),
            other => Err(atom_mismatch("real", &other)),
        }
    }
}

impl AtomValue for bool {
    const KIND: NativeKind = NativeKind::Boolean;
    fn to_atom(&self) -> Atom {
        Atom::Boolean(*self)
    }
    fn from_atom(atom: Atom) -> CoreResult<Self> {
        match atom {
            Atom::Boolean(b) => Ok(b),
            other => Err(atom_mismatch("boolean", &other)),
        }
    }
}

impl AtomValue for String {
    const KIND: NativeKind = NativeKind::String;
    fn to_atom(&self) -> Atom {
        Atom::Str(self.clone())
    }
    fn from_atom(atom: Atom) -> CoreResult<Self> {
        // Identifiers flatten to their canonical text.
        match atom.into_native() {
            Atom::Str(s) => Ok(s),
            other => Err(atom_mismatch("string", &other)),
        }
    }
}

/// A complete model field value.
pub trait FieldValue: Sized {
    /// The field's static native shape.
    const SHAPE: NativeShape;
    /// Converts into a column value.
    fn to_datum(&self) -> Datum;
    /// Converts back from a column value.
    fn from_datum(value: Datum) -> CoreResult<Self>;
}

macro_rules! scalar_field_value {
    ($($ty:ty),+) => {
        $(
            impl FieldValue for $ty {
                const SHAPE: NativeShape = NativeShape::Scalar(<$ty as AtomValue>::KIND);
                fn to_datum(&self) -> Datum {
                    Datum::Scalar(self.to_atom())
                }
                fn from_datum(value: Datum) -> CoreResult<Self> {
                    match value {
                        Datum::Scalar(atom) => <$ty as AtomValue>::from_atom(atom),
                        Datum::Optional(Some(atom)) => <$ty as AtomValue>::from_atom(atom),
                        other => Err(CoreError::Codec(
                            switchdb_codec::CodecError::TypeMismatch {
                                expected: "scalar".to_string(),
                                got: other.shape_name().to_string(),
                            },
                        )),
                    }
                }
            }
        )+
    };
}

scalar_field_value!(i64, f64, bool, String);

impl<T: AtomValue> FieldValue for Option<T> {
    const SHAPE: NativeShape = NativeShape::Optional(T::KIND);
    fn to_datum(&self) -> Datum {
        Datum::Optional(self.as_ref().map(AtomValue::to_atom))
    }
    fn from_datum(value: Datum) -> CoreResult<Self> {
        match value {
            Datum::Optional(None) => Ok(None),
            Datum::Optional(Some(atom)) | Datum::Scalar(atom) => T::from_atom(atom).map(Some),
            Datum::Set(mut elems) if elems.len() <= 1 => {
                elems.pop().map(T::from_atom).transpose()
            }
            other => Err(CoreError::Codec(switchdb_codec::CodecError::TypeMismatch {
                expected: "optional".to_string(),
                got: other.shape_name().to_string(),
            })),
        }
    }
}

impl<T: AtomValue> FieldValue for Vec<T> {
    const SHAPE: NativeShape = NativeShape::Set(T::KIND);
    fn to_datum(&self) -> Datum {
        Datum::Set(self.iter().map(AtomValue::to_atom).collect())
    }
    fn from_datum(value: Datum) -> CoreResult<Self> {
        match value {
            Datum::Set(elems) => elems.into_iter().map(T::from_atom).collect(),
            Datum::Scalar(atom) | Datum::Optional(Some(atom)) => Ok(vec![T::from_atom(atom)?]),
            Datum::Optional(None) => Ok(Vec::new()),
            other => Err(CoreError::Codec(switchdb_codec::CodecError::TypeMismatch {
                expected: "set".to_string(),
                got: other.shape_name().to_string(),
            })),
        }
    }
}

impl<K: AtomValue + Ord, V: AtomValue> FieldValue for BTreeMap<K, V> {
    const SHAPE: NativeShape = NativeShape::Map(K::KIND, V::KIND);
    fn to_datum(&self) -> Datum {
        Datum::Map(self.iter().map(|(k, v)| (k.to_atom(), v.to_atom())).collect())
    }
    fn from_datum(value: Datum) -> CoreResult<Self> {
        match value {
            Datum::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_atom(k)?, V::from_atom(v)?)))
                .collect(),
            other => Err(CoreError::Codec(switchdb_codec::CodecError::TypeMismatch {
                expected: "map".to_string(),
                got: other.shape_name().to_string(),
            })),
        }
    }
}

/// Declares a model struct and generates its [`Model`] and [`TypedModel`]
/// implementations.
///
/// Every field carries a `#[column("name")]` tag binding it to a column of
/// the named table. The `_uuid` column maps to a `String` field holding the
/// identifier (or a named-uuid placeholder before insertion).
///
/// ```rust
/// use std::collections::BTreeMap;
/// switchdb_core::model! {
///     /// A parent row.
///     pub struct Parent("Parent") {
///         #[column("_uuid")]
///         pub uuid: String,
///         #[column("name")]
///         pub name: String,
///         #[column("children")]
///         pub children: Vec<String>,
///         #[column("extras")]
///         pub extras: BTreeMap<String, String>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ( $table:literal ) {
            $(
                $(#[doc = $fdoc:expr])*
                #[column($col:literal)]
                $fvis:vis $field:ident : $fty:ty
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        #[allow(missing_docs)]
        $vis struct $name {
            $(
                $(#[doc = $fdoc])*
                $fvis $field : $fty,
            )+
        }

        impl $crate::Model for $name {
            fn table_name(&self) -> &'static str {
                $table
            }

            fn column_fields(&self) -> &'static [$crate::ColumnField] {
                <$name as $crate::TypedModel>::COLUMNS
            }

            fn datum(&self, column: &str) -> ::std::option::Option<$crate::Datum> {
                match column {
                    $( $col => ::std::option::Option::Some(
                        $crate::FieldValue::to_datum(&self.$field),
                    ), )+
                    _ => ::std::option::Option::None,
                }
            }

            fn set_datum(
                &mut self,
                column: &str,
                value: $crate::Datum,
            ) -> $crate::CoreResult<()> {
                match column {
                    $( $col => {
                        self.$field = $crate::FieldValue::from_datum(value)?;
                        Ok(())
                    } )+
                    _ => Err($crate::CoreError::UnknownColumn {
                        table: $table.to_string(),
                        column: column.to_string(),
                    }),
                }
            }

            fn clone_model(&self) -> ::std::boxed::Box<dyn $crate::Model> {
                ::std::boxed::Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }

        impl $crate::TypedModel for $name {
            const TABLE: &'static str = $table;
            const COLUMNS: &'static [$crate::ColumnField] = &[
                $(
                    $crate::ColumnField {
                        column: $col,
                        shape: <$fty as $crate::FieldValue>::SHAPE,
                    },
                )+
            ];
        }
    };
}
