//! Atomic native values and their tagged wire forms.

use crate::error::{CodecError, CodecResult};
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use switchdb_schema::{AtomicKind, BaseType};
use uuid::Uuid;

/// A single atomic value.
///
/// Reals carry a total order via [`f64::total_cmp`] so atoms can live in
/// sets and map keys. NaN never appears on a JSON wire.
#[derive(Debug, Clone)]
pub enum Atom {
    /// 64-bit signed integer.
    Integer(i64),
    /// IEEE double.
    Real(f64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    Str(String),
    /// A real row identifier.
    Uuid(Uuid),
    /// A transaction-local placeholder identifier.
    NamedUuid(String),
}

impl Atom {
    /// Short kind name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Atom::Integer(_) => "integer",
            Atom::Real(_) => "real",
            Atom::Boolean(_) => "boolean",
            Atom::Str(_) => "string",
            Atom::Uuid(_) => "uuid",
            Atom::NamedUuid(_) => "named-uuid",
        }
    }

    /// Whether this atom is the schema default for its kind: zero number,
    /// empty string, false, or the nil uuid.
    pub fn is_default(&self) -> bool {
        match self {
            Atom::Integer(n) => *n == 0,
            Atom::Real(r) => *r == 0.0,
            Atom::Boolean(b) => !b,
            Atom::Str(s) => s.is_empty(),
            Atom::Uuid(u) => u.is_nil(),
            Atom::NamedUuid(s) => s.is_empty(),
        }
    }

    /// The default atom for an atomic kind.
    pub fn default_of(kind: AtomicKind) -> Self {
        match kind {
            AtomicKind::Integer => Atom::Integer(0),
            AtomicKind::Real => Atom::Real(0.0),
            AtomicKind::Boolean => Atom::Boolean(false),
            AtomicKind::String => Atom::Str(String::new()),
            AtomicKind::Uuid => Atom::Uuid(Uuid::nil()),
        }
    }

    /// Encodes this atom as a wire value for a column of base type `base`.
    ///
    /// Strings bound to uuid columns are resolved here: canonical uuid text
    /// becomes `["uuid", s]`, anything else becomes `["named-uuid", s]`.
    pub fn encode(&self, base: &BaseType) -> CodecResult<Json> {
        match (base.kind, self) {
            (AtomicKind::Integer, Atom::Integer(n)) => Ok(json!(n)),
            (AtomicKind::Real, Atom::Real(r)) => Ok(json!(r)),
            (AtomicKind::Real, Atom::Integer(n)) => {
                let r = int_to_real(*n)?;
                Ok(json!(r))
            }
            (AtomicKind::Boolean, Atom::Boolean(b)) => Ok(json!(b)),
            (AtomicKind::String, Atom::Str(s)) => Ok(json!(s)),
            (AtomicKind::Uuid, Atom::Uuid(u)) => Ok(json!(["uuid", u.to_string()])),
            (AtomicKind::Uuid, Atom::NamedUuid(s)) => Ok(json!(["named-uuid", s])),
            (AtomicKind::Uuid, Atom::Str(s)) => match Uuid::try_parse(s) {
                Ok(u) => Ok(json!(["uuid", u.to_string()])),
                Err(_) => Ok(json!(["named-uuid", s])),
            },
            (kind, atom) => Err(CodecError::mismatch(kind.to_string(), atom.kind_name())),
        }
    }

    /// Decodes a wire value into an atom of base type `base`.
    ///
    /// Numbers are accepted as any JSON number and coerced to the declared
    /// kind; coercions that lose information fail with
    /// [`CodecError::ConversionOutOfRange`].
    pub fn decode(value: &Json, base: &BaseType) -> CodecResult<Self> {
        match base.kind {
            AtomicKind::Integer => match value {
                Json::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Atom::Integer(i))
                    } else if let Some(f) = n.as_f64() {
                        real_to_int(f)
                    } else {
                        Err(CodecError::ConversionOutOfRange {
                            value: n.to_string(),
                            target: "integer".to_string(),
                        })
                    }
                }
                other => Err(CodecError::mismatch("integer", json_kind(other))),
            },
            AtomicKind::Real => match value {
                Json::Number(n) => {
                    if let Some(f) = n.as_f64() {
                        // Integers arrive here too; reject ones a double
                        // cannot hold exactly.
                        if let Some(i) = n.as_i64() {
                            return int_to_real(i).map(Atom::Real);
                        }
                        Ok(Atom::Real(f))
                    } else {
                        Err(CodecError::ConversionOutOfRange {
                            value: n.to_string(),
                            target: "real".to_string(),
                        })
                    }
                }
                other => Err(CodecError::mismatch("real", json_kind(other))),
            },
            AtomicKind::Boolean => match value {
                Json::Bool(b) => Ok(Atom::Boolean(*b)),
                other => Err(CodecError::mismatch("boolean", json_kind(other))),
            },
            AtomicKind::String => match value {
                Json::String(s) => Ok(Atom::Str(s.clone())),
                other => Err(CodecError::mismatch("string", json_kind(other))),
            },
            AtomicKind::Uuid => decode_uuid(value),
        }
    }

    /// The native form handed to typed models: uuids flatten to their
    /// canonical string, everything else passes through.
    pub fn into_native(self) -> Atom {
        match self {
            Atom::Uuid(u) => Atom::Str(u.to_string()),
            Atom::NamedUuid(s) => Atom::Str(s),
            other => other,
        }
    }
}

/// Decodes `["uuid", s]` or `["named-uuid", s]`.
fn decode_uuid(value: &Json) -> CodecResult<Atom> {
    let parts = match value.as_array() {
        Some(parts) if parts.len() == 2 => parts,
        _ => return Err(CodecError::mismatch("tagged uuid pair", json_kind(value))),
    };
    let text = parts[1]
        .as_str()
        .ok_or_else(|| CodecError::mismatch("uuid string", json_kind(&parts[1])))?;
    match parts[0].as_str() {
        Some("uuid") => {
            let u = Uuid::try_parse(text).map_err(|_| CodecError::MalformedUuid {
                text: text.to_string(),
            })?;
            Ok(Atom::Uuid(u))
        }
        Some("named-uuid") => Ok(Atom::NamedUuid(text.to_string())),
        _ => Err(CodecError::mismatch("uuid or named-uuid tag", json_kind(&parts[0]))),
    }
}

fn int_to_real(n: i64) -> CodecResult<f64> {
    let r = n as f64;
    if r as i64 == n {
        Ok(r)
    } else {
        Err(CodecError::ConversionOutOfRange {
            value: n.to_string(),
            target: "real".to_string(),
        })
    }
}

fn real_to_int(f: f64) -> CodecResult<Atom> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(Atom::Integer(f as i64))
    } else {
        Err(CodecError::ConversionOutOfRange {
            value: f.to_string(),
            target: "integer".to_string(),
        })
    }
}

/// Short JSON kind name for error messages.
pub(crate) fn json_kind(value: &Json) -> String {
    match value {
        Json::Null => "null".to_string(),
        Json::Bool(_) => "boolean".to_string(),
        Json::Number(_) => "number".to_string(),
        Json::String(_) => "string".to_string(),
        Json::Array(_) => "array".to_string(),
        Json::Object(_) => "object".to_string(),
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Atom {}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(a: &Atom) -> u8 {
            match a {
                Atom::Integer(_) => 0,
                Atom::Real(_) => 1,
                Atom::Boolean(_) => 2,
                Atom::Str(_) => 3,
                Atom::Uuid(_) => 4,
                Atom::NamedUuid(_) => 5,
            }
        }
        match (self, other) {
            (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
            (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
            (Atom::Boolean(a), Atom::Boolean(b)) => a.cmp(b),
            (Atom::Str(a), Atom::Str(b)) => a.cmp(b),
            (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
            (Atom::NamedUuid(a), Atom::NamedUuid(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Atom::Integer(n) => n.hash(state),
            Atom::Real(r) => r.to_bits().hash(state),
            Atom::Boolean(b) => b.hash(state),
            Atom::Str(s) => s.hash(state),
            Atom::Uuid(u) => u.hash(state),
            Atom::NamedUuid(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(n) => write!(f, "{n}"),
            Atom::Real(r) => write!(f, "{r}"),
            Atom::Boolean(b) => write!(f, "{b}"),
            Atom::Str(s) => write!(f, "{s:?}"),
            Atom::Uuid(u) => write!(f, "{u}"),
            Atom::NamedUuid(s) => write!(f, "named:{s}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(n: i64) -> Self {
        Atom::Integer(n)
    }
}

impl From<f64> for Atom {
    fn from(r: f64) -> Self {
        Atom::Real(r)
    }
}

impl From<bool> for Atom {
    fn from(b: bool) -> Self {
        Atom::Boolean(b)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::Str(s.to_string())
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::Str(s)
    }
}

impl From<Uuid> for Atom {
    fn from(u: Uuid) -> Self {
        Atom::Uuid(u)
    }
}
