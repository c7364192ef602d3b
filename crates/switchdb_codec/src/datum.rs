//! Column values: atoms, optional atoms, sets, and maps.

use crate::atom::{json_kind, Atom};
use crate::error::{CodecError, CodecResult};
use serde_json::{json, Value as Json};
use switchdb_schema::{ColumnType, Max};

/// A full column value in native form.
///
/// Sets preserve element order but compare as multisets; maps compare as
/// unordered key→value collections.
#[derive(Debug, Clone)]
pub enum Datum {
    /// Exactly one value (min 1, max 1).
    Scalar(Atom),
    /// Zero or one value (min 0, max 1).
    Optional(Option<Atom>),
    /// A set of values (max > 1).
    Set(Vec<Atom>),
    /// A keyed map.
    Map(Vec<(Atom, Atom)>),
}

impl Datum {
    /// Short shape name for error messages.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Datum::Scalar(_) => "scalar",
            Datum::Optional(_) => "optional",
            Datum::Set(_) => "set",
            Datum::Map(_) => "map",
        }
    }

    /// The schema default for a column type: zero scalar, empty optional,
    /// empty set, empty map.
    pub fn default_of(ty: &ColumnType) -> Self {
        if ty.is_map() {
            Datum::Map(Vec::new())
        } else if ty.is_set() {
            Datum::Set(Vec::new())
        } else if ty.is_optional() {
            Datum::Optional(None)
        } else {
            Datum::Scalar(Atom::default_of(ty.key.kind))
        }
    }

    /// Whether this value is the schema default.
    pub fn is_default(&self) -> bool {
        match self {
            Datum::Scalar(a) => a.is_default(),
            Datum::Optional(o) => o.is_none(),
            Datum::Set(s) => s.is_empty(),
            Datum::Map(m) => m.is_empty(),
        }
    }

    /// Encodes this value as a wire value for a column of type `ty`.
    ///
    /// A set with exactly one element emits the bare-element form, the
    /// empty set emits `["set", []]`, larger sets the tagged form. Maps
    /// always emit `["map", [...]]`.
    pub fn encode(&self, ty: &ColumnType) -> CodecResult<Json> {
        match self {
            Datum::Scalar(atom) => {
                if ty.is_map() {
                    return Err(CodecError::mismatch("map", "scalar"));
                }
                atom.encode(&ty.key)
            }
            Datum::Optional(opt) => {
                if ty.is_map() {
                    return Err(CodecError::mismatch("map", "optional"));
                }
                match opt {
                    Some(atom) => atom.encode(&ty.key),
                    None => Ok(json!(["set", []])),
                }
            }
            Datum::Set(elems) => {
                if ty.is_map() {
                    return Err(CodecError::mismatch("map", "set"));
                }
                match elems.as_slice() {
                    [single] => single.encode(&ty.key),
                    _ => {
                        let encoded: CodecResult<Vec<Json>> =
                            elems.iter().map(|a| a.encode(&ty.key)).collect();
                        Ok(json!(["set", encoded?]))
                    }
                }
            }
            Datum::Map(pairs) => {
                let value_type = ty
                    .value
                    .as_ref()
                    .ok_or_else(|| CodecError::mismatch(ty.native_shape().to_string(), "map"))?;
                let encoded: CodecResult<Vec<Json>> = pairs
                    .iter()
                    .map(|(k, v)| Ok(json!([k.encode(&ty.key)?, v.encode(value_type)?])))
                    .collect();
                Ok(json!(["map", encoded?]))
            }
        }
    }

    /// Decodes a wire value for a column of type `ty`.
    ///
    /// Accepts the bare-element form wherever the schema allows it; the
    /// decoded shape always matches [`ColumnType::native_shape`].
    pub fn decode(value: &Json, ty: &ColumnType) -> CodecResult<Self> {
        if let Some(value_type) = &ty.value {
            // Some servers spell an empty map as the empty set.
            if value == &json!(["set", []]) {
                return Ok(Datum::Map(Vec::new()));
            }
            let pairs = untag(value, "map")?
                .ok_or_else(|| CodecError::mismatch("tagged map", json_kind(value)))?;
            let mut out = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let kv = pair
                    .as_array()
                    .filter(|kv| kv.len() == 2)
                    .ok_or_else(|| CodecError::mismatch("map pair", json_kind(pair)))?;
                out.push((
                    Atom::decode(&kv[0], &ty.key)?,
                    Atom::decode(&kv[1], value_type)?,
                ));
            }
            return Ok(Datum::Map(out));
        }

        let elems: Vec<Atom> = match untag(value, "set")? {
            Some(body) => body
                .iter()
                .map(|e| Atom::decode(e, &ty.key))
                .collect::<CodecResult<_>>()?,
            None => vec![Atom::decode(value, &ty.key)?],
        };

        if ty.is_set() {
            return Ok(Datum::Set(elems));
        }
        if ty.is_optional() {
            return match elems.len() {
                0 => Ok(Datum::Optional(None)),
                1 => Ok(Datum::Optional(elems.into_iter().next())),
                n => Err(CodecError::mismatch("at most one element", format!("{n} elements"))),
            };
        }
        let mut elems = elems.into_iter();
        match (elems.next(), elems.next()) {
            (Some(atom), None) => Ok(Datum::Scalar(atom)),
            _ => Err(CodecError::mismatch("exactly one element", "another shape")),
        }
    }

    /// Folds a differential change into this value, returning the new value
    /// and whether anything changed.
    ///
    /// Scalars are replaced outright. Sets take the symmetric difference.
    /// Map entries are added when absent, removed when the change repeats
    /// the current value, and replaced otherwise. Applying the same change
    /// twice is the identity on sets and maps.
    pub fn apply_diff(&self, change: &Datum) -> (Datum, bool) {
        match (self, change) {
            (Datum::Set(current), Datum::Set(delta)) => {
                let next = set_symmetric_difference(current, delta);
                let changed = !multiset_eq(current, &next);
                (Datum::Set(next), changed)
            }
            (Datum::Map(current), Datum::Map(delta)) => {
                let next = map_difference(current, delta);
                let changed = !map_eq(current, &next);
                (Datum::Map(next), changed)
            }
            (current, delta) => (delta.clone(), current != delta),
        }
    }

    /// The change that turns `self` into `new` under [`Datum::apply_diff`],
    /// or `None` when the two already agree.
    pub fn diff(&self, new: &Datum) -> Option<Datum> {
        match (self, new) {
            (Datum::Set(old), Datum::Set(next)) => {
                let delta = set_symmetric_difference(old, next);
                (!delta.is_empty()).then_some(Datum::Set(delta))
            }
            (Datum::Map(old), Datum::Map(next)) => {
                let mut delta = Vec::new();
                for (k, v) in next {
                    match old.iter().find(|(ok, _)| ok == k) {
                        Some((_, ov)) if ov == v => {}
                        _ => delta.push((k.clone(), v.clone())),
                    }
                }
                for (k, v) in old {
                    if !next.iter().any(|(nk, _)| nk == k) {
                        delta.push((k.clone(), v.clone()));
                    }
                }
                (!delta.is_empty()).then_some(Datum::Map(delta))
            }
            (old, next) if old == next => None,
            (_, next) => Some(next.clone()),
        }
    }

    /// Checks the decoded value against the column's domain constraints:
    /// cardinality bounds, enum domain, numeric ranges, string lengths.
    pub fn check_constraints(&self, column: &str, ty: &ColumnType) -> CodecResult<()> {
        let count = match self {
            Datum::Scalar(_) => 1,
            Datum::Optional(o) => o.iter().count() as u64,
            Datum::Set(s) => s.len() as u64,
            Datum::Map(m) => m.len() as u64,
        };
        if count < ty.min {
            return Err(CodecError::ConstraintViolation {
                message: format!("column {column:?} holds {count} values, minimum is {}", ty.min),
            });
        }
        if let Max::N(max) = ty.max {
            if count > max {
                return Err(CodecError::ConstraintViolation {
                    message: format!("column {column:?} holds {count} values, maximum is {max}"),
                });
            }
        }

        let check_atom = |atom: &Atom, base: &switchdb_schema::BaseType| -> CodecResult<()> {
            if let Some(domain) = &base.enum_domain {
                let wire = atom.encode(base)?;
                if !domain.contains(&wire) {
                    return Err(CodecError::ConstraintViolation {
                        message: format!("value {atom} of column {column:?} is outside its enum"),
                    });
                }
            }
            match atom {
                Atom::Integer(n) => {
                    if base.min_integer.is_some_and(|m| *n < m)
                        || base.max_integer.is_some_and(|m| *n > m)
                    {
                        return Err(CodecError::ConstraintViolation {
                            message: format!("integer {n} of column {column:?} is out of range"),
                        });
                    }
                }
                Atom::Real(r) => {
                    if base.min_real.is_some_and(|m| *r < m)
                        || base.max_real.is_some_and(|m| *r > m)
                    {
                        return Err(CodecError::ConstraintViolation {
                            message: format!("real {r} of column {column:?} is out of range"),
                        });
                    }
                }
                Atom::Str(s) => {
                    let len = s.chars().count() as u64;
                    if base.min_length.is_some_and(|m| len < m)
                        || base.max_length.is_some_and(|m| len > m)
                    {
                        return Err(CodecError::ConstraintViolation {
                            message: format!("string length {len} of column {column:?} is out of range"),
                        });
                    }
                }
                _ => {}
            }
            Ok(())
        };

        match self {
            Datum::Scalar(a) => check_atom(a, &ty.key),
            Datum::Optional(o) => o.iter().try_for_each(|a| check_atom(a, &ty.key)),
            Datum::Set(s) => s.iter().try_for_each(|a| check_atom(a, &ty.key)),
            Datum::Map(m) => {
                let value_type = ty.value.as_ref().ok_or_else(|| {
                    CodecError::mismatch(ty.native_shape().to_string(), "map")
                })?;
                m.iter().try_for_each(|(k, v)| {
                    check_atom(k, &ty.key)?;
                    check_atom(v, value_type)
                })
            }
        }
    }

    /// The atoms held by this value, in order.
    pub fn atoms(&self) -> Vec<&Atom> {
        match self {
            Datum::Scalar(a) => vec![a],
            Datum::Optional(o) => o.iter().collect(),
            Datum::Set(s) => s.iter().collect(),
            Datum::Map(m) => m.iter().flat_map(|(k, v)| [k, v]).collect(),
        }
    }
}

/// Symmetric difference of two atom multisets.
///
/// Elements present in exactly one side survive; repeated application of
/// the same delta restores the original.
pub fn set_symmetric_difference(current: &[Atom], delta: &[Atom]) -> Vec<Atom> {
    let mut next: Vec<Atom> = Vec::with_capacity(current.len() + delta.len());
    let mut consumed = vec![false; delta.len()];
    for atom in current {
        let matched = delta
            .iter()
            .enumerate()
            .find(|(i, d)| !consumed[*i] && *d == atom)
            .map(|(i, _)| i);
        match matched {
            Some(i) => consumed[i] = true,
            None => next.push(atom.clone()),
        }
    }
    for (i, atom) in delta.iter().enumerate() {
        if !consumed[i] {
            next.push(atom.clone());
        }
    }
    next
}

/// Map difference: for each `(k, v)` in `delta`, add the entry when `k` is
/// absent, remove it when the current value equals `v`, replace otherwise.
pub fn map_difference(current: &[(Atom, Atom)], delta: &[(Atom, Atom)]) -> Vec<(Atom, Atom)> {
    let mut next: Vec<(Atom, Atom)> = current.to_vec();
    for (k, v) in delta {
        match next.iter().position(|(nk, _)| nk == k) {
            None => next.push((k.clone(), v.clone())),
            Some(i) if &next[i].1 == v => {
                next.remove(i);
            }
            Some(i) => next[i].1 = v.clone(),
        }
    }
    next
}

fn multiset_eq(a: &[Atom], b: &[Atom]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut sa: Vec<&Atom> = a.iter().collect();
    let mut sb: Vec<&Atom> = b.iter().collect();
    sa.sort();
    sb.sort();
    sa == sb
}

fn map_eq(a: &[(Atom, Atom)], b: &[(Atom, Atom)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Scalar(a), Datum::Scalar(b)) => a == b,
            (Datum::Optional(a), Datum::Optional(b)) => a == b,
            (Datum::Set(a), Datum::Set(b)) => multiset_eq(a, b),
            (Datum::Map(a), Datum::Map(b)) => map_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Datum {}

/// Strips a `[tag, body]` wrapper, returning the body array, or `None` when
/// the value is not the given tagged form.
fn untag<'a>(value: &'a Json, tag: &str) -> CodecResult<Option<&'a Vec<Json>>> {
    let Some(parts) = value.as_array() else {
        return Ok(None);
    };
    if parts.len() != 2 || parts[0].as_str() != Some(tag) {
        // Tagged uuid pairs are atoms, not containers.
        if parts.first().and_then(Json::as_str) == Some("uuid")
            || parts.first().and_then(Json::as_str) == Some("named-uuid")
        {
            return Ok(None);
        }
        if tag == "set" {
            return Ok(None);
        }
        return Err(CodecError::mismatch(format!("tagged {tag}"), json_kind(value)));
    }
    parts[1]
        .as_array()
        .map(Some)
        .ok_or_else(|| CodecError::mismatch(format!("{tag} body array"), json_kind(&parts[1])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchdb_schema::AtomicKind;

    fn set_type(kind: AtomicKind) -> ColumnType {
        serde_json::from_value(json!({
            "key": kind.to_string(), "min": 0, "max": "unlimited"
        }))
        .unwrap()
    }

    fn map_type() -> ColumnType {
        serde_json::from_value(json!({
            "key": "string", "value": "string", "min": 0, "max": "unlimited"
        }))
        .unwrap()
    }

    fn optional_type(kind: AtomicKind) -> ColumnType {
        serde_json::from_value(json!({"key": kind.to_string(), "min": 0, "max": 1})).unwrap()
    }

    #[test]
    fn empty_set_is_tagged() {
        let wire = Datum::Set(vec![]).encode(&set_type(AtomicKind::String)).unwrap();
        assert_eq!(wire, json!(["set", []]));
    }

    #[test]
    fn singleton_set_is_bare() {
        let wire = Datum::Set(vec![Atom::from("a")])
            .encode(&set_type(AtomicKind::String))
            .unwrap();
        assert_eq!(wire, json!("a"));
    }

    #[test]
    fn larger_set_is_tagged() {
        let wire = Datum::Set(vec![Atom::from("a"), Atom::from("b")])
            .encode(&set_type(AtomicKind::String))
            .unwrap();
        assert_eq!(wire, json!(["set", ["a", "b"]]));
    }

    #[test]
    fn set_decode_accepts_bare_and_tagged() {
        let ty = set_type(AtomicKind::String);
        assert_eq!(
            Datum::decode(&json!("a"), &ty).unwrap(),
            Datum::Set(vec![Atom::from("a")])
        );
        assert_eq!(
            Datum::decode(&json!(["set", ["a", "b"]]), &ty).unwrap(),
            Datum::Set(vec![Atom::from("a"), Atom::from("b")])
        );
    }

    #[test]
    fn optional_forms() {
        let ty = optional_type(AtomicKind::Integer);
        assert_eq!(
            Datum::Optional(None).encode(&ty).unwrap(),
            json!(["set", []])
        );
        assert_eq!(
            Datum::Optional(Some(Atom::Integer(5))).encode(&ty).unwrap(),
            json!(5)
        );
        assert_eq!(
            Datum::decode(&json!(["set", []]), &ty).unwrap(),
            Datum::Optional(None)
        );
        assert_eq!(
            Datum::decode(&json!(5), &ty).unwrap(),
            Datum::Optional(Some(Atom::Integer(5)))
        );
    }

    #[test]
    fn map_round_trip_is_order_insensitive() {
        let ty = map_type();
        let value = Datum::Map(vec![
            (Atom::from("team"), Atom::from("a")),
            (Atom::from("role"), Atom::from("x")),
        ]);
        let wire = value.encode(&ty).unwrap();
        assert_eq!(wire, json!(["map", [["team", "a"], ["role", "x"]]]));

        let reordered = json!(["map", [["role", "x"], ["team", "a"]]]);
        assert_eq!(Datum::decode(&reordered, &ty).unwrap(), value);
    }

    #[test]
    fn uuid_set_round_trip() {
        let ty: ColumnType = serde_json::from_value(json!({
            "key": {"type": "uuid", "refTable": "Child"}, "min": 0, "max": "unlimited"
        }))
        .unwrap();
        let id = uuid::Uuid::try_parse("36bef046-7da7-43a5-905a-c17899216fcb").unwrap();
        let value = Datum::Set(vec![Atom::Uuid(id)]);
        let wire = value.encode(&ty).unwrap();
        assert_eq!(wire, json!(["uuid", id.to_string()]));
        assert_eq!(Datum::decode(&wire, &ty).unwrap(), value);
    }

    #[test]
    fn defaults() {
        assert!(Datum::default_of(&set_type(AtomicKind::String)).is_default());
        assert!(Datum::default_of(&map_type()).is_default());
        assert!(Datum::default_of(&ColumnType::scalar(AtomicKind::Integer)).is_default());
        assert!(!Datum::Scalar(Atom::Integer(3)).is_default());
    }

    #[test]
    fn set_diff_is_symmetric_difference() {
        let current = vec![Atom::from("a"), Atom::from("b")];
        let delta = vec![Atom::from("b"), Atom::from("c")];
        let next = set_symmetric_difference(&current, &delta);
        assert_eq!(next, vec![Atom::from("a"), Atom::from("c")]);

        // Double application is the identity.
        let back = set_symmetric_difference(&next, &delta);
        assert!(multiset_eq(&back, &current));
    }

    #[test]
    fn map_diff_rules() {
        let current = vec![(Atom::from("k"), Atom::from("v")), (Atom::from("x"), Atom::from("1"))];
        let delta = vec![
            (Atom::from("k"), Atom::from("v")),  // equal value: remove
            (Atom::from("x"), Atom::from("2")),  // different value: replace
            (Atom::from("new"), Atom::from("n")), // absent key: add
        ];
        let next = map_difference(&current, &delta);
        assert_eq!(
            Datum::Map(next.clone()),
            Datum::Map(vec![
                (Atom::from("x"), Atom::from("2")),
                (Atom::from("new"), Atom::from("n")),
            ])
        );

        // Double application is not an involution once a key was replaced:
        // the second pass sees the replaced value as equal and removes the
        // pair. Only the removed key comes back.
        let back = map_difference(&next, &delta);
        assert_eq!(
            Datum::Map(back),
            Datum::Map(vec![(Atom::from("k"), Atom::from("v"))])
        );
    }

    #[test]
    fn scalar_diff_replaces() {
        let (next, changed) =
            Datum::Scalar(Atom::Integer(1)).apply_diff(&Datum::Scalar(Atom::Integer(2)));
        assert_eq!(next, Datum::Scalar(Atom::Integer(2)));
        assert!(changed);

        let (_, changed) =
            Datum::Scalar(Atom::Integer(2)).apply_diff(&Datum::Scalar(Atom::Integer(2)));
        assert!(!changed);
    }

    #[test]
    fn cardinality_constraints() {
        let ty: ColumnType =
            serde_json::from_value(json!({"key": "string", "min": 1, "max": 2})).unwrap();
        assert!(Datum::Set(vec![Atom::from("a")])
            .check_constraints("tags", &ty)
            .is_ok());
        assert!(Datum::Set(vec![]).check_constraints("tags", &ty).is_err());
        assert!(Datum::Set(vec![Atom::from("a"), Atom::from("b"), Atom::from("c")])
            .check_constraints("tags", &ty)
            .is_err());
    }

    #[test]
    fn enum_and_range_constraints() {
        let proto: ColumnType = serde_json::from_value(json!({
            "key": {"type": "string", "enum": ["set", ["tcp", "udp"]]}
        }))
        .unwrap();
        assert!(Datum::Scalar(Atom::from("tcp"))
            .check_constraints("protocol", &proto)
            .is_ok());
        assert!(Datum::Scalar(Atom::from("icmp"))
            .check_constraints("protocol", &proto)
            .is_err());

        let vlan: ColumnType = serde_json::from_value(json!({
            "key": {"type": "integer", "minInteger": 0, "maxInteger": 4095}
        }))
        .unwrap();
        assert!(Datum::Scalar(Atom::Integer(4095))
            .check_constraints("vlan", &vlan)
            .is_ok());
        assert!(Datum::Scalar(Atom::Integer(4096))
            .check_constraints("vlan", &vlan)
            .is_err());
    }

    #[test]
    fn multiset_equality() {
        let a = Datum::Set(vec![Atom::from("a"), Atom::from("b")]);
        let b = Datum::Set(vec![Atom::from("b"), Atom::from("a")]);
        assert_eq!(a, b);
    }

    #[test]
    fn diff_then_apply_restores_target() {
        let cases = [
            (
                Datum::Set(vec![Atom::from("a"), Atom::from("b")]),
                Datum::Set(vec![Atom::from("b"), Atom::from("c")]),
            ),
            (
                Datum::Map(vec![
                    (Atom::from("team"), Atom::from("a")),
                    (Atom::from("role"), Atom::from("x")),
                ]),
                Datum::Map(vec![
                    (Atom::from("team"), Atom::from("b")),
                    (Atom::from("rank"), Atom::from("1")),
                ]),
            ),
            (
                Datum::Scalar(Atom::Integer(1)),
                Datum::Scalar(Atom::Integer(2)),
            ),
        ];
        for (old, new) in cases {
            let delta = old.diff(&new).unwrap();
            let (applied, changed) = old.apply_diff(&delta);
            assert!(changed);
            assert_eq!(applied, new);
        }
    }

    #[test]
    fn diff_of_equal_values_is_none() {
        let a = Datum::Set(vec![Atom::from("a")]);
        let b = Datum::Set(vec![Atom::from("a")]);
        assert_eq!(a.diff(&b), None);
    }
}
