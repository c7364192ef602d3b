//! Monitor-update translation and diff merging.
//!
//! Wire notifications arrive in two dialects. Both reduce to the same
//! local vocabulary here: a [`RowData`] map of decoded column values and a
//! [`RowChange`] describing one row's transition. The cache consumes these;
//! this module owns the pure diff algebra.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use switchdb_codec::{Atom, Datum};
use switchdb_protocol::{Row, RowUpdate, RowUpdate2};
use switchdb_schema::{TableSchema, UUID_COLUMN, VERSION_COLUMN};
use tracing::trace;
use uuid::Uuid;

/// A decoded row: column name to decoded value.
pub type RowData = BTreeMap<String, Datum>;

/// One row's wire change, dialect differences already erased.
#[derive(Debug, Clone, PartialEq)]
pub enum WireRowChange {
    /// A row new to the monitor, with its full contents.
    Insert(RowData),
    /// Classic modify: changed pre-values and the full new contents.
    Modify {
        /// The previous values of the columns that changed.
        old: RowData,
        /// The complete new row.
        new: RowData,
    },
    /// Differential modify: per-column symmetric differences.
    Diff(RowData),
    /// A removed row, with its pre-image when the server sent one.
    Delete(Option<RowData>),
}

/// Decodes the known columns of a wire row. The `_uuid` and `_version`
/// columns are skipped (row identity travels outside the row); columns the
/// schema does not know are skipped with a trace.
pub fn decode_row(table: &TableSchema, table_name: &str, row: &Row) -> CoreResult<RowData> {
    let mut data = RowData::new();
    for (name, wire) in row {
        if name == UUID_COLUMN || name == VERSION_COLUMN {
            continue;
        }
        let Some(column) = table.column(name) else {
            trace!(table = table_name, column = %name, "ignoring unknown wire column");
            continue;
        };
        data.insert(name.clone(), Datum::decode(wire, &column.ty)?);
    }
    Ok(data)
}

/// Classifies a classic-dialect row change. An empty or absent `old` means
/// insert, an empty or absent `new` means delete; both empty is undecidable
/// and fails rather than guessing.
pub fn classify_classic(
    table: &TableSchema,
    table_name: &str,
    update: &RowUpdate,
) -> CoreResult<WireRowChange> {
    let old = update.old.as_ref().filter(|r| !r.is_empty());
    let new = update.new.as_ref().filter(|r| !r.is_empty());
    match (old, new) {
        (None, Some(new)) => Ok(WireRowChange::Insert(decode_row(table, table_name, new)?)),
        (Some(old), None) => Ok(WireRowChange::Delete(Some(decode_row(
            table, table_name, old,
        )?))),
        (Some(old), Some(new)) => Ok(WireRowChange::Modify {
            old: decode_row(table, table_name, old)?,
            new: decode_row(table, table_name, new)?,
        }),
        (None, None) => Err(CoreError::CacheInconsistent {
            message: format!("row update for table {table_name:?} has neither old nor new"),
        }),
    }
}

/// Classifies a differential-dialect row change. Exactly one of the four
/// fields must be present.
pub fn classify_differential(
    table: &TableSchema,
    table_name: &str,
    update: &RowUpdate2,
) -> CoreResult<WireRowChange> {
    let present = [
        update.initial.is_some(),
        update.insert.is_some(),
        update.delete.is_some(),
        update.modify.is_some(),
    ]
    .into_iter()
    .filter(|p| *p)
    .count();
    if present != 1 {
        return Err(CoreError::CacheInconsistent {
            message: format!(
                "differential row update for table {table_name:?} carries {present} change kinds"
            ),
        });
    }

    if let Some(row) = update.initial.as_ref().or(update.insert.as_ref()) {
        return Ok(WireRowChange::Insert(decode_row(table, table_name, row)?));
    }
    if let Some(row) = &update.modify {
        return Ok(WireRowChange::Diff(decode_row(table, table_name, row)?));
    }
    let old = match &update.delete {
        Some(row) if !row.is_empty() => Some(decode_row(table, table_name, row)?),
        _ => None,
    };
    Ok(WireRowChange::Delete(old))
}

/// One row's logical transition, relative to the state the cache held.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// The row appears.
    Insert {
        /// The full new contents.
        new: RowData,
    },
    /// The row changes.
    Update {
        /// The full pre-image.
        old: RowData,
        /// Per-column differences, as consumed by [`Datum::apply_diff`].
        diff: RowData,
    },
    /// The row disappears.
    Delete {
        /// The full pre-image.
        old: RowData,
    },
}

impl RowChange {
    /// The row's state after this change; `None` when deleted.
    pub fn new_state(&self) -> Option<RowData> {
        match self {
            RowChange::Insert { new } => Some(new.clone()),
            RowChange::Update { old, diff } => Some(apply_row_diff(old, diff).0),
            RowChange::Delete { .. } => None,
        }
    }

    /// The row's state before this change; `None` when it did not exist.
    pub fn old_state(&self) -> Option<&RowData> {
        match self {
            RowChange::Insert { .. } => None,
            RowChange::Update { old, .. } | RowChange::Delete { old } => Some(old),
        }
    }
}

/// Folds a per-column diff into a row, returning the new row and the
/// columns whose values actually changed.
pub fn apply_row_diff(current: &RowData, diff: &RowData) -> (RowData, Vec<String>) {
    let mut next = current.clone();
    let mut changed = Vec::new();
    for (column, delta) in diff {
        let base = current
            .get(column)
            .cloned()
            .unwrap_or_else(|| default_like(delta));
        let (value, did_change) = base.apply_diff(delta);
        if did_change {
            changed.push(column.clone());
        }
        next.insert(column.clone(), value);
    }
    (next, changed)
}

/// Per-column differences turning `old` into `new`. Columns absent on one
/// side are diffed against the shape's default.
pub fn row_diff(old: &RowData, new: &RowData) -> RowData {
    let mut diff = RowData::new();
    for (column, value) in new {
        let base = old
            .get(column)
            .cloned()
            .unwrap_or_else(|| default_like(value));
        if let Some(delta) = base.diff(value) {
            diff.insert(column.clone(), delta);
        }
    }
    for (column, value) in old {
        if !new.contains_key(column) {
            if let Some(delta) = value.diff(&default_like(value)) {
                diff.insert(column.clone(), delta);
            }
        }
    }
    diff
}

/// Merges two successive changes to the same row into one.
///
/// `None` means the row has no pending change; a merge producing `None`
/// means the changes cancelled out. Sequences that cannot happen on a
/// consistent feed are rejected.
pub fn merge(first: Option<RowChange>, second: RowChange) -> CoreResult<Option<RowChange>> {
    let Some(first) = first else {
        return Ok(Some(second));
    };

    match (first, second) {
        (RowChange::Insert { .. }, RowChange::Insert { .. }) => Err(CoreError::IllegalSequence {
            message: "insert follows insert for the same row".to_string(),
        }),
        (RowChange::Insert { new }, RowChange::Update { diff, .. }) => {
            let (folded, _) = apply_row_diff(&new, &diff);
            Ok(Some(RowChange::Insert { new: folded }))
        }
        (RowChange::Insert { .. }, RowChange::Delete { .. }) => Ok(None),
        (RowChange::Update { old, diff: d1 }, RowChange::Update { diff: d2, .. }) => {
            let mut merged = d1;
            for (column, delta) in d2 {
                let folded = match merged.get(&column) {
                    Some(prior) => prior.apply_diff(&delta).0,
                    None => delta,
                };
                merged.insert(column, folded);
            }
            // A column whose folded diff restores the pre-image drops out.
            merged.retain(|column, delta| {
                let base = old
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| default_like(delta));
                base.apply_diff(delta).1
            });
            if merged.is_empty() {
                Ok(None)
            } else {
                Ok(Some(RowChange::Update { old, diff: merged }))
            }
        }
        (RowChange::Update { old, .. }, RowChange::Delete { .. }) => {
            Ok(Some(RowChange::Delete { old }))
        }
        (RowChange::Update { .. }, RowChange::Insert { .. }) => Err(CoreError::IllegalSequence {
            message: "insert follows update for the same row".to_string(),
        }),
        (RowChange::Delete { old }, RowChange::Insert { new }) => {
            let diff = row_diff(&old, &new);
            if diff.is_empty() {
                Ok(None)
            } else {
                Ok(Some(RowChange::Update { old, diff }))
            }
        }
        (RowChange::Delete { .. }, second) => Err(CoreError::IllegalSequence {
            message: format!(
                "{} follows delete for the same row",
                match second {
                    RowChange::Update { .. } => "update",
                    _ => "delete",
                }
            ),
        }),
    }
}

/// The zero value of the same shape and kind as `d`.
pub(crate) fn default_like(d: &Datum) -> Datum {
    match d {
        Datum::Scalar(Atom::Integer(_)) => Datum::Scalar(Atom::Integer(0)),
        Datum::Scalar(Atom::Real(_)) => Datum::Scalar(Atom::Real(0.0)),
        Datum::Scalar(Atom::Boolean(_)) => Datum::Scalar(Atom::Boolean(false)),
        Datum::Scalar(Atom::Uuid(_)) => Datum::Scalar(Atom::Uuid(Uuid::nil())),
        Datum::Scalar(_) => Datum::Scalar(Atom::Str(String::new())),
        Datum::Optional(_) => Datum::Optional(None),
        Datum::Set(_) => Datum::Set(Vec::new()),
        Datum::Map(_) => Datum::Map(Vec::new()),
    }
}
