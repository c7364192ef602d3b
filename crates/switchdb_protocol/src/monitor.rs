//! Monitor requests and server-pushed update batches.
//!
//! Two dialects exist. The classic `update` notification carries `{old,
//! new}` pairs per row; an absent `old` signals insertion and an absent
//! `new` signals deletion. The differential `update2` notification tags
//! each row `initial`, `insert`, `delete`, or `modify`, where `modify`
//! carries only the per-column symmetric difference.

use crate::op::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a monitor subscribes to for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRequest {
    /// Columns to monitor; all columns when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Which notification classes to receive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<MonitorSelect>,
}

impl MonitorRequest {
    /// Monitors the given columns with every notification class selected.
    pub fn columns(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
            select: None,
        }
    }
}

/// Notification classes a monitor subscribes to. All default to `true`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorSelect {
    /// Receive the current table contents in the monitor reply.
    #[serde(default = "yes")]
    pub initial: bool,
    /// Receive insert notifications.
    #[serde(default = "yes")]
    pub insert: bool,
    /// Receive delete notifications.
    #[serde(default = "yes")]
    pub delete: bool,
    /// Receive modify notifications.
    #[serde(default = "yes")]
    pub modify: bool,
}

fn yes() -> bool {
    true
}

impl Default for MonitorSelect {
    fn default() -> Self {
        Self {
            initial: true,
            insert: true,
            delete: true,
            modify: true,
        }
    }
}

/// One row's change in the classic dialect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowUpdate {
    /// The row's previous columns; absent on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Row>,
    /// The row's current columns; absent on delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Row>,
}

/// One row's change in the differential dialect. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowUpdate2 {
    /// Full row, sent once when the monitor starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<Row>,
    /// Full row of a new insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert: Option<Row>,
    /// Pre-image of a deleted row; servers may send `null` instead.
    #[serde(
        default,
        deserialize_with = "row_or_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub delete: Option<Row>,
    /// Per-column symmetric difference of a modified row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modify: Option<Row>,
}

/// A present-but-null row still means "this change class happened".
fn row_or_empty<'de, D>(deserializer: D) -> Result<Option<Row>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let row: Option<Row> = Option::deserialize(deserializer)?;
    Ok(Some(row.unwrap_or_default()))
}

/// A classic-dialect batch: table → row id → change.
pub type TableUpdates = HashMap<String, HashMap<String, RowUpdate>>;

/// A differential-dialect batch: table → row id → change.
pub type TableUpdates2 = HashMap<String, HashMap<String, RowUpdate2>>;

/// A batch in either dialect, as delivered by `update` or `update2`.
#[derive(Debug, Clone)]
pub enum UpdateBatch {
    /// Classic `{old, new}` rows.
    Classic(TableUpdates),
    /// Differential tagged rows.
    Differential(TableUpdates2),
}

impl UpdateBatch {
    /// Tables touched by this batch, in deterministic order.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match self {
            UpdateBatch::Classic(t) => t.keys().map(String::as_str).collect(),
            UpdateBatch::Differential(t) => t.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }

    /// Whether the batch carries no rows at all.
    pub fn is_empty(&self) -> bool {
        match self {
            UpdateBatch::Classic(t) => t.values().all(HashMap::is_empty),
            UpdateBatch::Differential(t) => t.values().all(HashMap::is_empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn monitor_request_shape() {
        let req = MonitorRequest::columns(vec!["name".into()]);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"columns": ["name"]})
        );
    }

    #[test]
    fn select_defaults_to_everything() {
        let sel: MonitorSelect = serde_json::from_value(json!({})).unwrap();
        assert!(sel.initial && sel.insert && sel.delete && sel.modify);

        let sel: MonitorSelect = serde_json::from_value(json!({"initial": false})).unwrap();
        assert!(!sel.initial && sel.insert);
    }

    #[test]
    fn classic_batch_parses() {
        let batch: TableUpdates = serde_json::from_value(json!({
            "Child": {
                "36bef046-7da7-43a5-905a-c17899216fcb": {"new": {"name": "c"}}
            }
        }))
        .unwrap();
        let row = &batch["Child"]["36bef046-7da7-43a5-905a-c17899216fcb"];
        assert!(row.old.is_none());
        assert_eq!(row.new.as_ref().unwrap()["name"], json!("c"));
    }

    #[test]
    fn differential_batch_parses() {
        let batch: TableUpdates2 = serde_json::from_value(json!({
            "Parent": {
                "86baf046-7da7-43a5-905a-c17899216fcb": {"modify": {"name": "q"}}
            }
        }))
        .unwrap();
        let row = &batch["Parent"]["86baf046-7da7-43a5-905a-c17899216fcb"];
        assert!(row.modify.is_some() && row.insert.is_none());
    }

    #[test]
    fn null_delete_still_counts_as_delete() {
        let batch: TableUpdates2 = serde_json::from_value(json!({
            "Child": {
                "36bef046-7da7-43a5-905a-c17899216fcb": {"delete": null}
            }
        }))
        .unwrap();
        let row = &batch["Child"]["36bef046-7da7-43a5-905a-c17899216fcb"];
        assert_eq!(row.delete.as_ref().map(|r| r.len()), Some(0));
    }

    #[test]
    fn batch_table_order_is_deterministic() {
        let mut tables: TableUpdates = HashMap::new();
        tables.insert("B".into(), HashMap::new());
        tables.insert("A".into(), HashMap::new());
        let batch = UpdateBatch::Classic(tables);
        assert_eq!(batch.table_names(), vec!["A", "B"]);
        assert!(batch.is_empty());
    }
}
