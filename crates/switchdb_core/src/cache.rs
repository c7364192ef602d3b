//! The monitor-fed row cache: per-table stores, secondary indexes, the
//! reference graph, and garbage collection.
//!
//! All mutation flows through [`Cache::apply_updates`], which stages a
//! whole notification batch, validates it, and commits atomically. Readers
//! take the outer gate in shared mode plus the per-table lock, so reads on
//! different tables never exclude each other.

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventKind, EventSink};
use crate::model::Model;
use crate::registry::DatabaseModel;
use crate::update::{
    self, apply_row_diff, row_diff, RowChange, RowData, WireRowChange,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use switchdb_codec::{Atom, Datum};
use switchdb_protocol::UpdateBatch;
use switchdb_schema::RefStrength;
use tracing::{debug, trace};
use uuid::Uuid;

/// A reference-bearing column of a cached table.
#[derive(Debug, Clone)]
struct RefColumn {
    column: String,
    to_table: String,
    strength: RefStrength,
    /// The reference sits in map values rather than in keys or elements.
    in_value: bool,
}

#[derive(Debug, Clone)]
struct IndexStore {
    columns: Vec<String>,
    map: HashMap<String, Uuid>,
}

#[derive(Debug, Clone, Default)]
struct TableStore {
    rows: HashMap<Uuid, RowData>,
    indexes: Vec<IndexStore>,
}

/// Incoming reference edges, keyed the way cleanup consumes them:
/// (referenced table, referring table, referring column) → referenced row
/// → referring rows.
#[derive(Debug, Clone, Default)]
struct ReferenceGraph {
    edges: HashMap<(String, String, String), HashMap<Uuid, HashSet<Uuid>>>,
}

impl ReferenceGraph {
    fn add(&mut self, to_table: &str, from_table: &str, column: &str, to: Uuid, from: Uuid) {
        self.edges
            .entry((
                to_table.to_string(),
                from_table.to_string(),
                column.to_string(),
            ))
            .or_default()
            .entry(to)
            .or_default()
            .insert(from);
    }

    fn remove(&mut self, to_table: &str, from_table: &str, column: &str, to: Uuid, from: Uuid) {
        let key = (
            to_table.to_string(),
            from_table.to_string(),
            column.to_string(),
        );
        if let Some(targets) = self.edges.get_mut(&key) {
            if let Some(referrers) = targets.get_mut(&to) {
                referrers.remove(&from);
                if referrers.is_empty() {
                    targets.remove(&to);
                }
            }
            if targets.is_empty() {
                self.edges.remove(&key);
            }
        }
    }

    /// Every (from table, from column, from row) referring to `to`.
    fn referrers(&self, to_table: &str, to: Uuid) -> Vec<(String, String, Uuid)> {
        let mut out = Vec::new();
        for ((tt, ft, fc), targets) in &self.edges {
            if tt != to_table {
                continue;
            }
            if let Some(referrers) = targets.get(&to) {
                for from in referrers {
                    out.push((ft.clone(), fc.clone(), *from));
                }
            }
        }
        out.sort();
        out
    }
}

/// The in-memory replica of the monitored tables.
pub struct Cache {
    db: DatabaseModel,
    gate: RwLock<()>,
    tables: BTreeMap<String, RwLock<TableStore>>,
    graph: Mutex<ReferenceGraph>,
    ref_columns: BTreeMap<String, Vec<RefColumn>>,
    events: Option<EventSink>,
}

impl Cache {
    /// Builds an empty cache covering every registered table.
    pub fn new(db: DatabaseModel, events: Option<EventSink>) -> CoreResult<Self> {
        let mut tables = BTreeMap::new();
        let mut ref_columns = BTreeMap::new();

        let names: Vec<&'static str> = db.registry().tables().collect();
        for name in names {
            let table = db.table(name)?;
            let indexes = table
                .valid_indexes()
                .map(|columns| IndexStore {
                    columns: columns.to_vec(),
                    map: HashMap::new(),
                })
                .collect();
            tables.insert(
                name.to_string(),
                RwLock::new(TableStore {
                    rows: HashMap::new(),
                    indexes,
                }),
            );

            let mut refs = Vec::new();
            for column_name in table.column_names() {
                let Some(column) = table.column(column_name) else {
                    continue;
                };
                if let Some(to_table) = &column.ty.key.ref_table {
                    refs.push(RefColumn {
                        column: column_name.to_string(),
                        to_table: to_table.clone(),
                        strength: column.ty.key.ref_type,
                        in_value: false,
                    });
                }
                if let Some(value) = &column.ty.value {
                    if let Some(to_table) = &value.ref_table {
                        refs.push(RefColumn {
                            column: column_name.to_string(),
                            to_table: to_table.clone(),
                            strength: value.ref_type,
                            in_value: true,
                        });
                    }
                }
            }
            ref_columns.insert(name.to_string(), refs);
        }

        Ok(Self {
            db,
            gate: RwLock::new(()),
            tables,
            graph: Mutex::new(ReferenceGraph::default()),
            ref_columns,
            events,
        })
    }

    /// The validated model this cache serves.
    pub fn database_model(&self) -> &DatabaseModel {
        &self.db
    }

    /// Looks up one row by identifier.
    pub fn row(&self, table: &str, id: Uuid) -> CoreResult<Option<Box<dyn Model>>> {
        let _gate = self.gate.read();
        let store = self.store(table)?.read();
        store
            .rows
            .get(&id)
            .map(|data| self.model_of(table, id, data))
            .transpose()
    }

    /// Looks up one row through a declared schema index.
    pub fn row_by_index(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Datum],
    ) -> CoreResult<Option<Box<dyn Model>>> {
        let _gate = self.gate.read();
        let store = self.store(table)?.read();
        let index = store
            .indexes
            .iter()
            .find(|ix| ix.columns.iter().map(String::as_str).eq(columns.iter().copied()))
            .ok_or_else(|| CoreError::IndexUnavailable {
                table: table.to_string(),
            })?;
        let key = canonical_key(values);
        index
            .map
            .get(&key)
            .and_then(|id| store.rows.get(id).map(|data| (*id, data)))
            .map(|(id, data)| self.model_of(table, id, data))
            .transpose()
    }

    /// A snapshot of the identifiers currently held for `table`.
    pub fn rows(&self, table: &str) -> CoreResult<Vec<Uuid>> {
        let _gate = self.gate.read();
        let store = self.store(table)?.read();
        let mut ids: Vec<Uuid> = store.rows.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    /// Identifiers of the rows a predicate accepts, evaluated on the live
    /// cache under the shared gate. The predicate must not call back into
    /// the cache.
    pub fn matching_rows(
        &self,
        table: &str,
        predicate: &mut dyn FnMut(&dyn Model) -> bool,
    ) -> CoreResult<Vec<Uuid>> {
        let _gate = self.gate.read();
        let store = self.store(table)?.read();
        let mut ids: Vec<Uuid> = store.rows.keys().copied().collect();
        ids.sort();
        let mut out = Vec::new();
        for id in ids {
            let data = &store.rows[&id];
            let model = self.model_of(table, id, data)?;
            if predicate(model.as_ref()) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Drops every cached row and edge. Used on resynchronisation; emits
    /// no events.
    pub fn clear(&self) {
        let _gate = self.gate.write();
        for store in self.tables.values() {
            let mut store = store.write();
            store.rows.clear();
            for index in &mut store.indexes {
                index.map.clear();
            }
        }
        *self.graph.lock() = ReferenceGraph::default();
    }

    /// Applies one monitor notification batch atomically.
    ///
    /// On any error nothing is committed and no events are emitted; a
    /// [`CoreError::CacheInconsistent`] tells the client to resynchronise.
    pub fn apply_updates(&self, batch: &UpdateBatch) -> CoreResult<()> {
        let _gate = self.gate.write();

        // Phase 1: translate wire rows into logical changes against the
        // state the cache currently holds.
        let mut pending: BTreeMap<(String, Uuid), RowChange> = BTreeMap::new();
        for table_name in batch.table_names() {
            let Some(store_lock) = self.tables.get(table_name) else {
                trace!(table = table_name, "ignoring update for untracked table");
                continue;
            };
            let table = self.db.table(table_name)?;
            let store = store_lock.read();

            let mut translate = |id: &str, wire: WireRowChange| -> CoreResult<()> {
                let id = Uuid::try_parse(id).map_err(|_| CoreError::CacheInconsistent {
                    message: format!("row key {id:?} in table {table_name:?} is not a uuid"),
                })?;
                let current = store.rows.get(&id);
                let change = match translate_change(table_name, id, current, wire)? {
                    Some(change) => change,
                    None => return Ok(()),
                };
                let key = (table_name.to_string(), id);
                let prior = pending.remove(&key);
                if let Some(merged) = update::merge(prior, change)? {
                    pending.insert(key, merged);
                }
                Ok(())
            };

            match batch {
                UpdateBatch::Classic(tables) => {
                    for (id, row) in &tables[table_name] {
                        translate(id, update::classify_classic(table, table_name, row)?)?;
                    }
                }
                UpdateBatch::Differential(tables) => {
                    for (id, row) in &tables[table_name] {
                        translate(id, update::classify_differential(table, table_name, row)?)?;
                    }
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        // Staged view of the post-batch state: None marks a removal.
        let mut overlay: BTreeMap<(String, Uuid), Option<RowData>> = pending
            .iter()
            .map(|(key, change)| (key.clone(), change.new_state()))
            .collect();

        // Phase 2: reference-graph maintenance on a staging copy.
        let mut graph = self.graph.lock().clone();
        for ((table, id), change) in &pending {
            self.update_edges(
                &mut graph,
                table,
                *id,
                change.old_state(),
                overlay[&(table.clone(), *id)].as_ref(),
            );
        }

        // Phase 3: strong references must resolve in the post-batch state.
        self.check_strong_refs(&graph, &overlay)?;

        // Phase 4: mark/sweep from the root set, then weak-reference
        // cleanup for everything that went away.
        self.collect_garbage(&mut graph, &mut overlay)?;
        self.clean_weak_refs(&mut graph, &mut overlay)?;

        // Index maintenance, staged per touched table; a clash aborts the
        // whole batch.
        let staged_indexes = self.stage_indexes(&overlay)?;

        // Pre-images must be captured before the stores change.
        let mut pre_states: BTreeMap<(String, Uuid), Option<RowData>> = BTreeMap::new();
        for ((table, id), _) in &overlay {
            let old = match pending.get(&(table.clone(), *id)) {
                Some(change) => change.old_state().cloned(),
                None => self
                    .tables
                    .get(table)
                    .and_then(|s| s.read().rows.get(id).cloned()),
            };
            pre_states.insert((table.clone(), *id), old);
        }

        // Commit.
        for ((table, id), state) in &overlay {
            let mut store = self
                .tables
                .get(table)
                .ok_or_else(|| CoreError::UnknownTable {
                    table: table.clone(),
                })?
                .write();
            match state {
                Some(data) => {
                    store.rows.insert(*id, data.clone());
                }
                None => {
                    store.rows.remove(id);
                }
            }
        }
        for (table, indexes) in staged_indexes {
            let mut store = self
                .tables
                .get(&table)
                .ok_or_else(|| CoreError::UnknownTable { table })?
                .write();
            store.indexes = indexes;
        }
        *self.graph.lock() = graph;

        // Phase 5: events, in table-then-row order.
        self.emit_events(&overlay, &pre_states)?;
        debug!(rows = overlay.len(), "applied update batch");
        Ok(())
    }

    fn store(&self, table: &str) -> CoreResult<&RwLock<TableStore>> {
        self.tables
            .get(table)
            .ok_or_else(|| CoreError::ModelNotRegistered {
                table: table.to_string(),
            })
    }

    fn model_of(&self, table: &str, id: Uuid, data: &RowData) -> CoreResult<Box<dyn Model>> {
        let entry = self.db.entry(table)?;
        let mut model = entry.instantiate();
        model.set_uuid(id)?;
        for (column, datum) in data {
            if entry.field(column).is_some() {
                model.set_datum(column, datum.clone())?;
            }
        }
        Ok(model)
    }

    fn update_edges(
        &self,
        graph: &mut ReferenceGraph,
        table: &str,
        id: Uuid,
        old: Option<&RowData>,
        new: Option<&RowData>,
    ) {
        let Some(refs) = self.ref_columns.get(table) else {
            return;
        };
        for rc in refs {
            let before = old
                .and_then(|d| d.get(&rc.column))
                .map(|d| ref_targets(rc, d))
                .unwrap_or_default();
            let after = new
                .and_then(|d| d.get(&rc.column))
                .map(|d| ref_targets(rc, d))
                .unwrap_or_default();
            for gone in before.difference(&after) {
                graph.remove(&rc.to_table, table, &rc.column, *gone, id);
            }
            for came in after.difference(&before) {
                graph.add(&rc.to_table, table, &rc.column, *came, id);
            }
        }
    }

    /// Whether `(table, id)` exists in the post-batch state.
    fn lives(
        &self,
        overlay: &BTreeMap<(String, Uuid), Option<RowData>>,
        table: &str,
        id: Uuid,
    ) -> bool {
        match overlay.get(&(table.to_string(), id)) {
            Some(state) => state.is_some(),
            None => self
                .tables
                .get(table)
                .map(|s| s.read().rows.contains_key(&id))
                .unwrap_or(false),
        }
    }

    fn check_strong_refs(
        &self,
        graph: &ReferenceGraph,
        overlay: &BTreeMap<(String, Uuid), Option<RowData>>,
    ) -> CoreResult<()> {
        // New and changed rows must not point at absent targets.
        for ((table, id), state) in overlay {
            let Some(data) = state else { continue };
            let Some(refs) = self.ref_columns.get(table) else {
                continue;
            };
            for rc in refs {
                if rc.strength != RefStrength::Strong || !self.tables.contains_key(&rc.to_table) {
                    continue;
                }
                let Some(datum) = data.get(&rc.column) else {
                    continue;
                };
                for target in ref_targets(rc, datum) {
                    if !self.lives(overlay, &rc.to_table, target) {
                        return Err(CoreError::ReferentialIntegrityViolation {
                            message: format!(
                                "{table}.{} in row {id} points at missing {}/{target}",
                                rc.column, rc.to_table
                            ),
                        });
                    }
                }
            }
        }

        // Deleted rows must not leave live strong referrers behind.
        for ((table, id), state) in overlay {
            if state.is_some() {
                continue;
            }
            for (from_table, from_column, from_id) in graph.referrers(table, *id) {
                if !self.lives(overlay, &from_table, from_id) {
                    continue;
                }
                if self.ref_strength(&from_table, &from_column) == Some(RefStrength::Strong) {
                    return Err(CoreError::ReferentialIntegrityViolation {
                        message: format!(
                            "{from_table}.{from_column} in row {from_id} still points at \
                             deleted {table}/{id}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn ref_strength(&self, table: &str, column: &str) -> Option<RefStrength> {
        self.ref_columns
            .get(table)?
            .iter()
            .find(|rc| rc.column == column)
            .map(|rc| rc.strength)
    }

    /// Removes every row of a non-root table that no live row strongly
    /// reaches from the root set. Cascades fall out of the single mark
    /// pass: an unmarked row never marks anything.
    fn collect_garbage(
        &self,
        graph: &mut ReferenceGraph,
        overlay: &mut BTreeMap<(String, Uuid), Option<RowData>>,
    ) -> CoreResult<()> {
        // Post-state universe.
        let mut live: BTreeMap<(String, Uuid), RowData> = BTreeMap::new();
        for (name, store) in &self.tables {
            for (id, data) in &store.read().rows {
                live.insert((name.clone(), *id), data.clone());
            }
        }
        for (key, state) in overlay.iter() {
            match state {
                Some(data) => {
                    live.insert(key.clone(), data.clone());
                }
                None => {
                    live.remove(key);
                }
            }
        }

        let schema = self.db.schema();
        let mut marked: HashSet<(String, Uuid)> = HashSet::new();
        let mut worklist: Vec<(String, Uuid)> = live
            .keys()
            .filter(|(table, _)| schema.is_root(table))
            .cloned()
            .collect();
        while let Some(key) = worklist.pop() {
            if !marked.insert(key.clone()) {
                continue;
            }
            let Some(data) = live.get(&key) else { continue };
            let Some(refs) = self.ref_columns.get(&key.0) else {
                continue;
            };
            for rc in refs {
                if rc.strength != RefStrength::Strong {
                    continue;
                }
                let Some(datum) = data.get(&rc.column) else {
                    continue;
                };
                for target in ref_targets(rc, datum) {
                    let target_key = (rc.to_table.clone(), target);
                    if live.contains_key(&target_key) && !marked.contains(&target_key) {
                        worklist.push(target_key);
                    }
                }
            }
        }

        for (key, data) in &live {
            if schema.is_root(&key.0) || marked.contains(key) {
                continue;
            }
            trace!(table = %key.0, uuid = %key.1, "collecting unreferenced row");
            self.update_edges(graph, &key.0, key.1, Some(data), None);
            overlay.insert(key.clone(), None);
        }
        Ok(())
    }

    /// Strips weak references that point at rows absent from the post
    /// state. Weak edges never affect strong reachability, so one pass
    /// after the sweep suffices.
    fn clean_weak_refs(
        &self,
        graph: &mut ReferenceGraph,
        overlay: &mut BTreeMap<(String, Uuid), Option<RowData>>,
    ) -> CoreResult<()> {
        let removed: Vec<(String, Uuid)> = overlay
            .iter()
            .filter(|(_, state)| state.is_none())
            .map(|(key, _)| key.clone())
            .collect();

        for (table, id) in removed {
            for (from_table, from_column, from_id) in graph.referrers(&table, id) {
                if self.ref_strength(&from_table, &from_column) != Some(RefStrength::Weak) {
                    continue;
                }
                if !self.lives(overlay, &from_table, from_id) {
                    continue;
                }
                let key = (from_table.clone(), from_id);
                let mut data = match overlay.get(&key) {
                    Some(Some(data)) => data.clone(),
                    Some(None) => continue,
                    None => match self
                        .tables
                        .get(&from_table)
                        .and_then(|s| s.read().rows.get(&from_id).cloned())
                    {
                        Some(data) => data,
                        None => continue,
                    },
                };
                let Some(datum) = data.get(&from_column) else {
                    continue;
                };
                let cleaned = strip_reference(datum, id);
                if &cleaned == datum {
                    continue;
                }

                let column = self
                    .db
                    .table(&from_table)?
                    .column_or_err(&from_table, &from_column)?;
                cleaned
                    .check_constraints(&from_column, &column.ty)
                    .map_err(|e| CoreError::ConstraintViolation {
                        message: format!(
                            "weak cleanup on {from_table}.{from_column} in row {from_id}: {e}"
                        ),
                    })?;

                graph.remove(&table, &from_table, &from_column, id, from_id);
                data.insert(from_column.clone(), cleaned);
                overlay.insert(key, Some(data));
            }
        }
        Ok(())
    }

    fn stage_indexes(
        &self,
        overlay: &BTreeMap<(String, Uuid), Option<RowData>>,
    ) -> CoreResult<BTreeMap<String, Vec<IndexStore>>> {
        let mut staged: BTreeMap<String, Vec<IndexStore>> = BTreeMap::new();
        for ((table_name, id), state) in overlay {
            if !staged.contains_key(table_name) {
                let store = self.store(table_name)?.read();
                staged.insert(table_name.clone(), store.indexes.clone());
            }
            let table = self.db.table(table_name)?;
            let store = self.store(table_name)?.read();
            let indexes = staged
                .get_mut(table_name)
                .ok_or_else(|| CoreError::UnknownTable {
                    table: table_name.clone(),
                })?;
            for index in indexes.iter_mut() {
                if let Some(old_data) = store.rows.get(id) {
                    let old_key = index_key_of(table, index, old_data);
                    if index.map.get(&old_key) == Some(id) {
                        index.map.remove(&old_key);
                    }
                }
                if let Some(data) = state {
                    let key = index_key_of(table, index, data);
                    if let Some(holder) = index.map.get(&key) {
                        if holder != id {
                            return Err(CoreError::IndexClash {
                                table: table_name.clone(),
                                index: index.columns.clone(),
                            });
                        }
                    }
                    index.map.insert(key, *id);
                }
            }
        }
        Ok(staged)
    }

    fn emit_events(
        &self,
        overlay: &BTreeMap<(String, Uuid), Option<RowData>>,
        pre_states: &BTreeMap<(String, Uuid), Option<RowData>>,
    ) -> CoreResult<()> {
        let Some(sink) = &self.events else {
            return Ok(());
        };
        for ((table, id), state) in overlay {
            let old_data = pre_states
                .get(&(table.clone(), *id))
                .cloned()
                .unwrap_or(None);
            let (kind, old, new) = match (&old_data, state) {
                (None, Some(data)) => (
                    EventKind::Add,
                    None,
                    Some(self.model_of(table, *id, data)?),
                ),
                (Some(old), Some(data)) => (
                    EventKind::Update,
                    Some(self.model_of(table, *id, old)?),
                    Some(self.model_of(table, *id, data)?),
                ),
                (Some(old), None) => (
                    EventKind::Delete,
                    Some(self.model_of(table, *id, old)?),
                    None,
                ),
                (None, None) => continue,
            };
            sink.post(Event {
                kind,
                table: table.clone(),
                uuid: *id,
                old,
                new,
            });
        }
        Ok(())
    }
}

/// Translates one wire change against the currently held state, checking
/// old-state agreement. `None` means the change is a no-op.
fn translate_change(
    table_name: &str,
    id: Uuid,
    current: Option<&RowData>,
    wire: WireRowChange,
) -> CoreResult<Option<RowChange>> {
    match wire {
        WireRowChange::Insert(new) => {
            if current.is_some() {
                return Err(CoreError::CacheInconsistent {
                    message: format!("insert for already-cached row {id} in {table_name:?}"),
                });
            }
            Ok(Some(RowChange::Insert { new }))
        }
        WireRowChange::Modify { old, new } => {
            let current = current.ok_or_else(|| CoreError::CacheInconsistent {
                message: format!("modify for unknown row {id} in {table_name:?}"),
            })?;
            for (column, reported) in &old {
                let held = current
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| update::default_like(reported));
                if &held != reported {
                    return Err(CoreError::CacheInconsistent {
                        message: format!(
                            "pre-image of {table_name}.{column} in row {id} disagrees with \
                             the cache"
                        ),
                    });
                }
            }
            let mut next = current.clone();
            next.extend(new);
            let diff = row_diff(current, &next);
            if diff.is_empty() {
                return Ok(None);
            }
            Ok(Some(RowChange::Update {
                old: current.clone(),
                diff,
            }))
        }
        WireRowChange::Diff(diff) => {
            let current = current.ok_or_else(|| CoreError::CacheInconsistent {
                message: format!("modify for unknown row {id} in {table_name:?}"),
            })?;
            let (_, changed) = apply_row_diff(current, &diff);
            if changed.is_empty() {
                return Ok(None);
            }
            let diff = diff
                .into_iter()
                .filter(|(column, _)| changed.contains(column))
                .collect();
            Ok(Some(RowChange::Update {
                old: current.clone(),
                diff,
            }))
        }
        WireRowChange::Delete(reported) => {
            let current = current.ok_or_else(|| CoreError::CacheInconsistent {
                message: format!("delete for unknown row {id} in {table_name:?}"),
            })?;
            if let Some(reported) = reported {
                for (column, value) in &reported {
                    let held = current
                        .get(column)
                        .cloned()
                        .unwrap_or_else(|| update::default_like(value));
                    if &held != value {
                        return Err(CoreError::CacheInconsistent {
                            message: format!(
                                "pre-image of {table_name}.{column} in deleted row {id} \
                                 disagrees with the cache"
                            ),
                        });
                    }
                }
            }
            Ok(Some(RowChange::Delete {
                old: current.clone(),
            }))
        }
    }
}

/// Identifier targets a reference column's value points at.
fn ref_targets(rc: &RefColumn, datum: &Datum) -> HashSet<Uuid> {
    let atoms: Vec<&Atom> = match (rc.in_value, datum) {
        (false, Datum::Map(pairs)) => pairs.iter().map(|(k, _)| k).collect(),
        (true, Datum::Map(pairs)) => pairs.iter().map(|(_, v)| v).collect(),
        (true, _) => Vec::new(),
        (false, other) => other.atoms(),
    };
    atoms.into_iter().filter_map(atom_uuid).collect()
}

fn atom_uuid(atom: &Atom) -> Option<Uuid> {
    match atom {
        Atom::Uuid(id) => Some(*id),
        Atom::Str(s) => Uuid::try_parse(s).ok(),
        _ => None,
    }
}

/// Removes every atom resolving to `id` from a reference-holding value.
fn strip_reference(datum: &Datum, id: Uuid) -> Datum {
    let hits = |atom: &Atom| atom_uuid(atom) == Some(id);
    match datum {
        Datum::Scalar(a) if hits(a) => Datum::Optional(None),
        Datum::Optional(Some(a)) if hits(a) => Datum::Optional(None),
        Datum::Set(elems) => Datum::Set(elems.iter().filter(|a| !hits(a)).cloned().collect()),
        Datum::Map(pairs) => Datum::Map(
            pairs
                .iter()
                .filter(|(k, v)| !hits(k) && !hits(v))
                .cloned()
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Canonical text key for an index tuple. Sets and maps are sorted so that
/// multiset-equal values key identically.
fn canonical_key(values: &[Datum]) -> String {
    fn atom_token(atom: &Atom, out: &mut String) {
        match atom {
            Atom::Integer(n) => out.push_str(&format!("i{n}")),
            Atom::Real(r) => out.push_str(&format!("r{}", r.to_bits())),
            Atom::Boolean(b) => out.push_str(&format!("b{b}")),
            Atom::Str(s) => out.push_str(&format!("s{}:{s}", s.len())),
            Atom::Uuid(u) => out.push_str(&format!("u{u}")),
            Atom::NamedUuid(n) => out.push_str(&format!("n{}:{n}", n.len())),
        }
    }

    let mut out = String::new();
    for value in values {
        out.push('|');
        match value {
            Datum::Scalar(a) => atom_token(a, &mut out),
            Datum::Optional(None) => out.push('-'),
            Datum::Optional(Some(a)) => atom_token(a, &mut out),
            Datum::Set(elems) => {
                let mut sorted: Vec<&Atom> = elems.iter().collect();
                sorted.sort();
                for a in sorted {
                    out.push(',');
                    atom_token(a, &mut out);
                }
            }
            Datum::Map(pairs) => {
                let mut sorted: Vec<&(Atom, Atom)> = pairs.iter().collect();
                sorted.sort();
                for (k, v) in sorted {
                    out.push(',');
                    atom_token(k, &mut out);
                    out.push('=');
                    atom_token(v, &mut out);
                }
            }
        }
    }
    out
}

fn index_key_of(
    table: &switchdb_schema::TableSchema,
    index: &IndexStore,
    data: &RowData,
) -> String {
    let values: Vec<Datum> = index
        .columns
        .iter()
        .map(|column| {
            data.get(column).cloned().unwrap_or_else(|| {
                table
                    .column(column)
                    .map(|c| Datum::default_of(&c.ty))
                    .unwrap_or(Datum::Optional(None))
            })
        })
        .collect();
    canonical_key(&values)
}
