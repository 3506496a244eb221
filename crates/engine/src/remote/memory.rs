// In-process remote store for tests and offline embedding.
//
// Mirrors the constraints of the hosted tables: nodes reference an existing
// document and an existing parent, a node with children cannot be deleted,
// and every write stamps a server-side `updated_at` that strictly increases.
// Calls are journaled in order and failures can be injected per operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mindsync_common::time::{format_timestamp, now_utc};
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use super::{
    from_row, to_row, Filter, RemoteDocumentRow, RemoteError, RemoteErrorKind, RemoteNodeRow,
    RemoteStore, Table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Select,
    Upsert,
    Update,
    Delete,
}

impl RemoteOp {
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Select)
    }
}

/// One journaled call. `ids` are the row ids written, or the filter for reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub table: Table,
    pub ids: Vec<String>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    documents: BTreeMap<String, Value>,
    nodes: BTreeMap<String, Value>,
    last_stamp: Option<DateTime<Utc>>,
    calls: Vec<RemoteCall>,
    faults: VecDeque<(RemoteOp, RemoteError)>,
    latency: Option<Duration>,
}

impl RemoteState {
    fn rows(&self, table: Table) -> &BTreeMap<String, Value> {
        match table {
            Table::Documents => &self.documents,
            Table::Nodes => &self.nodes,
        }
    }

    fn rows_mut(&mut self, table: Table) -> &mut BTreeMap<String, Value> {
        match table {
            Table::Documents => &mut self.documents,
            Table::Nodes => &mut self.nodes,
        }
    }

    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = now_utc();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn take_fault(&mut self, op: RemoteOp) -> Option<RemoteError> {
        let index = self.faults.iter().position(|(target, _)| *target == op)?;
        self.faults.remove(index).map(|(_, error)| error)
    }

    fn record(&mut self, op: RemoteOp, table: Table, ids: Vec<String>, succeeded: bool) {
        trace!(?op, %table, ?ids, succeeded, "remote call");
        self.calls.push(RemoteCall { op, table, ids, succeeded });
    }

    fn select(&self, table: Table, filter: &Filter) -> Vec<Value> {
        self.rows(table).values().filter(|row| filter.matches(row)).cloned().collect()
    }

    fn upsert(
        &mut self,
        table: Table,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut stored = Vec::with_capacity(rows.len());
        for mut row in rows {
            let key = string_field(&row, conflict_key).ok_or_else(|| {
                RemoteError::new(
                    RemoteErrorKind::Other,
                    format!("row is missing conflict key `{conflict_key}`"),
                )
            })?;
            if table == Table::Nodes {
                self.check_node_references(&row)?;
            }

            let stamp = Value::String(format_timestamp(self.next_stamp()));
            if let Some(object) = row.as_object_mut() {
                object.insert("updated_at".to_string(), stamp);
            }
            self.rows_mut(table).insert(key, row.clone());
            stored.push(row);
        }
        Ok(stored)
    }

    fn check_node_references(&self, row: &Value) -> Result<(), RemoteError> {
        let mindmap_id = string_field(row, "mindmap_id").unwrap_or_default();
        if !self.documents.contains_key(&mindmap_id) {
            return Err(RemoteError::new(
                RemoteErrorKind::ConstraintConflict,
                format!("node references unknown document {mindmap_id}"),
            ));
        }
        if let Some(parent_id) = string_field(row, "parent_id") {
            if !self.nodes.contains_key(&parent_id) {
                return Err(RemoteError::new(
                    RemoteErrorKind::ConstraintConflict,
                    format!("node references unknown parent {parent_id}"),
                ));
            }
        }
        Ok(())
    }

    fn update(&mut self, table: Table, patch: &Value, filter: &Filter) -> Vec<Value> {
        let keys: Vec<String> = self
            .rows(table)
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(key, _)| key.clone())
            .collect();

        let mut updated = Vec::with_capacity(keys.len());
        for key in keys {
            let stamp = Value::String(format_timestamp(self.next_stamp()));
            if let Some(row) = self.rows_mut(table).get_mut(&key) {
                if let (Some(object), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                    for (column, value) in changes {
                        object.insert(column.clone(), value.clone());
                    }
                    object.insert("updated_at".to_string(), stamp);
                }
                updated.push(row.clone());
            }
        }
        updated
    }

    fn delete(&mut self, table: Table, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        let doomed: Vec<String> = self
            .rows(table)
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(key, _)| key.clone())
            .collect();

        if table == Table::Nodes {
            let orphaned = self.nodes.values().any(|row| {
                string_field(row, "parent_id").is_some_and(|parent| doomed.contains(&parent))
                    && string_field(row, "id").is_some_and(|id| !doomed.contains(&id))
            });
            if orphaned {
                return Err(RemoteError::new(
                    RemoteErrorKind::ConstraintConflict,
                    "node still has children",
                ));
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for key in &doomed {
            if let Some(row) = self.rows_mut(table).remove(key) {
                removed.push(row);
            }
        }
        if table == Table::Documents {
            self.nodes.retain(|_, row| {
                string_field(row, "mindmap_id").map_or(true, |doc| !doomed.contains(&doc))
            });
        }
        Ok(removed)
    }
}

fn string_field(row: &Value, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn filter_ids(filter: &Filter) -> Vec<String> {
    filter
        .conditions
        .iter()
        .map(|(column, value)| match value.as_str() {
            Some(text) => format!("{column}={text}"),
            None => format!("{column}={value}"),
        })
        .collect()
}

fn row_ids(rows: &[Value], conflict_key: &str) -> Vec<String> {
    rows.iter().filter_map(|row| string_field(row, conflict_key)).collect()
}

#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn latency(&self) -> Option<Duration> {
        self.lock().latency
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Fail the next call of `op` with `kind`.
    pub fn fail_next(&self, op: RemoteOp, kind: RemoteErrorKind) {
        self.lock().faults.push_back((op, RemoteError::new(kind, format!("injected {op:?} failure"))));
    }

    /// Delay every call; combine with a short sync timeout to simulate a hung server.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Simulate a write by another session.
    pub fn touch_document(&self, id: Uuid, updated_at: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        if state.last_stamp.map_or(true, |last| last < updated_at) {
            state.last_stamp = Some(updated_at);
        }
        match state.documents.get_mut(&id.to_string()).and_then(Value::as_object_mut) {
            Some(row) => {
                row.insert("updated_at".to_string(), Value::String(format_timestamp(updated_at)));
                true
            }
            None => false,
        }
    }

    // ── Seeding and inspection ─────────────────────────────────────

    pub fn seed_document(&self, row: &RemoteDocumentRow) -> Result<(), RemoteError> {
        let value = to_row(row)?;
        self.lock().documents.insert(row.id.to_string(), value);
        Ok(())
    }

    pub fn seed_node(&self, row: &RemoteNodeRow) -> Result<(), RemoteError> {
        let value = to_row(row)?;
        self.lock().nodes.insert(row.id.to_string(), value);
        Ok(())
    }

    pub fn document(&self, id: Uuid) -> Option<RemoteDocumentRow> {
        let row = self.lock().documents.get(&id.to_string()).cloned()?;
        from_row(row).ok()
    }

    pub fn node(&self, id: Uuid) -> Option<RemoteNodeRow> {
        let row = self.lock().nodes.get(&id.to_string()).cloned()?;
        from_row(row).ok()
    }

    /// Nodes of a document in sibling order.
    pub fn nodes_of(&self, mindmap_id: Uuid) -> Vec<RemoteNodeRow> {
        let rows = self.lock().select(Table::Nodes, &Filter::eq("mindmap_id", mindmap_id.to_string()));
        let mut nodes: Vec<RemoteNodeRow> = rows.into_iter().filter_map(|row| from_row(row).ok()).collect();
        nodes.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        nodes
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of successful writes since the journal was last cleared.
    pub fn write_count(&self) -> usize {
        self.lock().calls.iter().filter(|call| call.op.is_write() && call.succeeded).count()
    }
}

impl RemoteStore for InMemoryRemote {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        self.delay().await;
        let mut state = self.lock();
        if let Some(error) = state.take_fault(RemoteOp::Select) {
            state.record(RemoteOp::Select, table, filter_ids(filter), false);
            return Err(error);
        }
        let rows = state.select(table, filter);
        state.record(RemoteOp::Select, table, filter_ids(filter), true);
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<Vec<Value>, RemoteError> {
        self.delay().await;
        let mut state = self.lock();
        let ids = row_ids(&rows, conflict_key);
        if let Some(error) = state.take_fault(RemoteOp::Upsert) {
            state.record(RemoteOp::Upsert, table, ids, false);
            return Err(error);
        }
        let result = state.upsert(table, rows, conflict_key);
        state.record(RemoteOp::Upsert, table, ids, result.is_ok());
        result
    }

    async fn update(
        &self,
        table: Table,
        patch: Value,
        filter: &Filter,
    ) -> Result<Vec<Value>, RemoteError> {
        self.delay().await;
        let mut state = self.lock();
        if let Some(error) = state.take_fault(RemoteOp::Update) {
            state.record(RemoteOp::Update, table, filter_ids(filter), false);
            return Err(error);
        }
        let rows = state.update(table, &patch, filter);
        state.record(RemoteOp::Update, table, row_ids(&rows, "id"), true);
        Ok(rows)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        self.delay().await;
        let mut state = self.lock();
        if let Some(error) = state.take_fault(RemoteOp::Delete) {
            state.record(RemoteOp::Delete, table, filter_ids(filter), false);
            return Err(error);
        }
        let result = state.delete(table, filter);
        let ids = match &result {
            Ok(rows) => row_ids(rows, "id"),
            Err(_) => filter_ids(filter),
        };
        state.record(RemoteOp::Delete, table, ids, result.is_ok());
        result
    }
}
