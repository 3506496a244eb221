// Undo/redo cursor over the persisted operation log.
//
// The `is_undone` flags in the log are the source of truth. The cursor
// (`position`, the index of the newest active entry) is cached per document,
// computed lazily and dropped whenever the log may have changed underneath it.

use std::collections::HashMap;

use anyhow::Result;
use mindsync_common::OpLogEntry;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::store::OperationLog;

/// Entries flipped by one undo or redo, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStep {
    pub batch_id: Uuid,
    pub entries: Vec<OpLogEntry>,
}

/// Snapshot reported to the UI. Counts are in log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_count: usize,
    pub redo_count: usize,
}

#[derive(Debug, Default)]
pub struct HistoryManager {
    positions: HashMap<Uuid, i64>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the newest active entry; `-1` when nothing can be undone.
    pub fn position(&mut self, conn: &Connection, mindmap_id: Uuid) -> Result<i64> {
        if let Some(position) = self.positions.get(&mindmap_id) {
            return Ok(*position);
        }
        let position = OperationLog::count(conn, mindmap_id, false)? - 1;
        self.positions.insert(mindmap_id, position);
        Ok(position)
    }

    /// Mark the batch at the cursor undone. The caller applies the inverse.
    pub fn undo(&mut self, conn: &Connection, mindmap_id: Uuid) -> Result<Option<HistoryStep>> {
        let position = self.position(conn, mindmap_id)?;
        if position < 0 {
            return Ok(None);
        }

        let active = OperationLog::active(conn, mindmap_id)?;
        let Some(target) = usize::try_from(position)
            .ok()
            .and_then(|index| active.get(index))
            .or_else(|| active.last())
        else {
            self.positions.insert(mindmap_id, -1);
            return Ok(None);
        };

        let batch_id = target.batch_id;
        let entries: Vec<OpLogEntry> =
            active.iter().filter(|entry| entry.batch_id == batch_id).cloned().collect();
        let ids: Vec<Uuid> = entries.iter().map(|entry| entry.id).collect();
        OperationLog::set_undone(conn, &ids, true)?;

        let remaining = i64::try_from(active.len() - entries.len()).unwrap_or(0);
        self.positions.insert(mindmap_id, remaining - 1);
        debug!(doc_id = %mindmap_id, %batch_id, entries = entries.len(), "undo");
        Ok(Some(HistoryStep { batch_id, entries }))
    }

    /// Re-activate the earliest undone batch.
    pub fn redo(&mut self, conn: &Connection, mindmap_id: Uuid) -> Result<Option<HistoryStep>> {
        let undone = OperationLog::undone(conn, mindmap_id)?;
        let Some(first) = undone.first() else {
            return Ok(None);
        };

        let batch_id = first.batch_id;
        let entries: Vec<OpLogEntry> =
            undone.iter().filter(|entry| entry.batch_id == batch_id).cloned().collect();
        let ids: Vec<Uuid> = entries.iter().map(|entry| entry.id).collect();

        let position = self.position(conn, mindmap_id)?;
        OperationLog::set_undone(conn, &ids, false)?;
        let step = i64::try_from(entries.len()).unwrap_or(0);
        self.positions.insert(mindmap_id, position + step);
        debug!(doc_id = %mindmap_id, %batch_id, entries = entries.len(), "redo");
        Ok(Some(HistoryStep { batch_id, entries }))
    }

    pub fn state(&mut self, conn: &Connection, mindmap_id: Uuid) -> Result<HistoryState> {
        let undo_count = usize::try_from(self.position(conn, mindmap_id)? + 1).unwrap_or(0);
        let redo_count = usize::try_from(OperationLog::count(conn, mindmap_id, true)?).unwrap_or(0);
        Ok(HistoryState {
            can_undo: undo_count > 0,
            can_redo: redo_count > 0,
            undo_count,
            redo_count,
        })
    }

    /// Forget the cached cursor; the next call recomputes it from the log.
    pub fn invalidate(&mut self, mindmap_id: Uuid) {
        self.positions.remove(&mindmap_id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mindsync_common::time::now_utc;
    use mindsync_common::{OperationKind, Projection};

    use super::*;
    use crate::store::LocalDb;

    fn append(db: &LocalDb, doc: Uuid, batch: Uuid, offset: i64) -> Uuid {
        let entry = OpLogEntry {
            seq: 0,
            id: Uuid::new_v4(),
            mindmap_id: doc,
            batch_id: batch,
            target_id: Uuid::new_v4(),
            kind: OperationKind::UpdateTitle,
            timestamp: now_utc() + Duration::seconds(offset),
            before: Projection::title("before"),
            after: Projection::title("after"),
            is_undone: false,
        };
        OperationLog::append(db.connection(), &entry).expect("append");
        entry.id
    }

    #[test]
    fn empty_log_has_nothing_to_undo_or_redo() {
        let db = LocalDb::open_in_memory().expect("open");
        let mut history = HistoryManager::new();
        let doc = Uuid::new_v4();

        assert_eq!(history.position(db.connection(), doc).expect("position"), -1);
        assert!(history.undo(db.connection(), doc).expect("undo").is_none());
        assert!(history.redo(db.connection(), doc).expect("redo").is_none());
        assert_eq!(history.state(db.connection(), doc).expect("state"), HistoryState::default());
    }

    #[test]
    fn undo_takes_newest_batch_and_redo_restores_it() {
        let db = LocalDb::open_in_memory().expect("open");
        let mut history = HistoryManager::new();
        let doc = Uuid::new_v4();
        let first = append(&db, doc, Uuid::new_v4(), 0);
        let batch = Uuid::new_v4();
        let second = append(&db, doc, batch, 1);
        let third = append(&db, doc, batch, 1);

        let step = history.undo(db.connection(), doc).expect("undo").expect("step");
        assert_eq!(step.batch_id, batch);
        assert_eq!(step.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second, third]);
        assert_eq!(history.position(db.connection(), doc).expect("position"), 0);

        let state = history.state(db.connection(), doc).expect("state");
        assert_eq!(state, HistoryState { can_undo: true, can_redo: true, undo_count: 1, redo_count: 2 });

        let redo = history.redo(db.connection(), doc).expect("redo").expect("step");
        assert_eq!(redo.batch_id, batch);
        assert_eq!(history.position(db.connection(), doc).expect("position"), 2);

        let undone_first = history.undo(db.connection(), doc).expect("undo").expect("step");
        assert_eq!(undone_first.batch_id, batch);
        let undone_second = history.undo(db.connection(), doc).expect("undo").expect("step");
        assert_eq!(undone_second.entries[0].id, first);
        assert!(history.undo(db.connection(), doc).expect("undo").is_none());
    }

    #[test]
    fn redo_replays_oldest_undone_batch_first() {
        let db = LocalDb::open_in_memory().expect("open");
        let mut history = HistoryManager::new();
        let doc = Uuid::new_v4();
        let older = append(&db, doc, Uuid::new_v4(), 0);
        let newer = append(&db, doc, Uuid::new_v4(), 1);

        history.undo(db.connection(), doc).expect("undo");
        history.undo(db.connection(), doc).expect("undo");

        let step = history.redo(db.connection(), doc).expect("redo").expect("step");
        assert_eq!(step.entries[0].id, older);
        let step = history.redo(db.connection(), doc).expect("redo").expect("step");
        assert_eq!(step.entries[0].id, newer);
    }

    #[test]
    fn cursor_is_rebuilt_from_persisted_flags() {
        let db = LocalDb::open_in_memory().expect("open");
        let doc = Uuid::new_v4();
        append(&db, doc, Uuid::new_v4(), 0);
        append(&db, doc, Uuid::new_v4(), 1);

        let mut session = HistoryManager::new();
        session.undo(db.connection(), doc).expect("undo");

        let mut restarted = HistoryManager::new();
        assert_eq!(restarted.position(db.connection(), doc).expect("position"), 0);
        let state = restarted.state(db.connection(), doc).expect("state");
        assert_eq!((state.undo_count, state.redo_count), (1, 1));
    }

    #[test]
    fn invalidate_picks_up_external_log_changes() {
        let db = LocalDb::open_in_memory().expect("open");
        let mut history = HistoryManager::new();
        let doc = Uuid::new_v4();
        assert_eq!(history.position(db.connection(), doc).expect("position"), -1);

        append(&db, doc, Uuid::new_v4(), 0);
        assert_eq!(history.position(db.connection(), doc).expect("cached"), -1);
        history.invalidate(doc);
        assert_eq!(history.position(db.connection(), doc).expect("fresh"), 0);
    }
}
