// Auto-persistence: mirror an in-memory tree transition into the Local Store.
//
// The caller keeps the last successfully persisted snapshot. Every transition
// diffs that snapshot against the current tree and writes node rows plus one
// log entry per changed record inside a single transaction. When the write
// fails nothing is committed and the snapshot stays put, so the next call
// re-diffs from the same base and catches up.

use std::cmp::Reverse;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mindsync_common::{Node, OpLogEntry, OperationKind, Projection};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::state::MindMapTree;
use crate::store::{DocumentStore, LocalDb, NodeStore, OperationLog};

/// One record-level difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDiff {
    Added(Node),
    Updated { before: Node, after: Node },
    Removed(Node),
}

impl NodeDiff {
    pub fn node_id(&self) -> Uuid {
        match self {
            Self::Added(node) | Self::Removed(node) => node.id,
            Self::Updated { after, .. } => after.id,
        }
    }
}

/// Compute the minimal per-node diff, in log order.
///
/// Additions come parent-first, then updates by id, then removals deepest-first,
/// so replaying the reversed entries in reverse order is always valid.
pub fn diff_trees(before: &MindMapTree, after: &MindMapTree) -> Vec<NodeDiff> {
    let mut added: Vec<&Node> = after.nodes().filter(|node| !before.contains(node.id)).collect();
    added.sort_by_key(|node| (after.depth(node.id).unwrap_or(usize::MAX), node.id));

    let mut updated: Vec<(&Node, &Node)> = after
        .nodes()
        .filter_map(|node| before.get(node.id).map(|old| (old, node)))
        .filter(|(old, new)| !old.same_content(new))
        .collect();
    updated.sort_by_key(|(_, new)| new.id);

    let mut removed: Vec<&Node> = before.nodes().filter(|node| !after.contains(node.id)).collect();
    removed.sort_by_key(|node| (Reverse(before.depth(node.id).unwrap_or(0)), node.id));

    added
        .into_iter()
        .map(|node| NodeDiff::Added(node.clone()))
        .chain(updated.into_iter().map(|(old, new)| NodeDiff::Updated {
            before: old.clone(),
            after: new.clone(),
        }))
        .chain(removed.into_iter().map(|node| NodeDiff::Removed(node.clone())))
        .collect()
}

/// Result of one persisted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    /// `None` when there was nothing to write.
    pub batch_id: Option<Uuid>,
    pub entries: usize,
    pub trimmed: usize,
}

impl PersistOutcome {
    fn unchanged() -> Self {
        Self { batch_id: None, entries: 0, trimmed: 0 }
    }
}

/// Writes tree transitions and their log entries.
#[derive(Debug, Clone)]
pub struct AutoPersister {
    max_entries: usize,
    discard_redo_on_edit: bool,
}

impl AutoPersister {
    pub fn new(history: &HistoryConfig) -> Self {
        Self { max_entries: history.max_entries, discard_redo_on_edit: history.discard_redo_on_edit }
    }

    /// Persist the transition `before → after` in one transaction.
    pub fn persist(
        &self,
        db: &mut LocalDb,
        before: &MindMapTree,
        after: &MindMapTree,
        now: DateTime<Utc>,
    ) -> Result<PersistOutcome> {
        let diffs = diff_trees(before, after);
        if diffs.is_empty() {
            return Ok(PersistOutcome::unchanged());
        }

        let document_id = after.document_id();
        let batch_id = Uuid::new_v4();
        let tx = db.transaction()?;

        if self.discard_redo_on_edit {
            let discarded = OperationLog::discard_undone(&tx, document_id)?;
            if discarded > 0 {
                debug!(doc_id = %document_id, discarded, "dropped redo history after new edit");
            }
        }

        let mut entries = 0usize;
        for diff in &diffs {
            write_diff(&tx, diff, now)?;
            OperationLog::append(&tx, &entry_for(diff, document_id, batch_id, now))?;
            entries += 1;
        }

        if let Some(entry) = root_title_entry(before, after, batch_id, now) {
            let title = entry.after.title.as_deref().unwrap_or_default();
            DocumentStore::set_title(&tx, document_id, title, now)?;
            OperationLog::append(&tx, &entry)?;
            entries += 1;
        }

        let trimmed = OperationLog::trim(&tx, document_id, self.max_entries, Some(batch_id))?;
        tx.commit().context("failed to commit persisted transition")?;

        debug!(doc_id = %document_id, %batch_id, entries, trimmed, "persisted tree transition");
        Ok(PersistOutcome { batch_id: Some(batch_id), entries, trimmed })
    }
}

fn write_diff(conn: &Connection, diff: &NodeDiff, now: DateTime<Utc>) -> Result<()> {
    match diff {
        NodeDiff::Added(node) | NodeDiff::Updated { after: node, .. } => {
            NodeStore::put_local_edit(conn, node, now)
        }
        NodeDiff::Removed(node) => NodeStore::tombstone(conn, node.id, now).map(|_| ()),
    }
}

fn entry_for(diff: &NodeDiff, mindmap_id: Uuid, batch_id: Uuid, now: DateTime<Utc>) -> OpLogEntry {
    let (kind, before, after) = match diff {
        NodeDiff::Added(node) => (OperationKind::AddNode, Projection::empty(), Projection::of_node(node)),
        NodeDiff::Updated { before, after } => {
            let (old, new) = Projection::changed_fields(before, after);
            (OperationKind::infer_update(&new), old, new)
        }
        NodeDiff::Removed(node) => {
            (OperationKind::DeleteNode, Projection::of_node(node), Projection::empty())
        }
    };

    OpLogEntry {
        seq: 0,
        id: Uuid::new_v4(),
        mindmap_id,
        batch_id,
        target_id: diff.node_id(),
        kind,
        timestamp: now,
        before,
        after,
        is_undone: false,
    }
}

/// Entry mirroring a root title change onto the document record.
fn root_title_entry(
    before: &MindMapTree,
    after: &MindMapTree,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Option<OpLogEntry> {
    let old = before.root()?;
    let new = after.root()?;
    if old.id != new.id || old.title == new.title {
        return None;
    }

    Some(OpLogEntry {
        seq: 0,
        id: Uuid::new_v4(),
        mindmap_id: after.document_id(),
        batch_id,
        target_id: after.document_id(),
        kind: OperationKind::UpdateDocumentTitle,
        timestamp: now,
        before: Projection::title(old.title.clone()),
        after: Projection::title(new.title.clone()),
        is_undone: false,
    })
}

#[cfg(test)]
mod tests {
    use mindsync_common::time::now_utc;
    use mindsync_common::Document;

    use super::*;

    struct Fixture {
        db: LocalDb,
        doc: Document,
        tree: MindMapTree,
        root: Uuid,
    }

    fn setup() -> Fixture {
        let db = LocalDb::open_in_memory().expect("open");
        let now = now_utc();
        let doc = Document::new("user-1", "R", now);
        let root = Node::new(doc.id, None, 0, "R", now);
        DocumentStore::put(db.connection(), &doc).expect("put doc");
        NodeStore::put(db.connection(), &root).expect("put root");
        let root_id = root.id;
        Fixture { db, tree: MindMapTree::from_nodes(doc.id, [root]), doc, root: root_id }
    }

    fn persister() -> AutoPersister {
        AutoPersister::new(&HistoryConfig::default())
    }

    #[test]
    fn unchanged_tree_writes_nothing() {
        let mut f = setup();
        let outcome = persister().persist(&mut f.db, &f.tree, &f.tree, now_utc()).expect("persist");
        assert_eq!(outcome, PersistOutcome::unchanged());
        assert!(OperationLog::list(f.db.connection(), f.doc.id).expect("list").is_empty());
    }

    #[test]
    fn additions_are_logged_parent_first() {
        let mut f = setup();
        let now = now_utc();
        let mut after = f.tree.clone();
        let child = Node::new(f.doc.id, Some(f.root), 0, "child", now);
        let grandchild = Node::new(f.doc.id, Some(child.id), 0, "grandchild", now);
        after.insert(grandchild.clone());
        after.insert(child.clone());

        let outcome = persister().persist(&mut f.db, &f.tree, &after, now).expect("persist");
        assert_eq!(outcome.entries, 2);

        let log = OperationLog::list(f.db.connection(), f.doc.id).expect("list");
        assert_eq!(log.iter().map(|e| e.target_id).collect::<Vec<_>>(), vec![child.id, grandchild.id]);
        assert!(log.iter().all(|e| e.kind == OperationKind::AddNode && e.before.is_empty()));
        assert!(log.iter().all(|e| Some(e.batch_id) == outcome.batch_id));

        let stored = NodeStore::get(f.db.connection(), grandchild.id).expect("get").expect("row");
        assert!(stored.dirty);
        assert_eq!(stored.local_updated_at, Some(now));
    }

    #[test]
    fn removals_tombstone_deepest_first() {
        let mut f = setup();
        let now = now_utc();
        let child = Node::new(f.doc.id, Some(f.root), 0, "child", now);
        let grandchild = Node::new(f.doc.id, Some(child.id), 0, "grandchild", now);
        let mut before = f.tree.clone();
        before.insert(child.clone());
        before.insert(grandchild.clone());
        persister().persist(&mut f.db, &f.tree, &before, now).expect("seed");

        let later = now + chrono::Duration::seconds(1);
        persister().persist(&mut f.db, &before, &f.tree, later).expect("delete");

        let deletes: Vec<_> = OperationLog::list(f.db.connection(), f.doc.id)
            .expect("list")
            .into_iter()
            .filter(|e| e.kind == OperationKind::DeleteNode)
            .collect();
        assert_eq!(deletes.iter().map(|e| e.target_id).collect::<Vec<_>>(), vec![grandchild.id, child.id]);
        assert!(deletes.iter().all(|e| e.after.is_empty()));

        let row = NodeStore::get(f.db.connection(), child.id).expect("get").expect("row");
        assert!(row.deleted);
    }

    #[test]
    fn mixed_update_carries_every_changed_field() {
        let mut f = setup();
        let now = now_utc();
        let child = Node::new(f.doc.id, Some(f.root), 0, "child", now);
        let mut before = f.tree.clone();
        before.insert(child.clone());
        persister().persist(&mut f.db, &f.tree, &before, now).expect("seed");

        let mut after = before.clone();
        let node = after.get_mut(child.id).expect("child");
        node.title = "renamed".into();
        node.content = Some("note".into());
        persister().persist(&mut f.db, &before, &after, now).expect("update");

        let log = OperationLog::list(f.db.connection(), f.doc.id).expect("list");
        let update = log.last().expect("entry");
        assert_eq!(update.kind, OperationKind::UpdateContent);
        assert_eq!(update.before.title.as_deref(), Some("child"));
        assert_eq!(update.after.title.as_deref(), Some("renamed"));
        assert_eq!(update.after.content, Some(Some("note".into())));
    }

    #[test]
    fn root_title_change_updates_document() {
        let mut f = setup();
        let mut after = f.tree.clone();
        after.get_mut(f.root).expect("root").title = "Renamed map".into();
        let later = now_utc() + chrono::Duration::seconds(1);

        let outcome = persister().persist(&mut f.db, &f.tree, &after, later).expect("persist");
        assert_eq!(outcome.entries, 2);

        let log = OperationLog::list(f.db.connection(), f.doc.id).expect("list");
        assert_eq!(log[0].kind, OperationKind::UpdateTitle);
        assert_eq!(log[1].kind, OperationKind::UpdateDocumentTitle);
        assert_eq!(log[1].target_id, f.doc.id);

        let doc = DocumentStore::get(f.db.connection(), f.doc.id).expect("get").expect("doc");
        assert_eq!(doc.title, "Renamed map");
        assert!(doc.dirty);
        assert_eq!(doc.local_updated_at, Some(later));
    }

    #[test]
    fn new_edit_discards_undone_entries_when_configured() {
        let mut f = setup();
        let now = now_utc();
        let mut first = f.tree.clone();
        first.insert(Node::new(f.doc.id, Some(f.root), 0, "a", now));
        persister().persist(&mut f.db, &f.tree, &first, now).expect("first");
        let ids: Vec<_> =
            OperationLog::list(f.db.connection(), f.doc.id).expect("list").iter().map(|e| e.id).collect();
        OperationLog::set_undone(f.db.connection(), &ids, true).expect("undo flag");

        let keep = AutoPersister::new(&HistoryConfig { discard_redo_on_edit: false, ..HistoryConfig::default() });
        let mut second = f.tree.clone();
        second.insert(Node::new(f.doc.id, Some(f.root), 0, "b", now));
        keep.persist(&mut f.db, &f.tree, &second, now).expect("second");
        assert_eq!(OperationLog::count(f.db.connection(), f.doc.id, true).expect("count"), 1);

        let mut third = second.clone();
        third.insert(Node::new(f.doc.id, Some(f.root), 1, "c", now));
        persister().persist(&mut f.db, &second, &third, now).expect("third");
        assert_eq!(OperationLog::count(f.db.connection(), f.doc.id, true).expect("count"), 0);
        assert_eq!(OperationLog::count(f.db.connection(), f.doc.id, false).expect("count"), 2);
    }

    #[test]
    fn retention_trims_oldest_batches() {
        let mut f = setup();
        let persister = AutoPersister::new(&HistoryConfig { max_entries: 2, ..HistoryConfig::default() });
        let mut current = f.tree.clone();
        for i in 0..4 {
            let at = now_utc() + chrono::Duration::seconds(i);
            let mut next = current.clone();
            next.insert(Node::new(f.doc.id, Some(f.root), i, format!("n{i}"), at));
            persister.persist(&mut f.db, &current, &next, at).expect("persist");
            current = next;
        }
        assert_eq!(OperationLog::list(f.db.connection(), f.doc.id).expect("list").len(), 2);
    }

    #[test]
    fn failed_write_commits_nothing() {
        let mut f = setup();
        let mut after = f.tree.clone();
        after.insert(Node::new(f.doc.id, Some(f.root), 0, "a", now_utc()));

        f.db.connection().execute_batch("PRAGMA query_only = ON;").expect("read-only");
        assert!(persister().persist(&mut f.db, &f.tree, &after, now_utc()).is_err());
        f.db.connection().execute_batch("PRAGMA query_only = OFF;").expect("writable");

        assert!(OperationLog::list(f.db.connection(), f.doc.id).expect("list").is_empty());
        assert_eq!(NodeStore::list_by_mindmap(f.db.connection(), f.doc.id).expect("nodes").len(), 1);
    }
}
