// Reversible actions: the smallest units of change to a document tree.
//
// Each variant carries only the payload it needs to undo itself, so `reverse`
// is a pure data transformation and an action can be rebuilt from an
// operation-log entry.

pub mod commands;

use anyhow::Result;
use chrono::{DateTime, Utc};
use mindsync_common::{Node, OpLogEntry, OperationKind, Projection, ProjectionError};
use rusqlite::Connection;
use uuid::Uuid;

use crate::state::MindMapTree;
use crate::store::{DocumentStore, NodeStore};

pub use commands::{Command, CommandError};

/// Where a node sits among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub parent_id: Uuid,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddNode(Node),
    /// Carries the full node so the removal can be reversed.
    RemoveNode(Node),
    UpdateTitle { node_id: Uuid, before: String, after: String },
    UpdateContent { node_id: Uuid, before: Option<String>, after: Option<String> },
    MoveNode { node_id: Uuid, from: Placement, to: Placement },
    /// Exchange the order indexes of two siblings. `*_index` are the values before applying.
    SwapOrder { first: Uuid, first_index: i64, second: Uuid, second_index: i64 },
    /// Field-level change rebuilt from a log entry.
    Patch { node_id: Uuid, before: Projection, after: Projection },
    SetDocumentTitle { document_id: Uuid, before: String, after: String },
}

impl Action {
    /// Apply to the in-memory tree. Returns `false` when the target is missing,
    /// in which case the tree is left untouched.
    pub fn apply(&self, tree: &mut MindMapTree) -> bool {
        match self {
            Self::AddNode(node) => {
                if tree.contains(node.id) {
                    return false;
                }
                tree.insert(Node { deleted: false, ..node.clone() });
                true
            }
            Self::RemoveNode(node) => tree.remove(node.id).is_some(),
            Self::UpdateTitle { node_id, after, .. } => match tree.get_mut(*node_id) {
                Some(node) => {
                    node.title = after.clone();
                    true
                }
                None => false,
            },
            Self::UpdateContent { node_id, after, .. } => match tree.get_mut(*node_id) {
                Some(node) => {
                    node.content = after.clone();
                    true
                }
                None => false,
            },
            Self::MoveNode { node_id, to, .. } => {
                if !tree.contains(to.parent_id) {
                    return false;
                }
                match tree.get_mut(*node_id) {
                    Some(node) => {
                        node.parent_id = Some(to.parent_id);
                        node.order_index = to.order_index;
                        true
                    }
                    None => false,
                }
            }
            Self::SwapOrder { first, first_index, second, second_index } => {
                if !tree.contains(*first) || !tree.contains(*second) {
                    return false;
                }
                if let Some(node) = tree.get_mut(*first) {
                    node.order_index = *second_index;
                }
                if let Some(node) = tree.get_mut(*second) {
                    node.order_index = *first_index;
                }
                true
            }
            Self::Patch { node_id, after, .. } => match tree.get_mut(*node_id) {
                Some(node) => {
                    after.apply_to(node);
                    true
                }
                None => false,
            },
            // The in-memory title is derived from the root node.
            Self::SetDocumentTitle { .. } => true,
        }
    }

    /// The action that undoes this one when applied right after it.
    pub fn reverse(&self) -> Action {
        match self {
            Self::AddNode(node) => Self::RemoveNode(node.clone()),
            Self::RemoveNode(node) => Self::AddNode(node.clone()),
            Self::UpdateTitle { node_id, before, after } => Self::UpdateTitle {
                node_id: *node_id,
                before: after.clone(),
                after: before.clone(),
            },
            Self::UpdateContent { node_id, before, after } => Self::UpdateContent {
                node_id: *node_id,
                before: after.clone(),
                after: before.clone(),
            },
            Self::MoveNode { node_id, from, to } => {
                Self::MoveNode { node_id: *node_id, from: *to, to: *from }
            }
            Self::SwapOrder { first, first_index, second, second_index } => Self::SwapOrder {
                first: *first,
                first_index: *second_index,
                second: *second,
                second_index: *first_index,
            },
            Self::Patch { node_id, before, after } => Self::Patch {
                node_id: *node_id,
                before: after.clone(),
                after: before.clone(),
            },
            Self::SetDocumentTitle { document_id, before, after } => Self::SetDocumentTitle {
                document_id: *document_id,
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::AddNode(_) => OperationKind::AddNode,
            Self::RemoveNode(_) => OperationKind::DeleteNode,
            Self::UpdateTitle { .. } => OperationKind::UpdateTitle,
            Self::UpdateContent { .. } => OperationKind::UpdateContent,
            Self::MoveNode { .. } => OperationKind::MoveNode,
            Self::SwapOrder { .. } => OperationKind::ReorderNode,
            Self::Patch { after, .. } => OperationKind::infer_update(after),
            Self::SetDocumentTitle { .. } => OperationKind::UpdateDocumentTitle,
        }
    }

    /// Node ids whose stored rows this action changes.
    pub fn touched_nodes(&self) -> Vec<Uuid> {
        match self {
            Self::AddNode(node) | Self::RemoveNode(node) => vec![node.id],
            Self::UpdateTitle { node_id, .. }
            | Self::UpdateContent { node_id, .. }
            | Self::MoveNode { node_id, .. }
            | Self::Patch { node_id, .. } => vec![*node_id],
            Self::SwapOrder { first, second, .. } => vec![*first, *second],
            Self::SetDocumentTitle { .. } => Vec::new(),
        }
    }

    /// Mirror an applied action into the Local Store without logging it.
    ///
    /// `tree` must be the state after `apply`. Removed nodes are tombstoned and
    /// every written row is flagged dirty.
    pub fn persist(
        &self,
        conn: &Connection,
        tree: &MindMapTree,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::RemoveNode(node) => {
                NodeStore::tombstone(conn, node.id, now)?;
            }
            Self::SetDocumentTitle { document_id, after, .. } => {
                DocumentStore::set_title(conn, *document_id, after, now)?;
            }
            _ => {
                for id in self.touched_nodes() {
                    if let Some(node) = tree.get(id) {
                        NodeStore::put_local_edit(conn, node, now)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild the forward action recorded by a log entry.
    pub fn from_entry(entry: &OpLogEntry, now: DateTime<Utc>) -> Result<Action, ProjectionError> {
        match entry.kind {
            OperationKind::AddNode => {
                Ok(Self::AddNode(entry.after.to_node(entry.target_id, entry.mindmap_id, now)?))
            }
            OperationKind::DeleteNode => {
                Ok(Self::RemoveNode(entry.before.to_node(entry.target_id, entry.mindmap_id, now)?))
            }
            OperationKind::UpdateDocumentTitle => Ok(Self::SetDocumentTitle {
                document_id: entry.target_id,
                before: entry.before.title.clone().ok_or(ProjectionError::MissingField("title"))?,
                after: entry.after.title.clone().ok_or(ProjectionError::MissingField("title"))?,
            }),
            OperationKind::UpdateTitle
            | OperationKind::UpdateContent
            | OperationKind::MoveNode
            | OperationKind::ReorderNode => Ok(Self::Patch {
                node_id: entry.target_id,
                before: entry.before.clone(),
                after: entry.after.clone(),
            }),
        }
    }
}

/// Apply actions in order; returns how many took effect.
pub fn apply_all(actions: &[Action], tree: &mut MindMapTree) -> usize {
    actions.iter().filter(|action| action.apply(tree)).count()
}
