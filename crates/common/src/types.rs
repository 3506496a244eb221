// Core domain types shared across the mindsync crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::projection::Projection;

/// Length of the human-facing document id derived from the internal UUID.
pub const SHORT_ID_LEN: usize = 10;

/// A mind map owned by a single user.
///
/// `server_updated_at` is the sync baseline: the last remote `updated_at` this
/// client knows to match its own copy. Local edits never move it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: Uuid,
    /// Stable short display id shown in URLs and listings.
    pub short_id: String,
    pub user_id: String,
    /// Mirrors the root node title.
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub dirty: bool,
    pub local_updated_at: Option<DateTime<Utc>>,
    pub server_updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A fresh, never-synced document.
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            short_id: short_id_for(id),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            dirty: true,
            local_updated_at: Some(now),
            server_updated_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Derive the short display id for a document.
pub fn short_id_for(id: Uuid) -> String {
    let mut short = id.simple().to_string();
    short.truncate(SHORT_ID_LEN);
    short
}

/// One titled element of a document tree. `parent_id == None` marks the root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: Uuid,
    pub mindmap_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub order_index: i64,
    pub title: String,
    /// Free-text note attached to the node.
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dirty: bool,
    pub local_updated_at: Option<DateTime<Utc>>,
    /// Tombstone: deleted locally, remote deletion still pending.
    pub deleted: bool,
}

impl Node {
    pub fn new(
        mindmap_id: Uuid,
        parent_id: Option<Uuid>,
        order_index: i64,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mindmap_id,
            parent_id,
            order_index,
            title: title.into(),
            content: None,
            created_at: now,
            updated_at: now,
            dirty: true,
            local_updated_at: Some(now),
            deleted: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Equality over the persisted, user-visible fields only.
    pub fn same_content(&self, other: &Node) -> bool {
        self.title == other.title
            && self.content == other.content
            && self.parent_id == other.parent_id
            && self.order_index == other.order_index
    }
}

/// Kind of a recorded operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    AddNode,
    UpdateTitle,
    UpdateContent,
    DeleteNode,
    MoveNode,
    ReorderNode,
    UpdateDocumentTitle,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddNode => "add-node",
            Self::UpdateTitle => "update-title",
            Self::UpdateContent => "update-content",
            Self::DeleteNode => "delete-node",
            Self::MoveNode => "move-node",
            Self::ReorderNode => "reorder-node",
            Self::UpdateDocumentTitle => "update-document-title",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add-node" => Some(Self::AddNode),
            "update-title" => Some(Self::UpdateTitle),
            "update-content" => Some(Self::UpdateContent),
            "delete-node" => Some(Self::DeleteNode),
            "move-node" => Some(Self::MoveNode),
            "reorder-node" => Some(Self::ReorderNode),
            "update-document-title" => Some(Self::UpdateDocumentTitle),
            _ => None,
        }
    }

    /// Classify a node update from the fields that changed.
    ///
    /// A lone title change is `UpdateTitle`; a parent change (with or without a
    /// new index) is `MoveNode`; an index change under the same parent is
    /// `ReorderNode`. Anything else, including mixed edits, is `UpdateContent`.
    pub fn infer_update(changed: &Projection) -> Self {
        let title = changed.title.is_some();
        let parent = changed.parent_id.is_some();
        let order = changed.order_index.is_some();
        let content = changed.content.is_some();

        match (title, parent, order, content) {
            (true, false, false, false) => Self::UpdateTitle,
            (false, true, _, false) => Self::MoveNode,
            (false, false, true, false) => Self::ReorderNode,
            _ => Self::UpdateContent,
        }
    }
}

/// One reversible mutation recorded in the operation log.
///
/// Immutable once written except for `is_undone`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpLogEntry {
    /// Insertion order; breaks ties between equal timestamps.
    pub seq: i64,
    pub id: Uuid,
    pub mindmap_id: Uuid,
    /// Entries written by the same state transition share a batch.
    pub batch_id: Uuid,
    /// Node id, or the document id for `UpdateDocumentTitle`.
    pub target_id: Uuid,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub before: Projection,
    pub after: Projection,
    pub is_undone: bool,
}
