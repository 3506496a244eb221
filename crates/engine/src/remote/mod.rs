// Remote store contract consumed by the sync manager.
//
// The concrete network client lives outside this crate. Rows cross the
// boundary as JSON objects; `RemoteDocumentRow` / `RemoteNodeRow` are the typed
// views of the two tables.

pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};
use mindsync_common::{Document, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{InMemoryRemote, RemoteCall, RemoteOp};

// ── Tables and filters ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Documents,
    Nodes,
}

impl Table {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Nodes => "nodes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conjunction of column equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { conditions: vec![(column.into(), value.into())] }
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn by_id(id: Uuid) -> Self {
        Self::eq("id", id.to_string())
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|(column, expected)| row.get(column) == Some(expected))
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Missing or expired credentials, or a row-level policy rejection.
    Authorization,
    /// Unique or foreign-key constraint violation.
    ConstraintConflict,
    Network,
    Timeout,
    Other,
}

impl RemoteErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::ConstraintConflict => "constraint_conflict",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

// ── Store trait ────────────────────────────────────────────────────

/// Row-level access to the canonical remote copy.
///
/// Every call returns the affected rows. `upsert` returns rows as stored,
/// including the server-assigned `updated_at`.
pub trait RemoteStore: Send + Sync + 'static {
    fn select(
        &self,
        table: Table,
        filter: &Filter,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, RemoteError>> + Send;

    fn upsert(
        &self,
        table: Table,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, RemoteError>> + Send;

    fn update(
        &self,
        table: Table,
        patch: Value,
        filter: &Filter,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, RemoteError>> + Send;

    fn delete(
        &self,
        table: Table,
        filter: &Filter,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, RemoteError>> + Send;
}

// ── Typed rows ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocumentRow {
    pub id: Uuid,
    pub short_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RemoteDocumentRow {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id,
            short_id: doc.short_id.clone(),
            user_id: doc.user_id.clone(),
            title: doc.title.clone(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            deleted_at: doc.deleted_at,
        }
    }

    /// Local copy matching this row, clean and baselined at the remote `updated_at`.
    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            short_id: self.short_id,
            user_id: self.user_id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            dirty: false,
            local_updated_at: None,
            server_updated_at: Some(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNodeRow {
    pub id: Uuid,
    pub mindmap_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub order_index: i64,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteNodeRow {
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id,
            mindmap_id: node.mindmap_id,
            parent_id: node.parent_id,
            order_index: node.order_index,
            title: node.title.clone(),
            content: node.content.clone(),
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }

    pub fn into_node(self) -> Node {
        Node {
            id: self.id,
            mindmap_id: self.mindmap_id,
            parent_id: self.parent_id,
            order_index: self.order_index,
            title: self.title,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            dirty: false,
            local_updated_at: None,
            deleted: false,
        }
    }
}

/// Encode a typed row for the wire.
pub fn to_row<T: Serialize>(row: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(row)
        .map_err(|error| RemoteError::new(RemoteErrorKind::Other, format!("encode row: {error}")))
}

/// Decode a wire row into its typed view.
pub fn from_row<T: for<'de> Deserialize<'de>>(row: Value) -> Result<T, RemoteError> {
    serde_json::from_value(row)
        .map_err(|error| RemoteError::new(RemoteErrorKind::Other, format!("malformed row: {error}")))
}
