// Sync manager: drains dirty local records to the remote store.
//
// One pass per document:
//   collect dirty → conflict check against the baseline → upload
//   (document, nodes parent-first, tombstones child-first) → finalize locally
//
// Uploads are upserts by id, so re-running after a partial failure is safe.
// The local store is only touched after the last remote call, except for the
// baseline, which advances as soon as the document upsert is confirmed.

pub mod order;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mindsync_common::{Document, Node};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::remote::{
    from_row, to_row, Filter, RemoteDocumentRow, RemoteError, RemoteErrorKind, RemoteNodeRow,
    RemoteStore, Table,
};
use crate::store::{DocumentStore, LocalDb, NodeStore, OperationLog};

// ── Types ───────────────────────────────────────────────────────────

/// Caller's answer to a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Upload anyway; the local copy wins.
    ForceOverwrite,
    /// Replace the local copy with the remote one.
    DiscardLocal,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub document_id: Uuid,
    pub document_uploaded: bool,
    pub nodes_uploaded: usize,
    pub nodes_deleted: usize,
    /// Baseline recorded by this pass.
    pub server_updated_at: Option<DateTime<Utc>>,
    pub discarded_local: bool,
    /// The soft-deleted document reached the remote and was dropped locally.
    pub document_removed: bool,
}

impl SyncReport {
    fn new(document_id: Uuid) -> Self {
        Self {
            document_id,
            document_uploaded: false,
            nodes_uploaded: 0,
            nodes_deleted: 0,
            server_updated_at: None,
            discarded_local: false,
            document_removed: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.document_uploaded
            && self.nodes_uploaded == 0
            && self.nodes_deleted == 0
            && !self.discarded_local
            && !self.document_removed
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document {0} does not exist locally")]
    NotFound(Uuid),
    #[error("remote copy changed at {server_updated_at} after the last sync")]
    Conflict {
        document_id: Uuid,
        server_updated_at: DateTime<Utc>,
        local_updated_at: Option<DateTime<Utc>>,
    },
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("sync failed: {0}")]
    Unknown(String),
    #[error("local store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    fn from_remote(context: &str, error: RemoteError) -> Self {
        let message = format!("{context}: {}", error.message);
        match error.kind {
            RemoteErrorKind::Authorization => Self::Auth(message),
            RemoteErrorKind::Network | RemoteErrorKind::Timeout => Self::Network(message),
            RemoteErrorKind::ConstraintConflict | RemoteErrorKind::Other => Self::Unknown(message),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Auth(_) => "auth",
            Self::Network(_) => "network",
            Self::Unknown(_) => "unknown",
            Self::Store(_) => "store",
        }
    }

    /// Whether running the same sync again may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Store(_))
    }
}

// ── Manager ─────────────────────────────────────────────────────────

pub struct SyncManager<R> {
    remote: R,
    timeout: Duration,
}

impl<R: RemoteStore> SyncManager<R> {
    pub fn new(remote: R, config: &SyncConfig) -> Self {
        Self { remote, timeout: config.timeout() }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn sync_document(
        &self,
        db: &mut LocalDb,
        document_id: Uuid,
        resolution: Option<ConflictResolution>,
    ) -> Result<SyncReport, SyncError> {
        let result = self.run(db, document_id, resolution).await;
        match &result {
            Ok(report) => debug!(doc_id = %document_id, ?report, "sync finished"),
            Err(SyncError::Conflict { server_updated_at, .. }) => {
                info!(doc_id = %document_id, %server_updated_at, "sync stopped on conflict");
            }
            Err(error @ (SyncError::Unknown(_) | SyncError::Store(_))) => {
                error!(doc_id = %document_id, kind = error.kind(), %error, "sync failed");
            }
            Err(error) => warn!(doc_id = %document_id, kind = error.kind(), %error, "sync failed"),
        }
        result
    }

    async fn run(
        &self,
        db: &mut LocalDb,
        document_id: Uuid,
        resolution: Option<ConflictResolution>,
    ) -> Result<SyncReport, SyncError> {
        // Collect
        let doc = DocumentStore::get(db.connection(), document_id)?
            .ok_or(SyncError::NotFound(document_id))?;
        let dirty_nodes = NodeStore::list_dirty(db.connection(), document_id)?;
        if !doc.dirty && dirty_nodes.is_empty() {
            return Ok(SyncReport::new(document_id));
        }

        // Conflict check
        let remote_doc = self.fetch_document(document_id).await?;
        let mut observed = None;
        if let Some(remote) = remote_doc.as_ref() {
            let conflict = doc.server_updated_at.map_or(true, |baseline| remote.updated_at > baseline);
            if conflict {
                match resolution {
                    Some(ConflictResolution::ForceOverwrite) => {
                        warn!(doc_id = %document_id, remote_updated_at = %remote.updated_at,
                            "overwriting newer remote copy");
                    }
                    Some(ConflictResolution::DiscardLocal) => {
                        return self.discard_local(db, remote.clone()).await;
                    }
                    Some(ConflictResolution::Cancel) | None => {
                        return Err(SyncError::Conflict {
                            document_id,
                            server_updated_at: remote.updated_at,
                            local_updated_at: newest_local_edit(&doc, &dirty_nodes),
                        });
                    }
                }
            }
            observed = Some(remote.updated_at);
        }

        // A deletion that never reached the remote has nothing to propagate.
        if doc.is_deleted() && remote_doc.is_none() {
            let tx = db.transaction()?;
            remove_local_copy(&tx, document_id)?;
            tx.commit().map_err(anyhow::Error::from)?;
            info!(doc_id = %document_id, "dropped deleted document that was never synced");
            let mut report = SyncReport::new(document_id);
            report.document_removed = true;
            return Ok(report);
        }

        // Upload
        let mut report = SyncReport::new(document_id);
        if doc.dirty || remote_doc.is_none() {
            let stored = self.upsert_document(&doc).await?;
            DocumentStore::set_baseline(db.connection(), document_id, stored.updated_at)?;
            observed = Some(stored.updated_at);
            report.document_uploaded = true;
        }

        let mut uploaded = Vec::new();
        let mut deleted = Vec::new();
        if !doc.is_deleted() {
            let (tombstones, live): (Vec<Node>, Vec<Node>) =
                dirty_nodes.into_iter().partition(|node| node.deleted);

            for node in order::upload_order(&live) {
                let row = to_row(&RemoteNodeRow::from_node(node))
                    .map_err(|error| SyncError::from_remote("encode node", error))?;
                self.bounded("upsert node", self.remote.upsert(Table::Nodes, vec![row], "id")).await?;
                uploaded.push((node.id, node.local_updated_at));
            }
            for node in order::delete_order(&tombstones) {
                self.bounded("delete node", self.remote.delete(Table::Nodes, &Filter::by_id(node.id)))
                    .await?;
                deleted.push((node.id, node.local_updated_at));
            }
        }
        report.nodes_uploaded = uploaded.len();
        report.nodes_deleted = deleted.len();

        // Finalize
        let tx = db.transaction()?;
        if doc.is_deleted() && report.document_uploaded {
            remove_local_copy(&tx, document_id)?;
            report.document_removed = true;
        } else {
            if report.document_uploaded {
                DocumentStore::mark_clean(&tx, document_id, doc.local_updated_at)?;
            }
            for (id, uploaded_at) in &uploaded {
                NodeStore::mark_clean(&tx, *id, *uploaded_at)?;
            }
            for (id, uploaded_at) in &deleted {
                NodeStore::purge_tombstone(&tx, *id, *uploaded_at)?;
            }
            if let Some(server_updated_at) = observed {
                DocumentStore::set_baseline(&tx, document_id, server_updated_at)?;
            }
        }
        tx.commit().map_err(anyhow::Error::from)?;

        report.server_updated_at = observed;
        info!(
            doc_id = %document_id,
            document = report.document_uploaded,
            nodes = report.nodes_uploaded,
            deleted = report.nodes_deleted,
            "sync uploaded local changes"
        );
        Ok(report)
    }

    /// Overwrite the local document and nodes with the remote copy.
    async fn discard_local(
        &self,
        db: &mut LocalDb,
        remote: RemoteDocumentRow,
    ) -> Result<SyncReport, SyncError> {
        let document_id = remote.id;
        let rows = self
            .bounded(
                "select nodes",
                self.remote.select(Table::Nodes, &Filter::eq("mindmap_id", document_id.to_string())),
            )
            .await?;
        let nodes = rows
            .into_iter()
            .map(|row| from_row::<RemoteNodeRow>(row).map(RemoteNodeRow::into_node))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| SyncError::from_remote("decode nodes", error))?;

        let baseline = remote.updated_at;
        let doc = remote.into_document();

        let tx = db.transaction()?;
        NodeStore::delete_by_mindmap(&tx, document_id)?;
        for node in &nodes {
            NodeStore::put(&tx, node)?;
        }
        DocumentStore::put(&tx, &doc)?;
        OperationLog::clear(&tx, document_id)?;
        tx.commit().map_err(anyhow::Error::from)?;

        info!(doc_id = %document_id, nodes = nodes.len(), "replaced local copy with remote");
        let mut report = SyncReport::new(document_id);
        report.discarded_local = true;
        report.server_updated_at = Some(baseline);
        Ok(report)
    }

    async fn fetch_document(&self, id: Uuid) -> Result<Option<RemoteDocumentRow>, SyncError> {
        let rows = self
            .bounded("select document", self.remote.select(Table::Documents, &Filter::by_id(id)))
            .await?;
        rows.into_iter()
            .next()
            .map(from_row::<RemoteDocumentRow>)
            .transpose()
            .map_err(|error| SyncError::from_remote("decode document", error))
    }

    async fn upsert_document(&self, doc: &Document) -> Result<RemoteDocumentRow, SyncError> {
        let row = to_row(&RemoteDocumentRow::from_document(doc))
            .map_err(|error| SyncError::from_remote("encode document", error))?;
        let stored = self
            .bounded("upsert document", self.remote.upsert(Table::Documents, vec![row], "id"))
            .await?;
        let row = stored
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Unknown("upsert document: no row returned".to_string()))?;
        from_row(row).map_err(|error| SyncError::from_remote("decode document", error))
    }

    /// Await a remote call under the configured timeout.
    async fn bounded<T>(
        &self,
        context: &str,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|error| SyncError::from_remote(context, error)),
            Err(_) => Err(SyncError::Network(format!(
                "{context}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Hard-delete a document with its nodes and history.
fn remove_local_copy(conn: &Connection, document_id: Uuid) -> anyhow::Result<()> {
    NodeStore::delete_by_mindmap(conn, document_id)?;
    OperationLog::clear(conn, document_id)?;
    DocumentStore::delete(conn, document_id)?;
    Ok(())
}

/// Latest local edit among the records about to be uploaded.
fn newest_local_edit(doc: &Document, dirty_nodes: &[Node]) -> Option<DateTime<Utc>> {
    let doc_edit = if doc.dirty { doc.local_updated_at } else { None };
    dirty_nodes.iter().filter_map(|node| node.local_updated_at).chain(doc_edit).max()
}
