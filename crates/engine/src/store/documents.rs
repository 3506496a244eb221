// `documents` family: one row per mind map, with sync bookkeeping.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mindsync_common::time::format_timestamp;
use mindsync_common::Document;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{opt_ts_column, ts_column, uuid_column};

const SELECT_COLUMNS: &str = "SELECT id, short_id, user_id, title, created_at, updated_at, \
                              deleted_at, dirty, local_updated_at, server_updated_at \
                              FROM documents";

/// CRUD operations for `documents`.
pub struct DocumentStore;

impl DocumentStore {
    /// Insert or fully replace a document row.
    pub fn put(conn: &Connection, doc: &Document) -> Result<()> {
        conn.execute(
            "INSERT INTO documents \
             (id, short_id, user_id, title, created_at, updated_at, deleted_at, \
              dirty, local_updated_at, server_updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
                short_id = excluded.short_id, user_id = excluded.user_id, \
                title = excluded.title, created_at = excluded.created_at, \
                updated_at = excluded.updated_at, deleted_at = excluded.deleted_at, \
                dirty = excluded.dirty, local_updated_at = excluded.local_updated_at, \
                server_updated_at = excluded.server_updated_at",
            params![
                doc.id.to_string(),
                doc.short_id,
                doc.user_id,
                doc.title,
                format_timestamp(doc.created_at),
                format_timestamp(doc.updated_at),
                doc.deleted_at.map(format_timestamp),
                doc.dirty,
                doc.local_updated_at.map(format_timestamp),
                doc.server_updated_at.map(format_timestamp),
            ],
        )
        .context("failed to upsert documents row")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Document>> {
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .context("failed to prepare documents by id query")?;

        let mut rows = stmt
            .query_map(params![id.to_string()], row_to_document)
            .context("failed to query documents by id")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to decode documents row")?)),
            None => Ok(None),
        }
    }

    pub fn get_by_short_id(conn: &Connection, short_id: &str) -> Result<Option<Document>> {
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE short_id = ?1"))
            .context("failed to prepare documents by short id query")?;

        let mut rows = stmt
            .query_map(params![short_id], row_to_document)
            .context("failed to query documents by short id")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to decode documents row")?)),
            None => Ok(None),
        }
    }

    /// Live (not soft-deleted) documents of a user, most recently edited first.
    pub fn list_by_user(conn: &Connection, user_id: &str) -> Result<Vec<Document>> {
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE user_id = ?1 AND deleted_at IS NULL \
                 ORDER BY updated_at DESC, id ASC"
            ))
            .context("failed to prepare documents by user query")?;

        let rows = stmt
            .query_map(params![user_id], row_to_document)
            .context("failed to query documents by user")?;

        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect documents rows")
    }

    /// Record a local title change and flag the document dirty.
    pub fn set_title(conn: &Connection, id: Uuid, title: &str, now: DateTime<Utc>) -> Result<bool> {
        let ts = format_timestamp(now);
        let changed = conn
            .execute(
                "UPDATE documents SET title = ?1, updated_at = ?2, local_updated_at = ?2, \
                 dirty = 1 WHERE id = ?3",
                params![title, ts, id.to_string()],
            )
            .context("failed to update document title")?;
        Ok(changed > 0)
    }

    /// Soft-delete: the row stays until the deletion reaches the remote store.
    pub fn mark_deleted(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let ts = format_timestamp(now);
        let changed = conn
            .execute(
                "UPDATE documents SET deleted_at = ?1, updated_at = ?1, local_updated_at = ?1, \
                 dirty = 1 WHERE id = ?2 AND deleted_at IS NULL",
                params![ts, id.to_string()],
            )
            .context("failed to soft-delete document")?;
        Ok(changed > 0)
    }

    /// Advance the sync baseline without touching the dirty flag.
    pub fn set_baseline(conn: &Connection, id: Uuid, server_updated_at: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE documents SET server_updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(server_updated_at), id.to_string()],
        )
        .context("failed to record document sync baseline")?;
        Ok(())
    }

    /// Clear the dirty flag if nothing changed since `uploaded_local_updated_at`.
    pub fn mark_clean(
        conn: &Connection,
        id: Uuid,
        uploaded_local_updated_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE documents SET dirty = 0 WHERE id = ?1 AND local_updated_at IS ?2",
                params![id.to_string(), uploaded_local_updated_at.map(format_timestamp)],
            )
            .context("failed to clear document dirty flag")?;
        Ok(changed > 0)
    }

    pub fn is_dirty(conn: &Connection, id: Uuid) -> Result<bool> {
        let dirty: Option<bool> = conn
            .query_row(
                "SELECT dirty FROM documents WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read document dirty flag")?;
        Ok(dirty.unwrap_or(false))
    }

    pub fn delete(conn: &Connection, id: Uuid) -> Result<bool> {
        let changed = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
            .context("failed to delete documents row")?;
        Ok(changed > 0)
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: uuid_column(row, 0)?,
        short_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        created_at: ts_column(row, 4)?,
        updated_at: ts_column(row, 5)?,
        deleted_at: opt_ts_column(row, 6)?,
        dirty: row.get(7)?,
        local_updated_at: opt_ts_column(row, 8)?,
        server_updated_at: opt_ts_column(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use mindsync_common::time::now_utc;

    use super::*;
    use crate::store::LocalDb;

    fn setup() -> LocalDb {
        LocalDb::open_in_memory().expect("local store should open")
    }

    #[test]
    fn put_and_get_round_trip() {
        let db = setup();
        let doc = Document::new("user-1", "Roadmap", now_utc());

        DocumentStore::put(db.connection(), &doc).expect("put should succeed");
        let loaded = DocumentStore::get(db.connection(), doc.id)
            .expect("query should succeed")
            .expect("row should exist");
        assert_eq!(loaded, doc);

        let by_short = DocumentStore::get_by_short_id(db.connection(), &doc.short_id)
            .expect("query should succeed")
            .expect("row should exist");
        assert_eq!(by_short.id, doc.id);
    }

    #[test]
    fn get_missing_returns_none() {
        let db = setup();
        assert!(DocumentStore::get(db.connection(), Uuid::new_v4()).expect("query").is_none());
        assert!(!DocumentStore::is_dirty(db.connection(), Uuid::new_v4()).expect("dirty query"));
    }

    #[test]
    fn set_title_flags_dirty_but_keeps_baseline() {
        let db = setup();
        let now = now_utc();
        let mut doc = Document::new("user-1", "Old", now);
        doc.dirty = false;
        doc.server_updated_at = Some(now);
        DocumentStore::put(db.connection(), &doc).expect("put");

        let later = now + chrono::Duration::seconds(3);
        assert!(DocumentStore::set_title(db.connection(), doc.id, "New", later).expect("set"));

        let loaded = DocumentStore::get(db.connection(), doc.id).expect("get").expect("row");
        assert_eq!(loaded.title, "New");
        assert!(loaded.dirty);
        assert_eq!(loaded.local_updated_at, Some(later));
        assert_eq!(loaded.server_updated_at, Some(now));
    }

    #[test]
    fn mark_clean_requires_matching_local_timestamp() {
        let db = setup();
        let now = now_utc();
        let doc = Document::new("user-1", "Doc", now);
        DocumentStore::put(db.connection(), &doc).expect("put");

        let stale = Some(now - chrono::Duration::seconds(1));
        assert!(!DocumentStore::mark_clean(db.connection(), doc.id, stale).expect("stale clean"));
        assert!(DocumentStore::is_dirty(db.connection(), doc.id).expect("dirty"));

        assert!(DocumentStore::mark_clean(db.connection(), doc.id, Some(now)).expect("clean"));
        assert!(!DocumentStore::is_dirty(db.connection(), doc.id).expect("dirty"));
    }

    #[test]
    fn list_by_user_skips_soft_deleted_documents() {
        let db = setup();
        let now = now_utc();
        let kept = Document::new("user-1", "Kept", now);
        let removed = Document::new("user-1", "Removed", now);
        let foreign = Document::new("user-2", "Foreign", now);
        for doc in [&kept, &removed, &foreign] {
            DocumentStore::put(db.connection(), doc).expect("put");
        }
        assert!(DocumentStore::mark_deleted(db.connection(), removed.id, now).expect("delete"));
        assert!(!DocumentStore::mark_deleted(db.connection(), removed.id, now).expect("twice"));

        let listed = DocumentStore::list_by_user(db.connection(), "user-1").expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);
    }
}
