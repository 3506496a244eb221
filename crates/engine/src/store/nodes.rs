// `nodes` family: flat node rows keyed by id, indexed by owning document and parent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mindsync_common::time::format_timestamp;
use mindsync_common::Node;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{opt_ts_column, opt_uuid_column, ts_column, uuid_column};

const SELECT_COLUMNS: &str = "SELECT id, mindmap_id, parent_id, order_index, title, content, \
                              created_at, updated_at, dirty, local_updated_at, deleted \
                              FROM nodes";

/// CRUD operations for `nodes`.
pub struct NodeStore;

impl NodeStore {
    /// Insert or fully replace a node row.
    pub fn put(conn: &Connection, node: &Node) -> Result<()> {
        conn.execute(
            "INSERT INTO nodes \
             (id, mindmap_id, parent_id, order_index, title, content, created_at, updated_at, \
              dirty, local_updated_at, deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(id) DO UPDATE SET \
                mindmap_id = excluded.mindmap_id, parent_id = excluded.parent_id, \
                order_index = excluded.order_index, title = excluded.title, \
                content = excluded.content, created_at = excluded.created_at, \
                updated_at = excluded.updated_at, dirty = excluded.dirty, \
                local_updated_at = excluded.local_updated_at, deleted = excluded.deleted",
            params![
                node.id.to_string(),
                node.mindmap_id.to_string(),
                node.parent_id.map(|id| id.to_string()),
                node.order_index,
                node.title,
                node.content,
                format_timestamp(node.created_at),
                format_timestamp(node.updated_at),
                node.dirty,
                node.local_updated_at.map(format_timestamp),
                node.deleted,
            ],
        )
        .context("failed to upsert nodes row")?;
        Ok(())
    }

    /// Write a locally edited node: dirty, not tombstoned, stamped with `now`.
    pub fn put_local_edit(conn: &Connection, node: &Node, now: DateTime<Utc>) -> Result<()> {
        let stamped = Node {
            updated_at: now,
            dirty: true,
            local_updated_at: Some(now),
            deleted: false,
            ..node.clone()
        };
        Self::put(conn, &stamped)
    }

    pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Node>> {
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .context("failed to prepare nodes by id query")?;

        let mut rows =
            stmt.query_map(params![id.to_string()], row_to_node).context("failed to query nodes by id")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to decode nodes row")?)),
            None => Ok(None),
        }
    }

    /// All rows of a document, tombstones included.
    pub fn list_by_mindmap(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<Node>> {
        Self::query_list(
            conn,
            &format!("{SELECT_COLUMNS} WHERE mindmap_id = ?1 ORDER BY order_index ASC, id ASC"),
            &mindmap_id.to_string(),
        )
    }

    /// Rows that make up the visible tree of a document.
    pub fn list_live_by_mindmap(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<Node>> {
        Self::query_list(
            conn,
            &format!(
                "{SELECT_COLUMNS} WHERE mindmap_id = ?1 AND deleted = 0 \
                 ORDER BY order_index ASC, id ASC"
            ),
            &mindmap_id.to_string(),
        )
    }

    pub fn list_children(conn: &Connection, parent_id: Uuid) -> Result<Vec<Node>> {
        Self::query_list(
            conn,
            &format!(
                "{SELECT_COLUMNS} WHERE parent_id = ?1 AND deleted = 0 \
                 ORDER BY order_index ASC, id ASC"
            ),
            &parent_id.to_string(),
        )
    }

    pub fn list_dirty(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<Node>> {
        Self::query_list(
            conn,
            &format!(
                "{SELECT_COLUMNS} WHERE mindmap_id = ?1 AND dirty = 1 \
                 ORDER BY created_at ASC, id ASC"
            ),
            &mindmap_id.to_string(),
        )
    }

    pub fn has_dirty(conn: &Connection, mindmap_id: Uuid) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE mindmap_id = ?1 AND dirty = 1",
                params![mindmap_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count dirty nodes")?;
        Ok(count > 0)
    }

    /// Mark a node deleted locally; the row is removed once the remote delete succeeds.
    pub fn tombstone(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let ts = format_timestamp(now);
        let changed = conn
            .execute(
                "UPDATE nodes SET deleted = 1, dirty = 1, updated_at = ?1, local_updated_at = ?1 \
                 WHERE id = ?2",
                params![ts, id.to_string()],
            )
            .context("failed to tombstone node")?;
        Ok(changed > 0)
    }

    /// Clear the dirty flag if the row was not edited again after the upload.
    pub fn mark_clean(
        conn: &Connection,
        id: Uuid,
        uploaded_local_updated_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE nodes SET dirty = 0 WHERE id = ?1 AND local_updated_at IS ?2",
                params![id.to_string(), uploaded_local_updated_at.map(format_timestamp)],
            )
            .context("failed to clear node dirty flag")?;
        Ok(changed > 0)
    }

    /// Hard-delete a tombstone whose remote deletion was confirmed.
    pub fn purge_tombstone(
        conn: &Connection,
        id: Uuid,
        uploaded_local_updated_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "DELETE FROM nodes WHERE id = ?1 AND deleted = 1 AND local_updated_at IS ?2",
                params![id.to_string(), uploaded_local_updated_at.map(format_timestamp)],
            )
            .context("failed to purge node tombstone")?;
        Ok(changed > 0)
    }

    pub fn delete_by_mindmap(conn: &Connection, mindmap_id: Uuid) -> Result<usize> {
        conn.execute("DELETE FROM nodes WHERE mindmap_id = ?1", params![mindmap_id.to_string()])
            .context("failed to delete nodes of document")
    }

    fn query_list(conn: &Connection, sql: &str, key: &str) -> Result<Vec<Node>> {
        let mut stmt = conn.prepare(sql).context("failed to prepare nodes list query")?;
        let rows = stmt.query_map(params![key], row_to_node).context("failed to query nodes")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect nodes rows")
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: uuid_column(row, 0)?,
        mindmap_id: uuid_column(row, 1)?,
        parent_id: opt_uuid_column(row, 2)?,
        order_index: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        created_at: ts_column(row, 6)?,
        updated_at: ts_column(row, 7)?,
        dirty: row.get(8)?,
        local_updated_at: opt_ts_column(row, 9)?,
        deleted: row.get(10)?,
    })
}
