// `operation_log` family: append-only record of reversible mutations.
//
// Rows are immutable apart from `is_undone`. They leave the table only through
// explicit trimming: retention limits, redo invalidation, or a full reset when
// local changes are discarded in favour of the remote copy.

use anyhow::{anyhow, Context, Result};
use mindsync_common::time::format_timestamp;
use mindsync_common::{OpLogEntry, OperationKind, Projection};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ts_column, uuid_column};

const SELECT_COLUMNS: &str = "SELECT seq, id, mindmap_id, batch_id, target_id, kind, timestamp, \
                              before_state, after_state, is_undone \
                              FROM operation_log";

const ORDER: &str = "ORDER BY timestamp ASC, seq ASC";

/// Access to the persisted operation log.
pub struct OperationLog;

impl OperationLog {
    /// Append an entry. The stored `seq` is assigned by SQLite and returned.
    pub fn append(conn: &Connection, entry: &OpLogEntry) -> Result<i64> {
        conn.execute(
            "INSERT INTO operation_log \
             (id, mindmap_id, batch_id, target_id, kind, timestamp, before_state, after_state, \
              is_undone) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id.to_string(),
                entry.mindmap_id.to_string(),
                entry.batch_id.to_string(),
                entry.target_id.to_string(),
                entry.kind.as_str(),
                format_timestamp(entry.timestamp),
                entry.before.encode(),
                entry.after.encode(),
                entry.is_undone,
            ],
        )
        .context("failed to append operation log entry")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<OpLogEntry>> {
        Self::query(conn, &format!("{SELECT_COLUMNS} WHERE mindmap_id = ?1 {ORDER}"), mindmap_id)
    }

    /// Entries still in effect, oldest first.
    pub fn active(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<OpLogEntry>> {
        Self::query(
            conn,
            &format!("{SELECT_COLUMNS} WHERE mindmap_id = ?1 AND is_undone = 0 {ORDER}"),
            mindmap_id,
        )
    }

    /// Undone entries, oldest first.
    pub fn undone(conn: &Connection, mindmap_id: Uuid) -> Result<Vec<OpLogEntry>> {
        Self::query(
            conn,
            &format!("{SELECT_COLUMNS} WHERE mindmap_id = ?1 AND is_undone = 1 {ORDER}"),
            mindmap_id,
        )
    }

    pub fn count(conn: &Connection, mindmap_id: Uuid, is_undone: bool) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM operation_log WHERE mindmap_id = ?1 AND is_undone = ?2",
            params![mindmap_id.to_string(), is_undone],
            |row| row.get(0),
        )
        .context("failed to count operation log entries")
    }

    /// Flip the undone flag on the given entries. Returns the number of rows touched.
    pub fn set_undone(conn: &Connection, ids: &[Uuid], is_undone: bool) -> Result<usize> {
        let mut stmt = conn
            .prepare("UPDATE operation_log SET is_undone = ?1 WHERE id = ?2")
            .context("failed to prepare undo flag update")?;

        let mut touched = 0usize;
        for id in ids {
            touched += stmt
                .execute(params![is_undone, id.to_string()])
                .context("failed to update undo flag")?;
        }
        Ok(touched)
    }

    /// Drop every undone entry of a document; they can no longer be redone.
    pub fn discard_undone(conn: &Connection, mindmap_id: Uuid) -> Result<usize> {
        conn.execute(
            "DELETE FROM operation_log WHERE mindmap_id = ?1 AND is_undone = 1",
            params![mindmap_id.to_string()],
        )
        .context("failed to discard undone operation log entries")
    }

    /// Keep at most `max_entries` of the newest entries, removing whole batches.
    /// `keep_batch` is never removed, even when it alone exceeds the limit.
    pub fn trim(
        conn: &Connection,
        mindmap_id: Uuid,
        max_entries: usize,
        keep_batch: Option<Uuid>,
    ) -> Result<usize> {
        let offset = i64::try_from(max_entries).unwrap_or(i64::MAX);
        conn.execute(
            "DELETE FROM operation_log WHERE mindmap_id = ?1 \
             AND (?3 IS NULL OR batch_id <> ?3) AND batch_id IN ( \
                 SELECT batch_id FROM operation_log WHERE mindmap_id = ?1 AND (timestamp, seq) <= ( \
                     SELECT timestamp, seq FROM operation_log WHERE mindmap_id = ?1 \
                     ORDER BY timestamp DESC, seq DESC LIMIT 1 OFFSET ?2 \
                 ) \
             )",
            params![mindmap_id.to_string(), offset, keep_batch.map(|id| id.to_string())],
        )
        .context("failed to trim operation log")
    }

    pub fn clear(conn: &Connection, mindmap_id: Uuid) -> Result<usize> {
        conn.execute(
            "DELETE FROM operation_log WHERE mindmap_id = ?1",
            params![mindmap_id.to_string()],
        )
        .context("failed to clear operation log")
    }

    fn query(conn: &Connection, sql: &str, mindmap_id: Uuid) -> Result<Vec<OpLogEntry>> {
        let mut stmt = conn.prepare(sql).context("failed to prepare operation log query")?;
        let rows = stmt
            .query_map(params![mindmap_id.to_string()], row_to_raw)
            .context("failed to query operation log")?;

        let mut entries = Vec::new();
        for row in rows {
            let raw = row.context("failed to decode operation log row")?;
            entries.push(raw.into_entry()?);
        }
        Ok(entries)
    }
}

/// Row with undecoded kind and projections.
struct RawEntry {
    entry: OpLogEntry,
    kind: String,
    before: String,
    after: String,
}

impl RawEntry {
    fn into_entry(self) -> Result<OpLogEntry> {
        let RawEntry { mut entry, kind, before, after } = self;
        entry.kind = OperationKind::parse(&kind)
            .ok_or_else(|| anyhow!("unknown operation kind `{kind}` in entry {}", entry.id))?;
        entry.before = Projection::decode(&before)
            .with_context(|| format!("invalid `before` projection in entry {}", entry.id))?;
        entry.after = Projection::decode(&after)
            .with_context(|| format!("invalid `after` projection in entry {}", entry.id))?;
        Ok(entry)
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        entry: OpLogEntry {
            seq: row.get(0)?,
            id: uuid_column(row, 1)?,
            mindmap_id: uuid_column(row, 2)?,
            batch_id: uuid_column(row, 3)?,
            target_id: uuid_column(row, 4)?,
            kind: OperationKind::AddNode,
            timestamp: ts_column(row, 6)?,
            before: Projection::empty(),
            after: Projection::empty(),
            is_undone: row.get(9)?,
        },
        kind: row.get(5)?,
        before: row.get(7)?,
        after: row.get(8)?,
    })
}
