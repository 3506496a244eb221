use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Transaction};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE documents (
    id                  TEXT PRIMARY KEY,
    short_id            TEXT NOT NULL UNIQUE,
    user_id             TEXT NOT NULL,
    title               TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    deleted_at          TEXT NULL,
    dirty               INTEGER NOT NULL DEFAULT 1,
    local_updated_at    TEXT NULL,
    server_updated_at   TEXT NULL
);

CREATE INDEX documents_user_idx
    ON documents (user_id);

CREATE TABLE nodes (
    id                  TEXT PRIMARY KEY,
    mindmap_id          TEXT NOT NULL,
    parent_id           TEXT NULL,
    order_index         INTEGER NOT NULL,
    title               TEXT NOT NULL,
    content             TEXT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    dirty               INTEGER NOT NULL DEFAULT 1,
    local_updated_at    TEXT NULL,
    deleted             INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX nodes_mindmap_idx
    ON nodes (mindmap_id);

CREATE INDEX nodes_parent_idx
    ON nodes (parent_id);

CREATE TABLE operation_log (
    seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
    id                  TEXT NOT NULL UNIQUE,
    mindmap_id          TEXT NOT NULL,
    batch_id            TEXT NOT NULL,
    target_id           TEXT NOT NULL,
    kind                TEXT NOT NULL,
    timestamp           TEXT NOT NULL,
    before_state        TEXT NOT NULL,
    after_state         TEXT NOT NULL,
    is_undone           INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX operation_log_mindmap_idx
    ON operation_log (mindmap_id, timestamp);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// The client-side SQLite store holding documents, nodes and the operation log.
#[derive(Debug)]
pub struct LocalDb {
    conn: Connection,
}

impl LocalDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create local store parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open local store at `{}`", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("failed to configure sqlite pragmas for local store")?;

        Self::from_connection(conn)
    }

    /// Volatile store for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory local store")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a transaction spanning all three record families.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn.transaction().context("failed to start local store transaction")
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply local store migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
