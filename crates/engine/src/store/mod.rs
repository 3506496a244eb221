// Local persistence: SQLite store for documents, nodes and the operation log.

pub mod documents;
pub mod local_db;
pub mod nodes;
pub mod oplog;

use chrono::{DateTime, Utc};
use mindsync_common::time::parse_timestamp;
use rusqlite::types::Type;
use uuid::Uuid;

pub use documents::DocumentStore;
pub use local_db::LocalDb;
pub use nodes::NodeStore;
pub use oplog::OperationLog;

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::other(message)),
    )
}

pub(crate) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|error| conversion_error(idx, error.to_string()))
}

pub(crate) fn opt_uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| Uuid::parse_str(&raw).map_err(|error| conversion_error(idx, error.to_string())))
        .transpose()
}

pub(crate) fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp `{raw}`")))
}

pub(crate) fn opt_ts_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_timestamp(&raw)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp `{raw}`")))
    })
    .transpose()
}
