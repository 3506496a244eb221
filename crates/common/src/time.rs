// Timestamp helpers.
//
// Timestamps are persisted as fixed-width RFC 3339 text at microsecond
// precision so lexical order matches chronological order in SQLite.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Current time, truncated to the persisted precision.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|parsed| parsed.with_timezone(&Utc))
}
