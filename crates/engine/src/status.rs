// Save-status state machine shown to the UI.
//
//   saved → local_only → syncing → saved        (happy path)
//                                → sync_failed  (retry later or re-authenticate)
//                                → conflict     (needs a resolution)
//
// Detailed error kinds only feed the transition; the UI sees a message and a
// retryable flag.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::{SyncError, SyncReport};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SaveStatus {
    #[default]
    Saved,
    LocalOnly,
    Syncing,
    SyncFailed {
        message: String,
        retryable: bool,
    },
    Conflict {
        server_updated_at: DateTime<Utc>,
        local_updated_at: Option<DateTime<Utc>>,
    },
}

impl SaveStatus {
    /// Status for a freshly opened document.
    pub fn from_dirty(dirty: bool) -> Self {
        if dirty {
            Self::LocalOnly
        } else {
            Self::Saved
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::LocalOnly => "local_only",
            Self::Syncing => "syncing",
            Self::SyncFailed { .. } => "sync_failed",
            Self::Conflict { .. } => "conflict",
        }
    }

    /// A local edit was recorded. An unresolved conflict stays visible.
    pub fn local_edit(&mut self) {
        if !matches!(self, Self::Conflict { .. }) {
            *self = Self::LocalOnly;
        }
    }

    pub fn sync_started(&mut self) {
        *self = Self::Syncing;
    }

    /// `still_dirty` reports whether changes remain pending after the pass.
    pub fn sync_finished(&mut self, result: &Result<SyncReport, SyncError>, still_dirty: bool) {
        *self = match result {
            Ok(_) => Self::from_dirty(still_dirty),
            Err(SyncError::Conflict { server_updated_at, local_updated_at, .. }) => Self::Conflict {
                server_updated_at: *server_updated_at,
                local_updated_at: *local_updated_at,
            },
            Err(error) => Self::SyncFailed {
                message: error.to_string(),
                retryable: error.is_retryable(),
            },
        };
    }

    pub fn message(&self) -> String {
        match self {
            Self::Saved => "All changes saved".to_string(),
            Self::LocalOnly => "Saved on this device".to_string(),
            Self::Syncing => "Saving…".to_string(),
            Self::SyncFailed { message, .. } => format!("Sync failed: {message}"),
            Self::Conflict { server_updated_at, .. } => {
                format!("Changed elsewhere at {server_updated_at}")
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SyncFailed { retryable: true, .. })
    }
}
