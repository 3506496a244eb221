// Engine configuration.
//
// Global config: `~/.mindsync/config.toml`
// Default local store: `~/.mindsync/mindsync.db`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root directory for mindsync state: `~/.mindsync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mindsync"))
}

/// Path to the global config file: `~/.mindsync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Engine config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub history: HistoryConfig,
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Load from `~/.mindsync/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to `~/.mindsync/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Owner recorded on documents created by this client.
    pub fn user_id(&self) -> &str {
        self.sync.user_id.as_deref().unwrap_or(DEFAULT_USER_ID)
    }
}

pub const DEFAULT_USER_ID: &str = "local";

/// Local store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file; defaults to `~/.mindsync/mindsync.db`.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| global_dir().map(|d| d.join("mindsync.db")))
    }
}

/// Undo history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Log entries kept per document; older batches are trimmed.
    pub max_entries: usize,
    /// Drop redoable entries when a new edit is recorded.
    pub discard_redo_on_edit: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 500, discard_redo_on_edit: true }
    }
}

/// Remote sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for each remote call.
    pub timeout_ms: u64,
    pub user_id: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { timeout_ms: 15_000, user_id: None }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
}
