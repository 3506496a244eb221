// mindsync-engine: local-first mind map editing with undo history and remote sync.

pub mod action;
pub mod config;
pub mod engine;
pub mod history;
pub mod logging;
pub mod persist;
pub mod remote;
pub mod state;
pub mod status;
pub mod store;
pub mod sync;

pub use action::{Command, CommandError};
pub use config::EngineConfig;
pub use engine::{EngineError, MindMapEngine};
pub use history::HistoryState;
pub use remote::{InMemoryRemote, RemoteStore};
pub use status::SaveStatus;
pub use store::LocalDb;
pub use sync::{ConflictResolution, SyncError, SyncReport};
