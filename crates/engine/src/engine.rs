// Engine facade: the surface a UI drives.
//
// Holds one open document session: the editor state the user sees plus the
// last tree known to be in the Local Store. Commands mutate memory first; the
// auto-persister then catches the store up. Persistence failures never undo
// an edit, they only delay durability until the next successful write.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use mindsync_common::time::now_utc;
use mindsync_common::{Document, Node, ProjectionError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{apply_all, Action, Command, CommandError};
use crate::config::EngineConfig;
use crate::history::{HistoryManager, HistoryState};
use crate::persist::{AutoPersister, PersistOutcome};
use crate::remote::RemoteStore;
use crate::state::{EditMode, EditorState, MindMapTree, TreeError};
use crate::status::SaveStatus;
use crate::store::{DocumentStore, LocalDb, NodeStore};
use crate::sync::{ConflictResolution, SyncError, SyncManager, SyncReport};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no document is open")]
    NoOpenDocument,
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
    #[error("document {id} has an invalid tree: {source}")]
    InvalidTree {
        id: Uuid,
        #[source]
        source: TreeError,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("operation log entry cannot be replayed: {0}")]
    Replay(#[from] ProjectionError),
    #[error("local store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryDirection {
    Undo,
    Redo,
}

struct Session {
    document_id: Uuid,
    state: EditorState,
    /// Last tree successfully written to the Local Store.
    persisted: MindMapTree,
}

pub struct MindMapEngine<R> {
    db: LocalDb,
    config: EngineConfig,
    persister: AutoPersister,
    history: HistoryManager,
    sync: SyncManager<R>,
    session: Option<Session>,
    status: SaveStatus,
}

impl<R: RemoteStore> MindMapEngine<R> {
    pub fn new(db: LocalDb, remote: R, config: EngineConfig) -> Self {
        Self {
            persister: AutoPersister::new(&config.history),
            sync: SyncManager::new(remote, &config.sync),
            history: HistoryManager::new(),
            session: None,
            status: SaveStatus::default(),
            db,
            config,
        }
    }

    /// Open the Local Store named by `config`.
    pub fn open(config: EngineConfig, remote: R) -> Result<Self, EngineError> {
        let path = config
            .store
            .resolved_path()
            .ok_or_else(|| anyhow!("could not determine local store path"))?;
        let db = LocalDb::open(&path)?;
        info!(path = %path.display(), "opened local store");
        Ok(Self::new(db, remote, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_db(&self) -> &LocalDb {
        &self.db
    }

    pub fn remote(&self) -> &R {
        self.sync.remote()
    }

    pub fn state(&self) -> Option<&EditorState> {
        self.session.as_ref().map(|session| &session.state)
    }

    pub fn current_document_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|session| session.document_id)
    }

    pub fn save_status(&self) -> &SaveStatus {
        &self.status
    }

    // ── Documents ──────────────────────────────────────────────────

    /// Create a document with a root node titled `title` and open it.
    pub fn create_document(&mut self, title: &str) -> Result<Document, EngineError> {
        self.flush()?;
        let now = now_utc();
        let doc = Document::new(self.config.user_id(), title, now);
        let root = Node::new(doc.id, None, 0, title, now);

        let tx = self.db.transaction()?;
        DocumentStore::put(&tx, &doc)?;
        NodeStore::put(&tx, &root)?;
        tx.commit().context("failed to commit new document")?;
        info!(doc_id = %doc.id, short_id = %doc.short_id, "created document");

        self.load_session(doc.id)?;
        self.status = SaveStatus::LocalOnly;
        Ok(doc)
    }

    pub fn open_document(&mut self, id: Uuid) -> Result<&EditorState, EngineError> {
        self.flush()?;
        self.load_session(id)
    }

    pub fn close_document(&mut self) -> Result<(), EngineError> {
        self.flush()?;
        self.session = None;
        Ok(())
    }

    /// Soft-delete a document. Returns `false` if it was already deleted.
    pub fn delete_document(&mut self, id: Uuid) -> Result<bool, EngineError> {
        let was_open = self.current_document_id() == Some(id);
        if was_open {
            self.close_document()?;
        }
        if DocumentStore::get(self.db.connection(), id)?.is_none() {
            return Err(EngineError::DocumentNotFound(id));
        }

        let deleted = DocumentStore::mark_deleted(self.db.connection(), id, now_utc())?;
        if deleted {
            info!(doc_id = %id, "soft-deleted document");
            if was_open {
                self.status.local_edit();
            }
        }
        Ok(deleted)
    }

    /// Live documents of the configured user.
    pub fn list_documents(&self) -> Result<Vec<Document>, EngineError> {
        Ok(DocumentStore::list_by_user(self.db.connection(), self.config.user_id())?)
    }

    pub fn document(&self, id: Uuid) -> Result<Option<Document>, EngineError> {
        Ok(DocumentStore::get(self.db.connection(), id)?)
    }

    fn load_session(&mut self, id: Uuid) -> Result<&EditorState, EngineError> {
        let doc = DocumentStore::get(self.db.connection(), id)?
            .filter(|doc| !doc.is_deleted())
            .ok_or(EngineError::DocumentNotFound(id))?;
        let nodes = NodeStore::list_live_by_mindmap(self.db.connection(), id)?;
        let tree = MindMapTree::from_nodes(doc.id, nodes);
        tree.validate().map_err(|source| EngineError::InvalidTree { id, source })?;

        self.history.invalidate(id);
        self.status = SaveStatus::from_dirty(self.store_dirty(id)?);
        debug!(doc_id = %id, nodes = tree.len(), "opened document");

        let session = self.session.insert(Session {
            document_id: id,
            persisted: tree.clone(),
            state: EditorState::new(tree),
        });
        Ok(&session.state)
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Run a command against the open document. Returns whether the document changed.
    pub fn execute_command(&mut self, command: Command) -> Result<bool, EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NoOpenDocument)?;
        let now = now_utc();

        let actions = command.plan(&session.state.tree, now);
        let applied = apply_all(&actions, &mut session.state.tree);
        update_ui_state(&command, &actions, &mut session.state);
        session.state.forget_missing();
        debug!(doc_id = %session.document_id, command = command.id(), applied, "executed command");

        if applied == 0 {
            return Ok(false);
        }
        self.status.local_edit();
        self.persist_pending(now);
        Ok(true)
    }

    /// Run a command given by its UI id and JSON parameters.
    pub fn execute_command_by_id(
        &mut self,
        command_id: &str,
        params: Value,
    ) -> Result<bool, EngineError> {
        let command = Command::from_id(command_id, params)?;
        self.execute_command(command)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write any in-memory changes not yet in the Local Store.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.try_persist(now_utc())?;
        Ok(())
    }

    /// Persist after a mutation. A failure is logged and retried on the next one.
    fn persist_pending(&mut self, now: DateTime<Utc>) -> bool {
        match self.try_persist(now) {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    doc_id = ?self.current_document_id(),
                    error = format!("{error:#}"),
                    "failed to persist edit; keeping it in memory"
                );
                false
            }
        }
    }

    fn try_persist(&mut self, now: DateTime<Utc>) -> anyhow::Result<Option<PersistOutcome>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let outcome =
            self.persister.persist(&mut self.db, &session.persisted, &session.state.tree, now)?;
        session.persisted = session.state.tree.clone();
        if outcome.batch_id.is_some() {
            self.history.invalidate(session.document_id);
        }
        Ok(Some(outcome))
    }

    /// Whether the document, its nodes, or unpersisted in-memory edits are pending sync.
    pub fn has_dirty_data(&self, id: Uuid) -> Result<bool, EngineError> {
        let unpersisted = self.session.as_ref().is_some_and(|session| {
            session.document_id == id && !session.persisted.same_content(&session.state.tree)
        });
        Ok(unpersisted || self.store_dirty(id)?)
    }

    fn store_dirty(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(DocumentStore::is_dirty(self.db.connection(), id)?
            || NodeStore::has_dirty(self.db.connection(), id)?)
    }

    // ── History ────────────────────────────────────────────────────

    /// Undo the newest step. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        self.step_history(HistoryDirection::Undo)
    }

    /// Redo the oldest undone step. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, EngineError> {
        self.step_history(HistoryDirection::Redo)
    }

    pub fn history_state(&mut self) -> Result<HistoryState, EngineError> {
        let id = self.current_document_id().ok_or(EngineError::NoOpenDocument)?;
        Ok(self.history.state(self.db.connection(), id)?)
    }

    fn step_history(&mut self, direction: HistoryDirection) -> Result<bool, EngineError> {
        let now = now_utc();
        self.try_persist(now)?;

        let session = self.session.as_mut().ok_or(EngineError::NoOpenDocument)?;
        let document_id = session.document_id;
        let before = session.state.tree.clone();

        let result = replay_step(
            &mut self.db,
            &mut self.history,
            &mut session.state.tree,
            document_id,
            direction,
            now,
        );
        match result {
            Ok(true) => {
                session.persisted = session.state.tree.clone();
                session.state.forget_missing();
                self.status.local_edit();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(error) => {
                session.state.tree = before;
                self.history.invalidate(document_id);
                warn!(doc_id = %document_id, ?direction, %error, "history step failed");
                Err(error)
            }
        }
    }

    // ── Sync ───────────────────────────────────────────────────────

    pub async fn sync_document(
        &mut self,
        id: Uuid,
        resolution: Option<ConflictResolution>,
    ) -> Result<SyncReport, SyncError> {
        // The save status describes the open document only.
        let is_open = self.current_document_id() == Some(id);
        if is_open {
            self.try_persist(now_utc())?;
            self.status.sync_started();
        }

        let result = self.sync.sync_document(&mut self.db, id, resolution).await;

        if let Ok(report) = &result {
            if report.discarded_local || report.document_removed {
                self.history.invalidate(id);
            }
            if is_open {
                if report.document_removed {
                    self.session = None;
                } else if report.discarded_local {
                    let reloaded = self.load_session(id).map(|_| ());
                    if let Err(error) = reloaded {
                        warn!(doc_id = %id, %error, "failed to reload document after discarding local copy");
                        self.session = None;
                    }
                }
            }
        }

        if is_open {
            let still_dirty = self.has_dirty_data(id).unwrap_or(true);
            self.status.sync_finished(&result, still_dirty);
        }
        result
    }
}

/// Selection and edit-mode changes driven by a command.
fn update_ui_state(command: &Command, actions: &[Action], state: &mut EditorState) {
    match command {
        Command::SelectNode { node_id } => {
            state.selected = node_id.filter(|id| state.tree.contains(*id));
        }
        Command::EnterEditMode { node_id } if state.tree.contains(*node_id) => {
            state.selected = Some(*node_id);
            state.edit_mode = EditMode::Editing { node_id: *node_id };
        }
        Command::ExitEditMode => state.edit_mode = EditMode::Idle,
        Command::AddChild { .. } | Command::AddSibling { .. } => {
            if let Some(Action::AddNode(node)) = actions.first() {
                if state.tree.contains(node.id) {
                    state.selected = Some(node.id);
                    state.edit_mode = EditMode::Editing { node_id: node.id };
                }
            }
        }
        _ => {}
    }
}

/// Flip one history step in the log and apply its physical effect, in one transaction.
fn replay_step(
    db: &mut LocalDb,
    history: &mut HistoryManager,
    tree: &mut MindMapTree,
    document_id: Uuid,
    direction: HistoryDirection,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let tx = db.transaction()?;
    let step = match direction {
        HistoryDirection::Undo => history.undo(&tx, document_id)?,
        HistoryDirection::Redo => history.redo(&tx, document_id)?,
    };
    let Some(step) = step else {
        return Ok(false);
    };

    let forward = step
        .entries
        .iter()
        .map(|entry| Action::from_entry(entry, now))
        .collect::<Result<Vec<_>, _>>()?;
    let actions: Vec<Action> = match direction {
        HistoryDirection::Undo => forward.iter().rev().map(Action::reverse).collect(),
        HistoryDirection::Redo => forward,
    };

    for action in &actions {
        if action.apply(tree) {
            action.persist(&tx, tree, now)?;
        } else {
            debug!(doc_id = %document_id, kind = action.kind().as_str(), "skipped stale history action");
        }
    }
    tx.commit().context("failed to commit history step")?;
    debug!(doc_id = %document_id, ?direction, batch_id = %step.batch_id, "replayed history step");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::remote::InMemoryRemote;

    fn engine() -> MindMapEngine<InMemoryRemote> {
        let db = LocalDb::open_in_memory().expect("open");
        MindMapEngine::new(db, InMemoryRemote::new(), EngineConfig::default())
    }

    fn root_id(engine: &MindMapEngine<InMemoryRemote>) -> Uuid {
        engine.state().and_then(|state| state.tree.root()).map(|root| root.id).expect("root")
    }

    #[test]
    fn commands_require_an_open_document() {
        let mut engine = engine();
        let result = engine.execute_command(Command::ExitEditMode);
        assert!(matches!(result, Err(EngineError::NoOpenDocument)));
        assert!(matches!(engine.undo(), Err(EngineError::NoOpenDocument)));
    }

    #[test]
    fn add_child_enters_edit_mode_on_the_new_node() {
        let mut engine = engine();
        engine.create_document("R").expect("create");
        let root = root_id(&engine);

        let changed = engine
            .execute_command(Command::AddChild { parent_id: root, title: "A".into(), content: None })
            .expect("add");
        assert!(changed);

        let state = engine.state().expect("state");
        let child = state.tree.children(root)[0].id;
        assert_eq!(state.selected, Some(child));
        assert_eq!(state.edit_mode, EditMode::Editing { node_id: child });

        engine.execute_command(Command::ExitEditMode).expect("exit");
        assert_eq!(engine.state().expect("state").edit_mode, EditMode::Idle);
    }

    #[test]
    fn ui_commands_do_not_touch_history() {
        let mut engine = engine();
        engine.create_document("R").expect("create");
        let root = root_id(&engine);

        assert!(!engine.execute_command(Command::SelectNode { node_id: Some(root) }).expect("select"));
        assert!(!engine.execute_command(Command::EnterEditMode { node_id: root }).expect("edit"));
        assert_eq!(engine.state().expect("state").selected, Some(root));
        assert_eq!(engine.history_state().expect("history"), HistoryState::default());
    }

    #[test]
    fn execute_by_id_rejects_unknown_commands() {
        let mut engine = engine();
        engine.create_document("R").expect("create");
        let result = engine.execute_command_by_id("paint_node", json!({}));
        assert!(matches!(result, Err(EngineError::Command(CommandError::UnknownCommand(_)))));

        let root = root_id(&engine);
        let changed = engine
            .execute_command_by_id("add_child", json!({ "parent_id": root, "title": "Child" }))
            .expect("add");
        assert!(changed);
    }

    #[test]
    fn deleting_the_open_document_closes_it() {
        let mut engine = engine();
        let doc = engine.create_document("R").expect("create");
        assert_eq!(engine.list_documents().expect("list").len(), 1);

        assert!(engine.delete_document(doc.id).expect("delete"));
        assert!(engine.current_document_id().is_none());
        assert!(engine.list_documents().expect("list").is_empty());
        assert!(!engine.delete_document(doc.id).expect("second delete"));
        assert!(matches!(engine.open_document(doc.id), Err(EngineError::DocumentNotFound(_))));
    }

    #[test]
    fn root_title_edit_renames_document() {
        let mut engine = engine();
        let doc = engine.create_document("Draft").expect("create");
        let root = root_id(&engine);

        engine
            .execute_command(Command::UpdateTitle { node_id: root, title: "Final".into() })
            .expect("rename");
        assert_eq!(engine.document(doc.id).expect("get").expect("doc").title, "Final");

        assert!(engine.undo().expect("undo"));
        assert_eq!(engine.document(doc.id).expect("get").expect("doc").title, "Draft");
        assert_eq!(engine.state().and_then(|s| s.tree.title()), Some("Draft"));
    }
}
