use mindsync_engine::config::{EngineConfig, HistoryConfig};
use mindsync_engine::store::{NodeStore, OperationLog};
use mindsync_engine::{Command, InMemoryRemote, LocalDb, MindMapEngine};
use uuid::Uuid;

fn engine_with(history: HistoryConfig) -> MindMapEngine<InMemoryRemote> {
    let db = LocalDb::open_in_memory().expect("in-memory store should open");
    let config = EngineConfig { history, ..EngineConfig::default() };
    MindMapEngine::new(db, InMemoryRemote::new(), config)
}

fn engine() -> MindMapEngine<InMemoryRemote> {
    engine_with(HistoryConfig::default())
}

fn root_id(engine: &MindMapEngine<InMemoryRemote>) -> Uuid {
    engine.state().and_then(|state| state.tree.root()).map(|root| root.id).expect("root should exist")
}

fn add_child(engine: &mut MindMapEngine<InMemoryRemote>, parent_id: Uuid, title: &str) -> Uuid {
    let changed = engine
        .execute_command(Command::AddChild { parent_id, title: title.to_string(), content: None })
        .expect("add_child should succeed");
    assert!(changed, "add_child should change the document");
    engine.state().and_then(|state| state.selected).expect("new child should be selected")
}

#[test]
fn add_undo_redo_child_round_trips_through_store_and_log() {
    let mut engine = engine();
    let doc = engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);

    let child = add_child(&mut engine, root, "A");
    let stored = NodeStore::get(engine.local_db().connection(), child)
        .expect("query should succeed")
        .expect("child should be persisted");
    assert_eq!(stored.title, "A");
    assert_eq!(stored.order_index, 0);
    assert_eq!(stored.parent_id, Some(root));

    assert!(engine.undo().expect("undo should succeed"));
    let state = engine.state().expect("document should stay open");
    assert!(!state.tree.contains(child));
    assert_eq!(state.selected, None, "selection of a removed node is dropped");

    let conn = engine.local_db().connection();
    let live = NodeStore::list_live_by_mindmap(conn, doc.id).expect("live nodes");
    assert!(live.iter().all(|node| node.id != child), "child must be gone from the live tree");
    let log = OperationLog::list(conn, doc.id).expect("log should load");
    let add_entry = log.iter().find(|entry| entry.target_id == child).expect("add entry");
    assert!(add_entry.is_undone);

    assert!(engine.redo().expect("redo should succeed"));
    let restored = engine.state().and_then(|state| state.tree.get(child)).expect("child is back");
    assert_eq!(restored.title, "A");
    assert_eq!(restored.order_index, 0);
    assert_eq!(restored.parent_id, Some(root));

    let stored = NodeStore::get(engine.local_db().connection(), child)
        .expect("query should succeed")
        .expect("child row should exist");
    assert!(!stored.deleted);
    assert_eq!(stored.title, "A");
    assert_eq!(stored.order_index, 0);
}

#[test]
fn nothing_to_undo_or_redo_is_reported_as_false() {
    let mut engine = engine();
    engine.create_document("R").expect("document should be created");

    assert!(!engine.undo().expect("undo on empty history"));
    assert!(!engine.redo().expect("redo on empty history"));

    let history = engine.history_state().expect("history state");
    assert!(!history.can_undo);
    assert!(!history.can_redo);
}

#[test]
fn one_command_is_one_undo_step() {
    let mut engine = engine();
    engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);
    let branch = add_child(&mut engine, root, "Branch");
    let leaf = add_child(&mut engine, branch, "Leaf");

    engine.execute_command(Command::DeleteNode { node_id: branch }).expect("delete");
    let tree = &engine.state().expect("open").tree;
    assert!(!tree.contains(branch));
    assert!(!tree.contains(leaf));

    let before = engine.history_state().expect("history state");
    assert!(engine.undo().expect("undo delete"));
    let tree = &engine.state().expect("open").tree;
    assert!(tree.contains(branch));
    assert!(tree.contains(leaf));
    assert_eq!(tree.get(leaf).and_then(|node| node.parent_id), Some(branch));

    let after = engine.history_state().expect("history state");
    assert_eq!(before.undo_count - after.undo_count, 2, "both removals share a batch");
    assert_eq!(after.redo_count, 2);
}

#[test]
fn deleting_the_root_is_a_no_op() {
    let mut engine = engine();
    engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);

    let changed = engine.execute_command(Command::DeleteNode { node_id: root }).expect("delete");
    assert!(!changed);
    assert!(engine.state().expect("open").tree.contains(root));
    assert!(!engine.history_state().expect("history").can_undo);
}

#[test]
fn moving_a_node_under_its_descendant_is_rejected() {
    let mut engine = engine();
    engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);
    let parent = add_child(&mut engine, root, "P");
    let child = add_child(&mut engine, parent, "C");

    let changed = engine
        .execute_command(Command::MoveNode { node_id: parent, new_parent_id: child })
        .expect("move");
    assert!(!changed);
    assert_eq!(engine.state().and_then(|s| s.tree.get(parent)).and_then(|n| n.parent_id), Some(root));
}

#[test]
fn new_edit_after_undo_discards_redo_by_default() {
    let mut engine = engine();
    engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);

    let first = add_child(&mut engine, root, "A");
    assert!(engine.undo().expect("undo"));
    add_child(&mut engine, root, "B");

    let history = engine.history_state().expect("history state");
    assert!(!history.can_redo);
    assert!(!engine.redo().expect("redo"));
    assert!(!engine.state().expect("open").tree.contains(first));
}

#[test]
fn legacy_policy_keeps_redo_after_new_edit() {
    let mut engine =
        engine_with(HistoryConfig { discard_redo_on_edit: false, ..HistoryConfig::default() });
    engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);

    let first = add_child(&mut engine, root, "A");
    assert!(engine.undo().expect("undo"));
    let second = add_child(&mut engine, root, "B");

    assert!(engine.history_state().expect("history state").can_redo);
    assert!(engine.redo().expect("redo"));
    let tree = &engine.state().expect("open").tree;
    assert!(tree.contains(first));
    assert!(tree.contains(second));
}

#[test]
fn history_survives_reopening_the_document() {
    let mut engine = engine();
    let doc = engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);
    let child = add_child(&mut engine, root, "A");

    engine.close_document().expect("close");
    engine.open_document(doc.id).expect("reopen");
    assert!(engine.state().expect("open").tree.contains(child));

    assert!(engine.undo().expect("undo after reopen"));
    assert!(!engine.state().expect("open").tree.contains(child));
}

#[test]
fn retention_trims_oldest_entries() {
    let mut engine = engine_with(HistoryConfig { max_entries: 3, discard_redo_on_edit: true });
    let doc = engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);

    for title in ["A", "B", "C", "D", "E"] {
        add_child(&mut engine, root, title);
    }
    let kept = OperationLog::list(engine.local_db().connection(), doc.id).expect("log");
    assert_eq!(kept.len(), 3);
    assert_eq!(engine.history_state().expect("history").undo_count, 3);
}

#[test]
fn command_larger_than_retention_limit_stays_undoable() {
    let mut engine = engine_with(HistoryConfig { max_entries: 2, discard_redo_on_edit: true });
    let doc = engine.create_document("R").expect("document should be created");
    let root = root_id(&engine);
    let branch = add_child(&mut engine, root, "A");
    let first = add_child(&mut engine, branch, "A1");
    let second = add_child(&mut engine, branch, "A2");

    engine.execute_command(Command::DeleteNode { node_id: branch }).expect("delete subtree");
    let kept = OperationLog::list(engine.local_db().connection(), doc.id).expect("log");
    assert_eq!(kept.len(), 3, "the whole delete batch is kept");

    assert!(engine.undo().expect("undo delete"));
    let tree = &engine.state().expect("open").tree;
    for id in [branch, first, second] {
        assert!(tree.contains(id), "node {id} should be restored");
    }
    assert!(!engine.undo().expect("older batches were trimmed"));
}
