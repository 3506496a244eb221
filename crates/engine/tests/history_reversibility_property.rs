use mindsync_engine::config::{EngineConfig, HistoryConfig};
use mindsync_engine::state::MindMapTree;
use mindsync_engine::store::NodeStore;
use mindsync_engine::{Command, InMemoryRemote, LocalDb, MindMapEngine};
use proptest::prelude::*;
use uuid::Uuid;

const OPS_PER_RUN: usize = 16;

#[derive(Debug, Clone)]
enum Step {
    AddChild { target: usize },
    AddSibling { target: usize },
    Rename { target: usize, suffix: u8 },
    Annotate { target: usize, clear: bool },
    Delete { target: usize },
    Move { target: usize, destination: usize },
    MoveUp { target: usize },
    MoveDown { target: usize },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => any::<usize>().prop_map(|target| Step::AddChild { target }),
        1 => any::<usize>().prop_map(|target| Step::AddSibling { target }),
        2 => (any::<usize>(), any::<u8>()).prop_map(|(target, suffix)| Step::Rename { target, suffix }),
        1 => (any::<usize>(), any::<bool>()).prop_map(|(target, clear)| Step::Annotate { target, clear }),
        1 => any::<usize>().prop_map(|target| Step::Delete { target }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(target, destination)| Step::Move { target, destination }),
        1 => any::<usize>().prop_map(|target| Step::MoveUp { target }),
        1 => any::<usize>().prop_map(|target| Step::MoveDown { target }),
    ]
}

fn sorted_ids(tree: &MindMapTree) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = tree.node_ids().collect();
    ids.sort();
    ids
}

fn to_command(step: &Step, tree: &MindMapTree) -> Command {
    let ids = sorted_ids(tree);
    let pick = |index: usize| ids[index % ids.len()];
    match *step {
        Step::AddChild { target } => {
            Command::AddChild { parent_id: pick(target), title: "child".into(), content: None }
        }
        Step::AddSibling { target } => {
            Command::AddSibling { node_id: pick(target), title: "sibling".into() }
        }
        Step::Rename { target, suffix } => {
            Command::UpdateTitle { node_id: pick(target), title: format!("title-{suffix}") }
        }
        Step::Annotate { target, clear } => Command::UpdateContent {
            node_id: pick(target),
            content: if clear { None } else { Some(format!("note on {}", pick(target))) },
        },
        Step::Delete { target } => Command::DeleteNode { node_id: pick(target) },
        Step::Move { target, destination } => {
            Command::MoveNode { node_id: pick(target), new_parent_id: pick(destination) }
        }
        Step::MoveUp { target } => Command::MoveUp { node_id: pick(target) },
        Step::MoveDown { target } => Command::MoveDown { node_id: pick(target) },
    }
}

fn current_tree(engine: &MindMapEngine<InMemoryRemote>) -> MindMapTree {
    engine.state().map(|state| state.tree.clone()).expect("document should be open")
}

fn stored_tree(engine: &MindMapEngine<InMemoryRemote>, doc_id: Uuid) -> MindMapTree {
    let nodes = NodeStore::list_live_by_mindmap(engine.local_db().connection(), doc_id)
        .expect("live nodes should load");
    MindMapTree::from_nodes(doc_id, nodes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn undo_restores_every_prior_state_and_redo_replays_forward(
        steps in prop::collection::vec(step_strategy(), 1..OPS_PER_RUN),
    ) {
        let db = LocalDb::open_in_memory().expect("in-memory store should open");
        let config = EngineConfig {
            history: HistoryConfig { max_entries: 10_000, ..HistoryConfig::default() },
            ..EngineConfig::default()
        };
        let mut engine = MindMapEngine::new(db, InMemoryRemote::new(), config);
        let doc = engine.create_document("root").expect("document should be created");

        let mut snapshots = vec![current_tree(&engine)];
        for step in &steps {
            let command = to_command(step, &current_tree(&engine));
            if engine.execute_command(command).expect("command should run") {
                snapshots.push(current_tree(&engine));
            }
            let tree = current_tree(&engine);
            prop_assert!(tree.validate().is_ok());
            prop_assert!(stored_tree(&engine, doc.id).same_content(&tree));
        }

        for expected in snapshots.iter().rev().skip(1) {
            prop_assert!(engine.undo().expect("undo should succeed"));
            prop_assert!(current_tree(&engine).same_content(expected));
            prop_assert!(stored_tree(&engine, doc.id).same_content(expected));
        }
        prop_assert!(!engine.undo().expect("history exhausted"));

        for expected in snapshots.iter().skip(1) {
            prop_assert!(engine.redo().expect("redo should succeed"));
            prop_assert!(current_tree(&engine).same_content(expected));
        }
        prop_assert!(!engine.redo().expect("nothing left to redo"));

        engine.close_document().expect("close");
        engine.open_document(doc.id).expect("reopen");
        let reopened = current_tree(&engine);
        let last = snapshots.last().expect("initial snapshot");
        prop_assert!(reopened.same_content(last));
    }
}
