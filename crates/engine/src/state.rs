// In-memory editor state: a flat node map keyed by id plus transient UI fields.
//
// Parent/child relations are explicit `parent_id` fields; every traversal is a
// lookup over the map.

use std::collections::{HashMap, HashSet, VecDeque};

use mindsync_common::Node;
use uuid::Uuid;

/// The node tree of one document.
#[derive(Debug, Clone, Default)]
pub struct MindMapTree {
    document_id: Uuid,
    nodes: HashMap<Uuid, Node>,
}

impl MindMapTree {
    pub fn new(document_id: Uuid) -> Self {
        Self { document_id, nodes: HashMap::new() }
    }

    pub fn from_nodes(document_id: Uuid, nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes = nodes.into_iter().map(|node| (node.id, node)).collect();
        Self { document_id, nodes }
    }

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn get(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn insert(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id, node)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.nodes.keys().copied()
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.values().find(|node| node.is_root())
    }

    /// The document title is the root node's title.
    pub fn title(&self) -> Option<&str> {
        self.root().map(|root| root.title.as_str())
    }

    /// Direct children in sibling order.
    pub fn children(&self, parent_id: Uuid) -> Vec<&Node> {
        let mut children: Vec<&Node> =
            self.nodes.values().filter(|node| node.parent_id == Some(parent_id)).collect();
        children.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        children
    }

    /// Index for a new last child of `parent_id`.
    pub fn next_child_index(&self, parent_id: Uuid) -> i64 {
        self.nodes
            .values()
            .filter(|node| node.parent_id == Some(parent_id))
            .map(|node| node.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Number of edges between `id` and the root, or `None` if the chain is broken.
    pub fn depth(&self, id: Uuid) -> Option<usize> {
        let mut depth = 0usize;
        let mut seen = HashSet::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent_id) = current.parent_id {
            if !seen.insert(current.id) {
                return None;
            }
            current = self.nodes.get(&parent_id)?;
            depth += 1;
        }
        Some(depth)
    }

    /// Whether `ancestor` appears on the parent chain of `id` (or is `id`).
    pub fn is_ancestor_or_self(&self, ancestor: Uuid, id: Uuid) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                return false;
            }
            cursor = self.nodes.get(&current).and_then(|node| node.parent_id);
        }
        false
    }

    /// Every descendant of `id`, deepest first, so children always precede their parent.
    pub fn descendants_deepest_first(&self, id: Uuid) -> Vec<Uuid> {
        let mut by_level = Vec::new();
        let mut queue = VecDeque::from([(id, 0usize)]);
        let mut seen = HashSet::from([id]);
        while let Some((current, level)) = queue.pop_front() {
            for child in self.children(current) {
                if seen.insert(child.id) {
                    by_level.push((child.id, level + 1));
                    queue.push_back((child.id, level + 1));
                }
            }
        }
        by_level.reverse();
        by_level.into_iter().map(|(id, _)| id).collect()
    }

    /// Equality over the user-visible content of every node.
    pub fn same_content(&self, other: &MindMapTree) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.nodes.iter().all(|(id, node)| {
                other.nodes.get(id).is_some_and(|candidate| candidate.same_content(node))
            })
    }

    /// Check the structural invariants: one root and acyclic parent chains.
    pub fn validate(&self) -> Result<(), TreeError> {
        let roots = self.nodes.values().filter(|node| node.is_root()).count();
        if roots != 1 {
            return Err(TreeError::RootCount(roots));
        }
        for node in self.nodes.values() {
            if self.depth(node.id).is_none() {
                return Err(TreeError::Detached(node.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("expected exactly one root node, found {0}")]
    RootCount(usize),
    #[error("node {0} does not reach the root")]
    Detached(Uuid),
}

/// Whether a node title is being edited inline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    Idle,
    Editing { node_id: Uuid },
}

/// Everything the UI sees for one open document.
#[derive(Debug, Clone)]
pub struct EditorState {
    pub tree: MindMapTree,
    /// Transient; never persisted and never part of a diff.
    pub selected: Option<Uuid>,
    pub edit_mode: EditMode,
}

impl EditorState {
    pub fn new(tree: MindMapTree) -> Self {
        Self { tree, selected: None, edit_mode: EditMode::Idle }
    }

    /// Drop UI references to nodes that no longer exist.
    pub fn forget_missing(&mut self) {
        if self.selected.is_some_and(|id| !self.tree.contains(id)) {
            self.selected = None;
        }
        if let EditMode::Editing { node_id } = self.edit_mode {
            if !self.tree.contains(node_id) {
                self.edit_mode = EditMode::Idle;
            }
        }
    }
}
