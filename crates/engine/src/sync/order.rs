// Upload ordering for a batch of dirty nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use mindsync_common::Node;
use uuid::Uuid;

/// Parent-before-child order.
///
/// Breadth-first from the nodes whose parent is outside the batch (already on
/// the remote, or the root). Seeds and siblings keep their input order. Nodes
/// unreachable from a seed (a parent cycle) are appended last.
pub fn upload_order(nodes: &[Node]) -> Vec<&Node> {
    let in_batch: HashSet<Uuid> = nodes.iter().map(|node| node.id).collect();
    let mut children: HashMap<Uuid, Vec<&Node>> = HashMap::new();
    let mut queue: VecDeque<&Node> = VecDeque::new();

    for node in nodes {
        match node.parent_id {
            Some(parent_id) if in_batch.contains(&parent_id) => {
                children.entry(parent_id).or_default().push(node);
            }
            _ => queue.push_back(node),
        }
    }

    let mut ordered = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::with_capacity(nodes.len());
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node.id) {
            continue;
        }
        ordered.push(node);
        if let Some(kids) = children.get(&node.id) {
            queue.extend(kids.iter().copied());
        }
    }

    ordered.extend(nodes.iter().filter(|node| !visited.contains(&node.id)));
    ordered
}

/// Child-before-parent order, for remote deletions.
pub fn delete_order(nodes: &[Node]) -> Vec<&Node> {
    let mut ordered = upload_order(nodes);
    ordered.reverse();
    ordered
}
