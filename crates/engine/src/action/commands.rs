// User-level commands and their planning into actions.
//
// Planning is pure: it reads the tree and returns the actions to apply, in
// order. A stale or missing target plans to nothing.

use chrono::{DateTime, Utc};
use mindsync_common::Node;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::{Action, Placement};
use crate::state::MindMapTree;

/// Identifiers accepted by [`Command::from_id`].
pub const COMMAND_IDS: &[&str] = &[
    "add_child",
    "add_sibling",
    "update_title",
    "update_content",
    "delete_node",
    "move_node",
    "move_up",
    "move_down",
    "select_node",
    "enter_edit_mode",
    "exit_edit_mode",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    AddChild {
        parent_id: Uuid,
        title: String,
        #[serde(default)]
        content: Option<String>,
    },
    AddSibling {
        node_id: Uuid,
        title: String,
    },
    UpdateTitle {
        node_id: Uuid,
        title: String,
    },
    UpdateContent {
        node_id: Uuid,
        #[serde(default)]
        content: Option<String>,
    },
    DeleteNode {
        node_id: Uuid,
    },
    MoveNode {
        node_id: Uuid,
        new_parent_id: Uuid,
    },
    MoveUp {
        node_id: Uuid,
    },
    MoveDown {
        node_id: Uuid,
    },
    SelectNode {
        #[serde(default)]
        node_id: Option<Uuid>,
    },
    EnterEditMode {
        node_id: Uuid,
    },
    ExitEditMode,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("invalid parameters for `{command}`: {message}")]
    InvalidParams { command: String, message: String },
}

impl Command {
    /// Parse a UI command id plus its JSON parameters.
    pub fn from_id(command_id: &str, params: Value) -> Result<Self, CommandError> {
        if !COMMAND_IDS.contains(&command_id) {
            return Err(CommandError::UnknownCommand(command_id.to_string()));
        }

        let mut object = match params {
            Value::Object(object) => object,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(CommandError::InvalidParams {
                    command: command_id.to_string(),
                    message: format!("expected an object, got {other}"),
                })
            }
        };
        object.insert("command".to_string(), Value::String(command_id.to_string()));

        serde_json::from_value(Value::Object(object)).map_err(|error| CommandError::InvalidParams {
            command: command_id.to_string(),
            message: error.to_string(),
        })
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::AddChild { .. } => "add_child",
            Self::AddSibling { .. } => "add_sibling",
            Self::UpdateTitle { .. } => "update_title",
            Self::UpdateContent { .. } => "update_content",
            Self::DeleteNode { .. } => "delete_node",
            Self::MoveNode { .. } => "move_node",
            Self::MoveUp { .. } => "move_up",
            Self::MoveDown { .. } => "move_down",
            Self::SelectNode { .. } => "select_node",
            Self::EnterEditMode { .. } => "enter_edit_mode",
            Self::ExitEditMode => "exit_edit_mode",
        }
    }

    /// Whether the command can change persisted data.
    pub fn mutates_document(&self) -> bool {
        !matches!(self, Self::SelectNode { .. } | Self::EnterEditMode { .. } | Self::ExitEditMode)
    }

    /// Compute the actions implementing this command against `tree`.
    pub fn plan(&self, tree: &MindMapTree, now: DateTime<Utc>) -> Vec<Action> {
        match self {
            Self::AddChild { parent_id, title, content } => {
                plan_add(tree, *parent_id, title, content.clone(), now)
            }
            Self::AddSibling { node_id, title } => {
                match tree.get(*node_id).and_then(|node| node.parent_id) {
                    Some(parent_id) => plan_add(tree, parent_id, title, None, now),
                    None => Vec::new(),
                }
            }
            Self::UpdateTitle { node_id, title } => match tree.get(*node_id) {
                Some(node) if node.title != *title => vec![Action::UpdateTitle {
                    node_id: *node_id,
                    before: node.title.clone(),
                    after: title.clone(),
                }],
                _ => Vec::new(),
            },
            Self::UpdateContent { node_id, content } => match tree.get(*node_id) {
                Some(node) if node.content != *content => vec![Action::UpdateContent {
                    node_id: *node_id,
                    before: node.content.clone(),
                    after: content.clone(),
                }],
                _ => Vec::new(),
            },
            Self::DeleteNode { node_id } => plan_delete(tree, *node_id),
            Self::MoveNode { node_id, new_parent_id } => plan_move(tree, *node_id, *new_parent_id),
            Self::MoveUp { node_id } => plan_swap(tree, *node_id, Direction::Up),
            Self::MoveDown { node_id } => plan_swap(tree, *node_id, Direction::Down),
            Self::SelectNode { .. } | Self::EnterEditMode { .. } | Self::ExitEditMode => Vec::new(),
        }
    }
}

fn plan_add(
    tree: &MindMapTree,
    parent_id: Uuid,
    title: &str,
    content: Option<String>,
    now: DateTime<Utc>,
) -> Vec<Action> {
    if !tree.contains(parent_id) {
        return Vec::new();
    }
    let mut node =
        Node::new(tree.document_id(), Some(parent_id), tree.next_child_index(parent_id), title, now);
    node.content = content;
    vec![Action::AddNode(node)]
}

/// Descendants first (deepest level first), the target last. The root is never deleted.
fn plan_delete(tree: &MindMapTree, node_id: Uuid) -> Vec<Action> {
    match tree.get(node_id) {
        Some(node) if !node.is_root() => {}
        _ => return Vec::new(),
    }

    tree.descendants_deepest_first(node_id)
        .into_iter()
        .chain(std::iter::once(node_id))
        .filter_map(|id| tree.get(id).cloned())
        .map(Action::RemoveNode)
        .collect()
}

fn plan_move(tree: &MindMapTree, node_id: Uuid, new_parent_id: Uuid) -> Vec<Action> {
    let Some(node) = tree.get(node_id) else {
        return Vec::new();
    };
    let Some(old_parent_id) = node.parent_id else {
        return Vec::new();
    };
    if old_parent_id == new_parent_id
        || !tree.contains(new_parent_id)
        || tree.is_ancestor_or_self(node_id, new_parent_id)
    {
        return Vec::new();
    }

    vec![Action::MoveNode {
        node_id,
        from: Placement { parent_id: old_parent_id, order_index: node.order_index },
        to: Placement { parent_id: new_parent_id, order_index: tree.next_child_index(new_parent_id) },
    }]
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn plan_swap(tree: &MindMapTree, node_id: Uuid, direction: Direction) -> Vec<Action> {
    let Some(parent_id) = tree.get(node_id).and_then(|node| node.parent_id) else {
        return Vec::new();
    };
    let siblings = tree.children(parent_id);
    let Some(position) = siblings.iter().position(|node| node.id == node_id) else {
        return Vec::new();
    };

    let neighbour = match direction {
        Direction::Up => position.checked_sub(1).and_then(|index| siblings.get(index)),
        Direction::Down => siblings.get(position + 1),
    };
    let Some(neighbour) = neighbour else {
        return Vec::new();
    };

    let current = siblings[position];
    if current.order_index == neighbour.order_index {
        return Vec::new();
    }
    vec![Action::SwapOrder {
        first: current.id,
        first_index: current.order_index,
        second: neighbour.id,
        second_index: neighbour.order_index,
    }]
}
