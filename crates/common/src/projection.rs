// Sparse node projections stored as the `before` / `after` halves of an
// operation-log entry.
//
// Only the fields relevant to an operation are present. Nullable node fields
// (`parent_id`, `content`) use a double option so "absent" and "explicitly
// null" stay distinct through a JSON round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::Node;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub content: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("projection is missing `{0}` required to rebuild a node")]
    MissingField(&'static str),
    #[error("projection JSON is malformed: {0}")]
    Malformed(String),
}

impl Projection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Full projection of a node, used for add/delete entries.
    pub fn of_node(node: &Node) -> Self {
        Self {
            parent_id: Some(node.parent_id),
            order_index: Some(node.order_index),
            title: Some(node.title.clone()),
            content: Some(node.content.clone()),
            created_at: Some(node.created_at),
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self { title: Some(title.into()), ..Self::default() }
    }

    /// The `(before, after)` pair covering exactly the fields that differ.
    pub fn changed_fields(before: &Node, after: &Node) -> (Self, Self) {
        let mut old = Self::default();
        let mut new = Self::default();

        if before.parent_id != after.parent_id {
            old.parent_id = Some(before.parent_id);
            new.parent_id = Some(after.parent_id);
        }
        if before.order_index != after.order_index {
            old.order_index = Some(before.order_index);
            new.order_index = Some(after.order_index);
        }
        if before.title != after.title {
            old.title = Some(before.title.clone());
            new.title = Some(after.title.clone());
        }
        if before.content != after.content {
            old.content = Some(before.content.clone());
            new.content = Some(after.content.clone());
        }

        (old, new)
    }

    /// Overwrite the fields present in this projection.
    pub fn apply_to(&self, node: &mut Node) {
        if let Some(parent_id) = self.parent_id {
            node.parent_id = parent_id;
        }
        if let Some(order_index) = self.order_index {
            node.order_index = order_index;
        }
        if let Some(title) = &self.title {
            node.title = title.clone();
        }
        if let Some(content) = &self.content {
            node.content = content.clone();
        }
    }

    /// Rebuild a node from a full projection.
    pub fn to_node(
        &self,
        id: Uuid,
        mindmap_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Node, ProjectionError> {
        let parent_id = self.parent_id.ok_or(ProjectionError::MissingField("parent_id"))?;
        let order_index = self.order_index.ok_or(ProjectionError::MissingField("order_index"))?;
        let title = self.title.clone().ok_or(ProjectionError::MissingField("title"))?;

        Ok(Node {
            id,
            mindmap_id,
            parent_id,
            order_index,
            title,
            content: self.content.clone().flatten(),
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
            dirty: true,
            local_updated_at: Some(now),
            deleted: false,
        })
    }

    pub fn encode(&self) -> String {
        // Every field is a plain scalar, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(raw: &str) -> Result<Self, ProjectionError> {
        serde_json::from_str(raw).map_err(|error| ProjectionError::Malformed(error.to_string()))
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
