use std::fmt;

use serde::{Deserialize, Serialize};

/// What a [`Mutation`] does to the target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    /// Index the full document, replacing any previous version.
    Create,
    /// Merge `data` into the existing document.
    Update,
    /// Remove the document.
    Delete,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationAction::Create => f.write_str("create"),
            MutationAction::Update => f.write_str("update"),
            MutationAction::Delete => f.write_str("delete"),
        }
    }
}

/// A single index change produced by a transformer.
///
/// Mutations are never modified once built; they are moved through the batcher into the
/// destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub action: MutationAction,
    /// Identifier of the target document.
    pub id: String,
    /// Identifier of the parent document, used to route the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Document body for creates, partial body for updates, `null` for deletes.
    pub data: serde_json::Value,
}

impl Mutation {
    pub fn create(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action: MutationAction::Create,
            id: id.into(),
            parent: None,
            data,
        }
    }

    pub fn update(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action: MutationAction::Update,
            id: id.into(),
            parent: None,
            data,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            action: MutationAction::Delete,
            id: id.into(),
            parent: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }
}
