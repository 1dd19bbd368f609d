//! Workspace model.

use serde::{Deserialize, Serialize};

/// A tenant-like container owning one or more boards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub position: i64,
    pub owner_id: String,
}

impl Workspace {
    pub const COLLECTION: &'static str = "workspaces";

    pub fn new(title: impl Into<String>, owner_id: impl Into<String>, position: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            position,
            owner_id: owner_id.into(),
        }
    }
}
