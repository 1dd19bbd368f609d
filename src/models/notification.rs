//! Notification model. Notifications are produced by the backend and by collaboration
//! flows; the client reads them, marks them read and reacts to invite payloads.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WorkspaceInvite,
    BoardInvite,
    Assignment,
    Mention,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: String,
}

impl Notification {
    pub const COLLECTION: &'static str = "notifications";

    pub fn new(user_id: impl Into<String>, kind: NotificationKind, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            data,
            is_read: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.data.get("workspace_id").and_then(Value::as_str)
    }

    pub fn board_id(&self) -> Option<&str> {
        self.data.get("board_id").and_then(Value::as_str)
    }

    pub fn role(&self) -> Option<Role> {
        self.data
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::from_str)
    }
}
