//! Activity log entries sent through the `log_activity` procedure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    /// Short verb such as `board.created` or `item.moved`
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

impl ActivityEntry {
    pub const COLLECTION: &'static str = "activity_logs";
}
