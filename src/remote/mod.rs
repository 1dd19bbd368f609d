//! Remote collection store contract.
//!
//! The store talks to its backend only through [`RemoteStore`]: read collections, write
//! mutations, call named procedures and subscribe to change events. Any relational or
//! document backend offering these primitives can sit behind it.

mod query;

pub use query::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::AppError;

/// A remote row: a flat JSON object with snake_case fields.
pub type Row = serde_json::Map<String, Value>;

/// Collection names consumed by the store.
pub mod collections {
    pub const WORKSPACES: &str = "workspaces";
    pub const BOARDS: &str = "boards";
    pub const GROUPS: &str = "groups";
    pub const COLUMNS: &str = "columns";
    pub const ITEMS: &str = "items";
    pub const WORKSPACE_MEMBERS: &str = "workspace_members";
    pub const BOARD_MEMBERS: &str = "board_members";
    pub const PROFILES: &str = "profiles";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const ACTIVITY_LOGS: &str = "activity_logs";

    /// Tables whose changes invalidate the board snapshot.
    pub const REALTIME_TABLES: [&str; 4] = [BOARDS, GROUPS, COLUMNS, ITEMS];
}

/// Named remote procedures.
pub mod procedures {
    pub const REORDER_BOARDS: &str = "reorder_boards";
    pub const REORDER_COLUMNS: &str = "reorder_columns";
    pub const REORDER_ITEMS: &str = "reorder_items";
    pub const DELETE_USER: &str = "delete_user";
    pub const LOG_ACTIVITY: &str = "log_activity";

    /// Collection a reorder procedure rewrites positions in.
    pub fn reorder_target(procedure: &str) -> Option<&'static str> {
        match procedure {
            REORDER_BOARDS => Some(super::collections::BOARDS),
            REORDER_COLUMNS => Some(super::collections::COLUMNS),
            REORDER_ITEMS => Some(super::collections::ITEMS),
            _ => None,
        }
    }
}

/// The signed-in user as reported by the backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change observed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub row_id: Option<String>,
    /// Workspace the change belongs to, when the backend can tell
    pub scope: Option<String>,
}

/// Lifecycle state of a change-feed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    TimedOut,
    ChannelError(String),
    Closed,
}

/// Message delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// An open change-feed subscription.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Minimal contract the store needs from a persistence layer.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Identity of the current session.
    async fn current_user(&self) -> Result<UserIdentity, AppError>;

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, AppError>;

    async fn insert(&self, collection: &str, rows: Vec<Row>) -> Result<(), AppError>;

    /// Merge `patch` into every row matching `filter`.
    async fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<(), AppError>;

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), AppError>;

    /// Invoke a named procedure such as `reorder_items`.
    async fn call(&self, procedure: &str, args: Value) -> Result<Value, AppError>;

    /// Open a change feed for `tables` within `scope` (a workspace id).
    async fn subscribe_changes(
        &self,
        scope: &str,
        tables: &[&str],
    ) -> Result<Subscription, AppError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AppError>;
}
