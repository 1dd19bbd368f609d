//! Normalized domain store.
//!
//! [`Store`] owns the in-memory mirror of the user's workspaces and boards. Every
//! mutating action first applies its change locally under the state write lock, then
//! hands the matching remote write to the [`Outbox`]. Reads go through selectors on
//! [`StoreState`] or the async helpers on `Store`.
//!
//! The action surface is split by concern:
//! - `sync`: full and silent reloads, selection, membership and permission refresh
//! - `provision`: first-run seeding
//! - `moves`: drag-and-drop reordering
//! - `actions`: workspace, board, group, column, item and view edits
//! - `realtime`: change-feed subscription and polling
//! - `collab`: invitations, members, notifications, account

mod actions;
mod collab;
mod moves;
mod outbox;
mod provision;
mod realtime;
mod sync;

pub use moves::array_move;
pub use outbox::{Outbox, OutboxEntry, RawSnapshot, WriteOp, WriteStatus};
pub use provision::first_run_board;
pub use sync::{assemble, Snapshot};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

use crate::config::SyncSettings;
use crate::errors::AppError;
use crate::models::{ActivityEntry, Board, Membership, Notification, Workspace};
use crate::permissions::{Action, PermissionState};
use crate::projection::{ProjectionMemo, ViewRow};
use crate::remote::{procedures, RemoteStore, UserIdentity};
use crate::session::SessionStore;

use realtime::RealtimeTasks;

/// Everything the UI reads.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub user: Option<UserIdentity>,
    pub workspaces: Vec<Workspace>,
    /// All visible boards, ordered by position within their workspace
    pub boards: Vec<Board>,
    pub active_workspace_id: Option<String>,
    pub active_board_id: Option<String>,
    pub is_loading: bool,
    pub is_loading_members: bool,
    pub error: Option<String>,
    /// Member cache of `members_board_id`
    pub board_members: Option<Vec<Membership>>,
    pub members_board_id: Option<String>,
    pub member_counts: HashMap<String, usize>,
    pub permissions: PermissionState,
    pub notifications: Vec<Notification>,
}

impl StoreState {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn board(&self, id: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn active_workspace(&self) -> Option<&Workspace> {
        self.active_workspace_id
            .as_deref()
            .and_then(|id| self.workspace(id))
    }

    pub fn active_board(&self) -> Option<&Board> {
        self.active_board_id.as_deref().and_then(|id| self.board(id))
    }

    /// Boards of one workspace in position order.
    pub fn boards_in_workspace(&self, workspace_id: &str) -> Vec<&Board> {
        let mut boards: Vec<&Board> = self
            .boards
            .iter()
            .filter(|b| b.workspace_id == workspace_id)
            .collect();
        boards.sort_by_key(|b| b.position);
        boards
    }

    pub fn board_member_count(&self, board_id: &str) -> usize {
        self.member_counts.get(board_id).copied().unwrap_or(0)
    }

    fn require_user(&self) -> Result<&UserIdentity, AppError> {
        self.user
            .as_ref()
            .ok_or_else(|| AppError::Forbidden("No signed-in user".to_string()))
    }

    fn workspace_mut(&mut self, id: &str) -> Result<&mut Workspace, AppError> {
        self.workspaces
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Workspace {} not found", id)))
    }

    fn board_mut(&mut self, id: &str) -> Result<&mut Board, AppError> {
        self.boards
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Board {} not found", id)))
    }

    fn active_board_mut(&mut self) -> Result<&mut Board, AppError> {
        let id = self
            .active_board_id
            .clone()
            .ok_or_else(|| AppError::NotFound("No active board".to_string()))?;
        self.board_mut(&id)
    }

    /// Board holding an item.
    fn board_of_item_mut(&mut self, item_id: &str) -> Result<&mut Board, AppError> {
        self.boards
            .iter_mut()
            .find(|b| b.item(item_id).is_some())
            .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))
    }

    /// Board holding a column.
    fn board_of_column_mut(&mut self, column_id: &str) -> Result<&mut Board, AppError> {
        self.boards
            .iter_mut()
            .find(|b| b.column(column_id).is_some())
            .ok_or_else(|| AppError::NotFound(format!("Column {} not found", column_id)))
    }

    /// Board holding a group.
    fn board_of_group_mut(&mut self, group_id: &str) -> Result<&mut Board, AppError> {
        self.boards
            .iter_mut()
            .find(|b| b.group(group_id).is_some())
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))
    }

    /// Re-point the selection after the active board or workspace disappeared.
    fn repair_selection(&mut self) {
        if self.active_workspace().is_none() {
            self.active_workspace_id = self.workspaces.first().map(|w| w.id.clone());
        }
        let board_valid = self.active_board().is_some_and(|b| {
            Some(b.workspace_id.as_str()) == self.active_workspace_id.as_deref()
        });
        if !board_valid {
            self.active_board_id = self
                .active_workspace_id
                .as_deref()
                .and_then(|ws| self.boards_in_workspace(ws).first().map(|b| b.id.clone()));
        }
    }
}

/// Reload counters, exposed for diagnostics.
#[derive(Debug, Default)]
pub struct SyncStats {
    full_reloads: AtomicUsize,
    silent_reloads: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub full_reloads: usize,
    pub silent_reloads: usize,
}

impl SyncStats {
    fn record(&self, silent: bool) {
        let counter = if silent {
            &self.silent_reloads
        } else {
            &self.full_reloads
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn counts(&self) -> SyncCounts {
        SyncCounts {
            full_reloads: self.full_reloads.load(Ordering::SeqCst),
            silent_reloads: self.silent_reloads.load(Ordering::SeqCst),
        }
    }
}

/// Client-side board state with optimistic writes and background sync.
pub struct Store {
    this: Weak<Store>,
    remote: Arc<dyn RemoteStore>,
    state: RwLock<StoreState>,
    outbox: Outbox,
    session: SessionStore,
    settings: SyncSettings,
    memo: Mutex<ProjectionMemo>,
    realtime: Mutex<RealtimeTasks>,
    stats: SyncStats,
    /// Reload generations: the last one issued and the newest one applied. A snapshot
    /// older than the applied one is discarded.
    reload_issued: AtomicU64,
    reload_applied: AtomicU64,
}

impl Store {
    /// Create a store and start its outbox worker. Must run inside a Tokio runtime.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        session: SessionStore,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let outbox = Outbox::start(Arc::clone(&remote));
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            remote,
            state: RwLock::new(StoreState::default()),
            outbox,
            session,
            settings,
            memo: Mutex::new(ProjectionMemo::new()),
            realtime: Mutex::new(RealtimeTasks::default()),
            stats: SyncStats::default(),
            reload_issued: AtomicU64::new(0),
            reload_applied: AtomicU64::new(0),
        })
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn sync_counts(&self) -> SyncCounts {
        self.stats.counts()
    }

    /// Read access to the whole state.
    pub async fn state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().await
    }

    pub async fn active_board(&self) -> Option<Board> {
        self.state.read().await.active_board().cloned()
    }

    pub async fn active_workspace(&self) -> Option<Workspace> {
        self.state.read().await.active_workspace().cloned()
    }

    pub async fn boards_in_workspace(&self, workspace_id: &str) -> Vec<Board> {
        self.state
            .read()
            .await
            .boards_in_workspace(workspace_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn board_member_count(&self, board_id: &str) -> usize {
        self.state.read().await.board_member_count(board_id)
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Message of the most recent failed remote write, if any.
    pub async fn write_error(&self) -> Option<String> {
        self.outbox.last_error().await
    }

    pub async fn clear_write_error(&self) {
        self.outbox.clear_error().await;
    }

    /// Projected rows of the active board; unchanged inputs return the same `Arc`.
    pub async fn projected_rows(&self) -> Option<Arc<[ViewRow]>> {
        let state = self.state.read().await;
        let board = state.active_board()?;
        Some(self.memo.lock().await.rows(board))
    }

    pub async fn can(&self, action: Action) -> bool {
        self.state.read().await.permissions.can(action)
    }

    /// Wait until every queued remote write has settled.
    pub async fn flush(&self) {
        self.outbox.flush().await;
    }

    async fn enqueue(&self, op: WriteOp) {
        self.outbox.enqueue(op).await;
    }

    /// Queue a best-effort `log_activity` call.
    pub async fn log_activity(
        &self,
        action: &str,
        workspace_id: Option<&str>,
        board_id: Option<&str>,
        details: serde_json::Value,
    ) {
        let Some(user_id) = self.state.read().await.user_id().map(str::to_string) else {
            return;
        };
        let entry = ActivityEntry {
            user_id,
            workspace_id: workspace_id.map(str::to_string),
            board_id: board_id.map(str::to_string),
            action: action.to_string(),
            details,
        };
        match serde_json::to_value(&entry) {
            Ok(args) => {
                self.enqueue(WriteOp::call(procedures::LOG_ACTIVITY, args))
                    .await
            }
            Err(e) => tracing::warn!("Could not encode activity {}: {}", action, e),
        }
    }

    async fn persist_selection(&self) {
        let selection = {
            let state = self.state.read().await;
            crate::session::Selection {
                active_workspace_id: state.active_workspace_id.clone(),
                active_board_id: state.active_board_id.clone(),
            }
        };
        if let Err(e) = self.session.save(&selection).await {
            tracing::warn!("Could not persist selection: {}", e);
        }
    }
}

/// Trimmed, non-empty title or a validation error.
fn require_title(raw: &str, what: &str) -> Result<String, AppError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", what)));
    }
    Ok(title.to_string())
}
