//! Snapshot loading and reconciliation.
//!
//! A reload fetches every collection in parallel, replays the outbox entries the fetch
//! may have missed, joins the rows into board aggregates and swaps them into the store.
//! Client-local view settings and a still-valid selection survive the swap.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;

use crate::errors::AppError;
use crate::models::{
    rows_into, Board, BoardRow, Column, Group, Item, ItemRow, Membership, ViewState, Workspace,
};
use crate::permissions::{query_role, resolve_cached, PermissionState, RoleResolution};
use crate::remote::{collections, Filter, Query, RemoteStore};
use crate::session::Selection;

use super::{RawSnapshot, Store, StoreState};

/// Joined result of one fetch.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub workspaces: Vec<Workspace>,
    pub boards: Vec<Board>,
    /// Board id -> number of board members
    pub member_counts: HashMap<String, usize>,
}

/// Fetch every collection the store mirrors.
async fn fetch_raw(remote: &dyn RemoteStore, user_id: &str) -> Result<RawSnapshot, AppError> {
    let all = Query::all();
    let own_memberships = Query::filtered(Filter::new().eq("user_id", user_id));

    let (workspaces, workspace_members, boards, groups, columns, items, board_members) = tokio::try_join!(
        remote.select(collections::WORKSPACES, &all),
        remote.select(collections::WORKSPACE_MEMBERS, &own_memberships),
        remote.select(collections::BOARDS, &all),
        remote.select(collections::GROUPS, &all),
        remote.select(collections::COLUMNS, &all),
        remote.select(collections::ITEMS, &all),
        remote.select(collections::BOARD_MEMBERS, &all),
    )?;

    let mut raw = RawSnapshot::new();
    raw.insert(collections::WORKSPACES.to_string(), workspaces);
    raw.insert(collections::WORKSPACE_MEMBERS.to_string(), workspace_members);
    raw.insert(collections::BOARDS.to_string(), boards);
    raw.insert(collections::GROUPS.to_string(), groups);
    raw.insert(collections::COLUMNS.to_string(), columns);
    raw.insert(collections::ITEMS.to_string(), items);
    raw.insert(collections::BOARD_MEMBERS.to_string(), board_members);
    Ok(raw)
}

fn rows_of<T: serde::de::DeserializeOwned>(raw: &RawSnapshot, collection: &str) -> Vec<T> {
    raw.get(collection)
        .map(|rows| rows_into(collection, rows))
        .unwrap_or_default()
}

/// Join raw rows into the boards `user_id` can see.
///
/// A workspace is visible to its owner and its members; its boards are then visible in
/// full. A board membership alone exposes that board and its workspace.
pub fn assemble(raw: &RawSnapshot, user_id: &str) -> Snapshot {
    let workspaces: Vec<Workspace> = rows_of(raw, collections::WORKSPACES);
    let workspace_members: Vec<Membership> = rows_of(raw, collections::WORKSPACE_MEMBERS);
    let board_rows: Vec<BoardRow> = rows_of(raw, collections::BOARDS);
    let groups: Vec<Group> = rows_of(raw, collections::GROUPS);
    let columns: Vec<Column> = rows_of(raw, collections::COLUMNS);
    let items: Vec<ItemRow> = rows_of(raw, collections::ITEMS);
    let board_members: Vec<Membership> = rows_of(raw, collections::BOARD_MEMBERS);

    let full_access: HashSet<&str> = workspaces
        .iter()
        .filter(|w| w.owner_id == user_id)
        .map(|w| w.id.as_str())
        .chain(
            workspace_members
                .iter()
                .filter(|m| m.user_id == user_id)
                .filter_map(|m| m.workspace_id.as_deref()),
        )
        .collect();
    let invited_boards: HashSet<&str> = board_members
        .iter()
        .filter(|m| m.user_id == user_id)
        .filter_map(|m| m.board_id.as_deref())
        .collect();

    let mut boards: Vec<Board> = board_rows
        .into_iter()
        .filter(|b| {
            full_access.contains(b.workspace_id.as_str()) || invited_boards.contains(b.id.as_str())
        })
        .map(|row| {
            let mut board = Board::from_row(row);
            board.columns = columns
                .iter()
                .filter(|c| c.board_id == board.id)
                .cloned()
                .collect();
            board.columns.sort_by_key(|c| c.position);
            board.groups = groups
                .iter()
                .filter(|g| g.board_id == board.id)
                .cloned()
                .collect();
            board.groups.sort_by_key(|g| g.position);
            board.items = items
                .iter()
                .filter(|i| i.board_id == board.id)
                .map(|i| Item::from_row(i.clone(), &board.columns))
                .collect();
            board.items.sort_by_key(|i| i.position);
            board
        })
        .collect();
    boards.sort_by_key(|b| b.position);

    let board_workspaces: HashSet<&str> = boards.iter().map(|b| b.workspace_id.as_str()).collect();
    let mut workspaces: Vec<Workspace> = workspaces
        .iter()
        .filter(|w| {
            full_access.contains(w.id.as_str()) || board_workspaces.contains(w.id.as_str())
        })
        .cloned()
        .collect();
    workspaces.sort_by_key(|w| w.position);

    let mut member_counts: HashMap<String, usize> = HashMap::new();
    for board_id in board_members.iter().filter_map(|m| m.board_id.as_deref()) {
        *member_counts.entry(board_id.to_string()).or_default() += 1;
    }

    Snapshot {
        workspaces,
        boards,
        member_counts,
    }
}

/// Swap a snapshot into the state, keeping view settings and a valid selection.
fn apply_snapshot(state: &mut StoreState, snapshot: Snapshot, persisted: Option<Selection>) {
    let mut views: HashMap<String, ViewState> = state
        .boards
        .drain(..)
        .map(|board| (board.id, board.view))
        .collect();

    let mut boards = snapshot.boards;
    for board in &mut boards {
        if let Some(view) = views.remove(&board.id) {
            board.view = view;
        }
    }

    state.workspaces = snapshot.workspaces;
    state.boards = boards;
    state.member_counts = snapshot.member_counts;

    if let Some(selection) = persisted {
        if state.active_board().is_none() && state.active_workspace().is_none() {
            state.active_workspace_id = selection.active_workspace_id;
            state.active_board_id = selection.active_board_id;
        }
    }
    if let Some(workspace_id) = state.active_board().map(|b| b.workspace_id.clone()) {
        state.active_workspace_id = Some(workspace_id);
    }
    state.repair_selection();
}

impl Store {
    /// Fetch the full dataset and replace the store state.
    ///
    /// A non-silent load drives `is_loading` and provisions a first workspace for a user
    /// who has none. A silent load leaves `is_loading` untouched and keeps the current
    /// selection when it is still valid. Fetch failures set `error`.
    pub async fn load_user_data(&self, silent: bool) -> Result<(), AppError> {
        self.stats.record(silent);
        if !silent {
            let mut state = self.state.write().await;
            state.is_loading = true;
            state.error = None;
        }

        match self.reload(silent).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to load board data: {}", e);
                let mut state = self.state.write().await;
                state.error = Some(e.message());
                state.is_loading = false;
                Err(e)
            }
        }
    }

    async fn reload(&self, silent: bool) -> Result<(), AppError> {
        let generation = self.reload_issued.fetch_add(1, Ordering::SeqCst) + 1;
        let user = self.remote.current_user().await?;
        let watermark = self.outbox.settled_through().await;
        let mut raw = fetch_raw(self.remote.as_ref(), &user.id).await?;
        let replayed = self.outbox.overlay_since(watermark, &mut raw).await;
        let snapshot = assemble(&raw, &user.id);

        if snapshot.workspaces.is_empty() && !silent {
            return self.provision_first_run(user).await;
        }

        let persisted = if silent {
            None
        } else {
            Some(self.session.load().await)
        };
        {
            let mut state = self.state.write().await;
            if generation < self.reload_applied.load(Ordering::SeqCst) {
                tracing::debug!("Discarding reload #{} superseded by a newer one", generation);
                if !silent {
                    state.is_loading = false;
                }
                return Ok(());
            }
            self.reload_applied.store(generation, Ordering::SeqCst);
            let board_count = snapshot.boards.len();
            apply_snapshot(&mut state, snapshot, persisted);
            state.user = Some(user);
            state.error = None;
            if !silent {
                state.is_loading = false;
            }
            tracing::debug!(
                "Loaded {} workspace(s), {} board(s), replayed {} pending write(s)",
                state.workspaces.len(),
                board_count,
                replayed
            );
        }
        self.outbox.prune_through(watermark).await;

        if !silent {
            self.persist_selection().await;
        }
        self.refresh_access().await;
        Ok(())
    }

    /// Switch the active board, persist the selection and reload its members.
    pub async fn set_active_board(&self, board_id: &str) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let workspace_id = state
                .board(board_id)
                .map(|b| b.workspace_id.clone())
                .ok_or_else(|| AppError::NotFound(format!("Board {} not found", board_id)))?;
            state.active_board_id = Some(board_id.to_string());
            state.active_workspace_id = Some(workspace_id);
        }
        self.after_selection_change().await;
        Ok(())
    }

    /// Switch the active workspace; its first board becomes active.
    pub async fn set_active_workspace(&self, workspace_id: &str) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            if state.workspace(workspace_id).is_none() {
                return Err(AppError::NotFound(format!(
                    "Workspace {} not found",
                    workspace_id
                )));
            }
            state.active_workspace_id = Some(workspace_id.to_string());
            state.active_board_id = state
                .boards_in_workspace(workspace_id)
                .first()
                .map(|b| b.id.clone());
        }
        self.after_selection_change().await;
        Ok(())
    }

    pub(super) async fn after_selection_change(&self) {
        self.persist_selection().await;
        self.follow_realtime_scope().await;
        self.refresh_members().await;
    }

    /// Reload members when the cache belongs to another board, else re-resolve the role.
    async fn refresh_access(&self) {
        let stale = {
            let state = self.state.read().await;
            state.members_board_id != state.active_board_id
        };
        if stale {
            self.refresh_members().await;
        } else {
            self.refresh_permissions().await;
        }
    }

    /// Reload the member cache of the active board, then the user's role.
    pub(super) async fn refresh_members(&self) {
        let board_id = {
            let mut state = self.state.write().await;
            match state.active_board_id.clone() {
                Some(id) => {
                    state.is_loading_members = true;
                    state.permissions.loading = true;
                    id
                }
                None => {
                    state.board_members = None;
                    state.members_board_id = None;
                    state.is_loading_members = false;
                    drop(state);
                    self.refresh_permissions().await;
                    return;
                }
            }
        };

        if let Err(e) = self.fetch_board_members(&board_id).await {
            tracing::warn!("Could not load members of board {}: {}", board_id, e);
        }
        {
            let mut state = self.state.write().await;
            if state.active_board_id.as_deref() == Some(board_id.as_str()) {
                state.is_loading_members = false;
            }
        }
        self.refresh_permissions().await;
    }

    /// Resolve the current user's role on the active board.
    pub(super) async fn refresh_permissions(&self) {
        let (user_id, resolution, board_id, workspace_id) = {
            let state = self.state.read().await;
            let Some(user_id) = state.user_id() else {
                return;
            };
            let members = if state.members_board_id == state.active_board_id {
                state.board_members.as_deref()
            } else {
                None
            };
            (
                user_id.to_string(),
                resolve_cached(user_id, state.active_workspace(), members),
                state.active_board_id.clone(),
                state.active_workspace_id.clone(),
            )
        };

        let role = match resolution {
            RoleResolution::Resolved(role) => role,
            RoleResolution::NeedsQuery => {
                query_role(
                    self.remote.as_ref(),
                    &user_id,
                    board_id.as_deref(),
                    workspace_id.as_deref(),
                )
                .await
            }
        };

        let mut state = self.state.write().await;
        if state.active_board_id == board_id && state.active_workspace_id == workspace_id {
            state.permissions = PermissionState::resolved(role);
        }
    }
}
