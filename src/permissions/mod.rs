//! Role resolution and capability checks for the active board.
//!
//! Resolution order: workspace owner, then the loaded board-member cache, then a
//! remote membership query (board, then workspace). Any failure resolves to `Viewer`.

use serde::{Deserialize, Serialize};

use crate::models::{from_row, Membership, Role, Workspace};
use crate::remote::{collections, Filter, Query, RemoteStore};

/// Capability checked by the UI before offering an affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewBoard,
    ManageFeedback,
    EditItems,
    DeleteItems,
    ManageColumns,
    GroupUngroup,
    CreateBoard,
    DeleteBoard,
    InviteMembers,
    CreateSubWorkspace,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::ViewBoard,
        Action::ManageFeedback,
        Action::EditItems,
        Action::DeleteItems,
        Action::ManageColumns,
        Action::GroupUngroup,
        Action::CreateBoard,
        Action::DeleteBoard,
        Action::InviteMembers,
        Action::CreateSubWorkspace,
    ];

    /// Lowest role allowed to perform the action.
    pub fn min_role(&self) -> Role {
        match self {
            Action::ViewBoard | Action::ManageFeedback => Role::Viewer,
            Action::EditItems
            | Action::DeleteItems
            | Action::ManageColumns
            | Action::GroupUngroup => Role::Member,
            Action::CreateBoard
            | Action::DeleteBoard
            | Action::InviteMembers
            | Action::CreateSubWorkspace => Role::Admin,
        }
    }
}

pub fn role_allows(role: Role, action: Action) -> bool {
    role == Role::Owner || role >= action.min_role()
}

/// Outcome of resolving a role from data already in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleResolution {
    Resolved(Role),
    NeedsQuery,
}

/// Steps 1 and 2 of role resolution; no I/O.
pub fn resolve_cached(
    user_id: &str,
    workspace: Option<&Workspace>,
    board_members: Option<&[Membership]>,
) -> RoleResolution {
    if workspace.is_some_and(|w| w.owner_id == user_id) {
        return RoleResolution::Resolved(Role::Owner);
    }
    if let Some(found) = board_members
        .and_then(|members| members.iter().find(|m| m.user_id == user_id))
    {
        return RoleResolution::Resolved(found.role);
    }
    RoleResolution::NeedsQuery
}

/// Step 3: query board membership, then workspace membership. Fails closed.
pub async fn query_role(
    remote: &dyn RemoteStore,
    user_id: &str,
    board_id: Option<&str>,
    workspace_id: Option<&str>,
) -> Role {
    if let Some(board_id) = board_id {
        let filter = Filter::new()
            .eq("board_id", board_id)
            .eq("user_id", user_id);
        match lookup(remote, collections::BOARD_MEMBERS, filter).await {
            Ok(Some(role)) => return role,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Board membership query failed, defaulting to viewer: {}", e);
                return Role::Viewer;
            }
        }
    }
    if let Some(workspace_id) = workspace_id {
        let filter = Filter::new()
            .eq("workspace_id", workspace_id)
            .eq("user_id", user_id);
        match lookup(remote, collections::WORKSPACE_MEMBERS, filter).await {
            Ok(Some(role)) => return role,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    "Workspace membership query failed, defaulting to viewer: {}",
                    e
                );
            }
        }
    }
    Role::Viewer
}

async fn lookup(
    remote: &dyn RemoteStore,
    collection: &str,
    filter: Filter,
) -> Result<Option<Role>, crate::errors::AppError> {
    let rows = remote.select(collection, &Query::filtered(filter)).await?;
    match rows.first() {
        Some(row) => Ok(Some(from_row::<Membership>(row)?.role)),
        None => Ok(None),
    }
}

/// Effective permissions of the current user on the active board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub role: Option<Role>,
    /// A membership fetch is in flight; callers should show a loading state
    pub loading: bool,
}

impl PermissionState {
    pub fn resolved(role: Role) -> Self {
        Self {
            role: Some(role),
            loading: false,
        }
    }

    /// Unresolved or loading permissions deny everything.
    pub fn can(&self, action: Action) -> bool {
        match self.role {
            Some(role) if !self.loading => role_allows(role, action),
            _ => false,
        }
    }
}
