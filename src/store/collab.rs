//! Collaboration flows: invitations, board members, notifications and the account.
//!
//! Membership inserts are awaited because later steps depend on them. Everything after
//! the membership step is best-effort and goes through the outbox.

use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{
    rows_into, to_row, CellValue, ColumnType, Membership, Notification, NotificationKind,
    Profile, Role,
};
use crate::remote::{collections, procedures, to_patch, Filter, Query};
use crate::session::Selection;

use super::{Store, StoreState, WriteOp};

/// Trimmed, lowercased address; rejects anything without a local part and a domain.
fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::Validation(format!(
            "{:?} is not a valid email address",
            raw
        ))),
    }
}

impl Store {
    /// Members of a board joined with their profiles. Also refreshes the member cache
    /// when `board_id` is the active board.
    pub async fn fetch_board_members(&self, board_id: &str) -> Result<Vec<Membership>, AppError> {
        let query = Query::filtered(Filter::new().eq("board_id", board_id));
        let rows = self.remote.select(collections::BOARD_MEMBERS, &query).await?;
        let mut members: Vec<Membership> = rows_into(collections::BOARD_MEMBERS, &rows);

        if !members.is_empty() {
            let ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
            let query = Query::filtered(Filter::new().is_in("id", ids));
            match self.remote.select(collections::PROFILES, &query).await {
                Ok(rows) => {
                    let profiles: Vec<Profile> = rows_into(collections::PROFILES, &rows);
                    for member in members.iter_mut() {
                        member.profile = profiles.iter().find(|p| p.id == member.user_id).cloned();
                    }
                }
                Err(e) => tracing::warn!("Could not load member profiles: {}", e),
            }
        }

        let mut state = self.state.write().await;
        state
            .member_counts
            .insert(board_id.to_string(), members.len());
        if state.active_board_id.as_deref() == Some(board_id) {
            state.board_members = Some(members.clone());
            state.members_board_id = Some(board_id.to_string());
        }
        Ok(members)
    }

    async fn is_board_member(&self, board_id: &str, user_id: &str) -> Result<bool, AppError> {
        {
            let state = self.state.read().await;
            if state.members_board_id.as_deref() == Some(board_id) {
                if let Some(members) = &state.board_members {
                    return Ok(members.iter().any(|m| m.user_id == user_id));
                }
            }
        }
        let query = Query::filtered(
            Filter::new()
                .eq("board_id", board_id)
                .eq("user_id", user_id),
        );
        Ok(!self
            .remote
            .select(collections::BOARD_MEMBERS, &query)
            .await?
            .is_empty())
    }

    /// Add a user to a board, assign them to an item's people column and notify them.
    ///
    /// A failed membership insert aborts the chain. Assignment and notification
    /// failures are logged and not retried.
    pub async fn invite_and_assign_user(
        &self,
        board_id: &str,
        user_id: &str,
        role: Role,
        item_id: &str,
        column_id: &str,
    ) -> Result<(), AppError> {
        let (workspace_id, inviter) = {
            let state = self.state.read().await;
            let board = state
                .board(board_id)
                .ok_or_else(|| AppError::NotFound(format!("Board {} not found", board_id)))?;
            (board.workspace_id.clone(), state.require_user()?.id.clone())
        };

        if !self.is_board_member(board_id, user_id).await? {
            let membership = Membership::for_board(board_id, user_id, role);
            if let Err(e) = self
                .remote
                .insert(collections::BOARD_MEMBERS, vec![to_row(&membership)?])
                .await
            {
                tracing::error!(
                    "Could not add {} to board {}; assignment aborted: {}",
                    user_id,
                    board_id,
                    e
                );
                return Err(e);
            }
            if let Err(e) = self.fetch_board_members(board_id).await {
                tracing::warn!("Member cache refresh failed: {}", e);
            }
            self.log_activity(
                "member.invited",
                Some(&workspace_id),
                Some(board_id),
                json!({ "user_id": user_id, "role": role }),
            )
            .await;
        }

        let item_title = match self.assign_person(item_id, column_id, user_id).await {
            Ok(title) => title,
            Err(e) => {
                tracing::warn!("Assigning {} to item {} failed: {}", user_id, item_id, e);
                String::new()
            }
        };

        let notification = Notification::new(
            user_id,
            NotificationKind::Assignment,
            json!({
                "board_id": board_id,
                "workspace_id": workspace_id,
                "item_id": item_id,
                "item_title": item_title,
                "assigned_by": inviter,
            }),
        );
        match to_row(&notification) {
            Ok(row) => {
                self.enqueue(WriteOp::insert(collections::NOTIFICATIONS, vec![row]))
                    .await
            }
            Err(e) => tracing::warn!("Could not encode notification: {}", e),
        }
        Ok(())
    }

    /// Add `user_id` to an item's people value; returns the item title.
    async fn assign_person(
        &self,
        item_id: &str,
        column_id: &str,
        user_id: &str,
    ) -> Result<String, AppError> {
        let (title, people) = {
            let state = self.state.read().await;
            let board = state
                .boards
                .iter()
                .find(|b| b.item(item_id).is_some())
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            let column = board
                .column(column_id)
                .ok_or_else(|| AppError::NotFound(format!("Column {} not found", column_id)))?;
            if column.kind != ColumnType::People {
                return Err(AppError::Validation(format!(
                    "Column {} is not a people column",
                    column.title
                )));
            }
            let item = board
                .item(item_id)
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            let people = match item.values.get(column_id) {
                Some(CellValue::People(list)) => list.clone(),
                _ => Vec::new(),
            };
            (item.title.clone(), people)
        };

        if people.iter().any(|p| p == user_id) {
            return Ok(title);
        }
        let mut people = people;
        people.push(user_id.to_string());
        self.update_item_value(item_id, column_id, CellValue::People(people))
            .await?;
        Ok(title)
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, AppError> {
        let query = Query::filtered(Filter::new().eq("email", email));
        let rows = self.remote.select(collections::PROFILES, &query).await?;
        Ok(rows_into::<Profile>(collections::PROFILES, &rows)
            .into_iter()
            .next())
    }

    /// Invite a registered user to a board by email.
    pub async fn invite_to_board_by_email(
        &self,
        board_id: &str,
        email: &str,
        role: Role,
    ) -> Result<Membership, AppError> {
        let email = normalize_email(email)?;
        let (workspace_id, inviter) = {
            let state = self.state.read().await;
            let board = state
                .board(board_id)
                .ok_or_else(|| AppError::NotFound(format!("Board {} not found", board_id)))?;
            (board.workspace_id.clone(), state.require_user()?.id.clone())
        };

        let profile = self
            .find_profile_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Validation(format!("No user found with email {}", email)))?;
        if self.is_board_member(board_id, &profile.id).await? {
            return Err(AppError::Validation(format!(
                "{} is already a member of this board",
                email
            )));
        }

        let mut membership = Membership::for_board(board_id, &profile.id, role);
        self.remote
            .insert(collections::BOARD_MEMBERS, vec![to_row(&membership)?])
            .await?;
        membership.profile = Some(profile.clone());

        self.notify(
            &profile.id,
            NotificationKind::BoardInvite,
            json!({
                "board_id": board_id,
                "workspace_id": workspace_id,
                "role": role,
                "invited_by": inviter,
            }),
        )
        .await;
        if let Err(e) = self.fetch_board_members(board_id).await {
            tracing::warn!("Member cache refresh failed: {}", e);
        }
        self.log_activity(
            "member.invited",
            Some(&workspace_id),
            Some(board_id),
            json!({ "user_id": profile.id, "role": role }),
        )
        .await;
        tracing::info!("Invited {} to board {} as {}", email, board_id, role.as_str());
        Ok(membership)
    }

    /// Invite a registered user to a workspace by email.
    pub async fn invite_to_workspace_by_email(
        &self,
        workspace_id: &str,
        email: &str,
        role: Role,
    ) -> Result<Membership, AppError> {
        let email = normalize_email(email)?;
        let inviter = {
            let state = self.state.read().await;
            if state.workspace(workspace_id).is_none() {
                return Err(AppError::NotFound(format!(
                    "Workspace {} not found",
                    workspace_id
                )));
            }
            state.require_user()?.id.clone()
        };

        let profile = self
            .find_profile_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Validation(format!("No user found with email {}", email)))?;
        let existing = Query::filtered(
            Filter::new()
                .eq("workspace_id", workspace_id)
                .eq("user_id", profile.id.as_str()),
        );
        if !self
            .remote
            .select(collections::WORKSPACE_MEMBERS, &existing)
            .await?
            .is_empty()
        {
            return Err(AppError::Validation(format!(
                "{} is already a member of this workspace",
                email
            )));
        }

        let mut membership = Membership::for_workspace(workspace_id, &profile.id, role);
        self.remote
            .insert(collections::WORKSPACE_MEMBERS, vec![to_row(&membership)?])
            .await?;
        membership.profile = Some(profile.clone());

        self.notify(
            &profile.id,
            NotificationKind::WorkspaceInvite,
            json!({
                "workspace_id": workspace_id,
                "role": role,
                "invited_by": inviter,
            }),
        )
        .await;
        self.log_activity(
            "workspace.member_invited",
            Some(workspace_id),
            None,
            json!({ "user_id": profile.id, "role": role }),
        )
        .await;
        Ok(membership)
    }

    async fn notify(&self, user_id: &str, kind: NotificationKind, data: Value) {
        match to_row(&Notification::new(user_id, kind, data)) {
            Ok(row) => {
                self.enqueue(WriteOp::insert(collections::NOTIFICATIONS, vec![row]))
                    .await
            }
            Err(e) => tracing::warn!("Could not encode notification for {}: {}", user_id, e),
        }
    }

    pub async fn remove_board_member(&self, membership_id: &str) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let board_id = state.members_board_id.clone();
            if let Some(members) = state.board_members.as_mut() {
                let before = members.len();
                members.retain(|m| m.id != membership_id);
                let removed = before != members.len();
                let remaining = members.len();
                if let (true, Some(board_id)) = (removed, board_id) {
                    state.member_counts.insert(board_id, remaining);
                }
            }
        }
        self.enqueue(WriteOp::delete(
            collections::BOARD_MEMBERS,
            Filter::by_id(membership_id),
        ))
        .await;
        self.refresh_permissions().await;
        Ok(())
    }

    pub async fn update_board_member_role(
        &self,
        membership_id: &str,
        role: Role,
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            if let Some(member) = state
                .board_members
                .as_mut()
                .and_then(|members| members.iter_mut().find(|m| m.id == membership_id))
            {
                member.role = role;
            }
        }
        self.enqueue(WriteOp::update(
            collections::BOARD_MEMBERS,
            to_patch(json!({ "role": role })),
            Filter::by_id(membership_id),
        ))
        .await;
        self.refresh_permissions().await;
        Ok(())
    }

    // ----- notifications -----

    /// Load the current user's notifications, newest first.
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>, AppError> {
        let user_id = self.state.read().await.require_user()?.id.clone();
        let query = Query::filtered(Filter::new().eq("user_id", user_id)).order_by("created_at", false);
        let rows = self.remote.select(collections::NOTIFICATIONS, &query).await?;
        let notifications: Vec<Notification> = rows_into(collections::NOTIFICATIONS, &rows);
        self.state.write().await.notifications = notifications.clone();
        Ok(notifications)
    }

    pub async fn unread_notification_count(&self) -> usize {
        self.state
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let notification = state
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!("Notification {} not found", notification_id))
                })?;
            if notification.is_read {
                return Ok(());
            }
            notification.is_read = true;
        }
        self.enqueue(WriteOp::update(
            collections::NOTIFICATIONS,
            to_patch(json!({ "is_read": true })),
            Filter::by_id(notification_id),
        ))
        .await;
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> Result<(), AppError> {
        let user_id = {
            let mut state = self.state.write().await;
            let user_id = state.require_user()?.id.clone();
            for notification in state.notifications.iter_mut() {
                notification.is_read = true;
            }
            user_id
        };
        self.enqueue(WriteOp::update(
            collections::NOTIFICATIONS,
            to_patch(json!({ "is_read": true })),
            Filter::new().eq("user_id", user_id).eq("is_read", false),
        ))
        .await;
        Ok(())
    }

    /// Mark a notification read; invites also reload and open what they point at.
    pub async fn accept_notification(&self, notification_id: &str) -> Result<(), AppError> {
        let notification = self
            .state
            .read()
            .await
            .notifications
            .iter()
            .find(|n| n.id == notification_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("Notification {} not found", notification_id))
            })?;
        self.mark_notification_read(notification_id).await?;

        match notification.kind {
            NotificationKind::WorkspaceInvite => {
                self.load_user_data(true).await?;
                if let Some(workspace_id) = notification.workspace_id() {
                    self.set_active_workspace(workspace_id).await?;
                }
            }
            NotificationKind::BoardInvite => {
                self.load_user_data(true).await?;
                if let Some(board_id) = notification.board_id() {
                    self.set_active_board(board_id).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ----- account -----

    /// Delete the signed-in user's account and reset the store.
    pub async fn delete_account(&self) -> Result<(), AppError> {
        let user_id = self.state.read().await.require_user()?.id.clone();
        self.flush().await;
        self.remote
            .call(procedures::DELETE_USER, json!({ "user_id": user_id }))
            .await?;

        self.unsubscribe_from_realtime().await;
        *self.state.write().await = StoreState::default();
        if let Err(e) = self.session.save(&Selection::default()).await {
            tracing::warn!("Could not clear session: {}", e);
        }
        tracing::info!("Deleted account {}", user_id);
        Ok(())
    }
}
