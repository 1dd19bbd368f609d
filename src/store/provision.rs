//! First-run provisioning: a user with no workspace gets a starter workspace and board.

use serde_json::Value;

use crate::errors::AppError;
use crate::models::{
    from_row, to_row, Board, CellValue, Column, ColumnOption, ColumnType, Group, Item, Profile,
    Role, Workspace,
};
use crate::permissions::PermissionState;
use crate::remote::{collections, Filter, Query, UserIdentity};

use super::{Store, WriteOp};

const STARTER_GROUPS: [(&str, &str); 2] = [("This Week", "#579bfc"), ("Next Week", "#a25ddc")];

/// The starter workspace and its board: two groups, one column of every type and
/// two sample items. Ids are fresh; the shape is fixed.
pub fn first_run_board(user: &UserIdentity) -> (Workspace, Board) {
    let workspace = Workspace::new(workspace_title(user), &user.id, 0);
    let mut board = Board::new(&workspace.id, "My First Board", 0);

    board.groups = STARTER_GROUPS
        .iter()
        .enumerate()
        .map(|(idx, (title, color))| Group::new(&board.id, *title, *color, idx as i64))
        .collect();

    board.columns = ColumnType::ALL
        .iter()
        .enumerate()
        .map(|(idx, kind)| {
            let mut column = Column::new(&board.id, starter_column_title(*kind), *kind, idx as i64);
            if *kind == ColumnType::Dropdown {
                column.options = vec![
                    ColumnOption::new("Frontend", "#0086c0"),
                    ColumnOption::new("Backend", "#9d50dd"),
                    ColumnOption::new("Design", "#ff642e"),
                ];
            }
            column
        })
        .collect();

    let samples = [
        ("Welcome to your first board", 0usize),
        ("Drag me into another group", 1usize),
    ];
    for (position, (title, group_idx)) in samples.iter().enumerate() {
        let mut item = Item::new(
            &board.id,
            &board.groups[*group_idx].id,
            *title,
            position as i64,
        );
        if let Some((column, label)) = board
            .first_column_of(ColumnType::Status)
            .and_then(|c| c.default_status().map(|o| (c, o.label.clone())))
        {
            item.set_value(column, CellValue::Status(label)).ok();
        }
        if let Some(column) = board.first_column_of(ColumnType::People) {
            item.set_value(column, CellValue::People(vec![user.id.clone()]))
                .ok();
        }
        board.items.push(item);
    }

    (workspace, board)
}

fn workspace_title(user: &UserIdentity) -> String {
    match user.metadata.get("full_name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => format!("{}'s Workspace", name.trim()),
        _ => "My Workspace".to_string(),
    }
}

fn starter_column_title(kind: ColumnType) -> &'static str {
    match kind {
        ColumnType::Text => "Notes",
        ColumnType::Status => "Status",
        ColumnType::Date => "Due Date",
        ColumnType::Number => "Estimate",
        ColumnType::Dropdown => "Tags",
        ColumnType::Checkbox => "Done",
        ColumnType::Link => "Link",
        ColumnType::People => "Owner",
    }
}

/// Inserts for the starter entities, parents before children.
fn provision_writes(workspace: &Workspace, board: &Board) -> Result<Vec<WriteOp>, AppError> {
    let groups = board.groups.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
    let columns = board.columns.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
    let items = board
        .items
        .iter()
        .map(|i| to_row(&i.to_row()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(vec![
        WriteOp::insert(collections::WORKSPACES, vec![to_row(workspace)?]),
        WriteOp::insert(collections::BOARDS, vec![to_row(&board.to_row())?]),
        WriteOp::insert(collections::GROUPS, groups),
        WriteOp::insert(collections::COLUMNS, columns),
        WriteOp::insert(collections::ITEMS, items),
    ])
}

impl Store {
    /// Seed the starter workspace locally, then queue its inserts.
    pub(super) async fn provision_first_run(&self, user: UserIdentity) -> Result<(), AppError> {
        let (workspace, board) = first_run_board(&user);
        let writes = provision_writes(&workspace, &board)?;
        tracing::info!(
            "Provisioning first workspace {} with board {} for user {}",
            workspace.id,
            board.id,
            user.id
        );

        {
            let mut state = self.state.write().await;
            state.active_workspace_id = Some(workspace.id.clone());
            state.active_board_id = Some(board.id.clone());
            state.members_board_id = Some(board.id.clone());
            state.board_members = Some(Vec::new());
            state.member_counts.clear();
            state.workspaces = vec![workspace.clone()];
            state.boards = vec![board];
            state.permissions = PermissionState::resolved(Role::Owner);
            state.user = Some(user.clone());
            state.is_loading = false;
            state.error = None;
        }
        for op in writes {
            self.enqueue(op).await;
        }
        self.ensure_profile(&user).await;
        self.persist_selection().await;
        self.log_activity(
            "workspace.provisioned",
            Some(&workspace.id),
            None,
            Value::Null,
        )
        .await;
        Ok(())
    }

    /// Queue a profile row for the user when none exists, so others can invite them.
    async fn ensure_profile(&self, user: &UserIdentity) {
        let query = Query::filtered(Filter::by_id(&user.id));
        match self.remote.select(collections::PROFILES, &query).await {
            Ok(rows) if rows.iter().any(|r| from_row::<Profile>(r).is_ok()) => {}
            Ok(_) => {
                let profile = Profile {
                    id: user.id.clone(),
                    email: user.email.trim().to_lowercase(),
                    full_name: user
                        .metadata
                        .get("full_name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    avatar_url: user
                        .metadata
                        .get("avatar_url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                match to_row(&profile) {
                    Ok(row) => {
                        self.enqueue(WriteOp::insert(collections::PROFILES, vec![row]))
                            .await
                    }
                    Err(e) => tracing::warn!("Could not encode profile of {}: {}", user.id, e),
                }
            }
            Err(e) => tracing::warn!("Could not look up profile of {}: {}", user.id, e),
        }
    }
}
