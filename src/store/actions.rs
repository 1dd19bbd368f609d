//! Optimistic edit actions.
//!
//! Each action validates its input, mutates the state under one write lock, releases
//! it and queues the matching remote write. Nothing is rolled back on write failure;
//! the failure surfaces through `Store::write_error` and the next full reload.

use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{
    to_row, Aggregation, Board, CellValue, Column, ColumnOption, ColumnType, Group, Item,
    ItemUpdate, SortSpec, Workspace,
};
use crate::remote::{collections, procedures, to_patch, Filter};

use super::{require_title, Store, WriteOp};

/// Colors handed to new groups in turn.
const GROUP_COLORS: [&str; 6] = [
    "#579bfc", "#a25ddc", "#00c875", "#fdab3d", "#e2445c", "#66ccff",
];

const MIN_COLUMN_WIDTH: u32 = 60;

fn check_width(width: u32) -> Result<u32, AppError> {
    if width < MIN_COLUMN_WIDTH {
        return Err(AppError::Validation(format!(
            "Width must be at least {}px",
            MIN_COLUMN_WIDTH
        )));
    }
    Ok(width)
}

fn next_position(positions: impl Iterator<Item = i64>) -> i64 {
    positions.max().map(|p| p + 1).unwrap_or(0)
}

impl Store {
    // ----- workspaces -----

    pub async fn add_workspace(&self, title: &str) -> Result<String, AppError> {
        let title = require_title(title, "Workspace title")?;
        let workspace = {
            let mut state = self.state.write().await;
            let owner_id = state.require_user()?.id.clone();
            let position = next_position(state.workspaces.iter().map(|w| w.position));
            let workspace = Workspace::new(title, owner_id, position);
            state.workspaces.push(workspace.clone());
            workspace
        };

        self.enqueue(WriteOp::insert(
            collections::WORKSPACES,
            vec![to_row(&workspace)?],
        ))
        .await;
        self.log_activity(
            "workspace.created",
            Some(&workspace.id),
            None,
            json!({ "title": workspace.title }),
        )
        .await;
        Ok(workspace.id)
    }

    pub async fn rename_workspace(&self, workspace_id: &str, title: &str) -> Result<(), AppError> {
        let title = require_title(title, "Workspace title")?;
        {
            let mut state = self.state.write().await;
            state.workspace_mut(workspace_id)?.title = title.clone();
        }
        self.enqueue(WriteOp::update(
            collections::WORKSPACES,
            to_patch(json!({ "title": title })),
            Filter::by_id(workspace_id),
        ))
        .await;
        Ok(())
    }

    /// Delete a workspace and, locally, its boards. The remote cascades the rest.
    pub async fn delete_workspace(&self, workspace_id: &str) -> Result<(), AppError> {
        let selection_changed = {
            let mut state = self.state.write().await;
            if state.workspace(workspace_id).is_none() {
                return Err(AppError::NotFound(format!(
                    "Workspace {} not found",
                    workspace_id
                )));
            }
            let before = (
                state.active_workspace_id.clone(),
                state.active_board_id.clone(),
            );
            state.workspaces.retain(|w| w.id != workspace_id);
            state.boards.retain(|b| b.workspace_id != workspace_id);
            state.repair_selection();
            before != (state.active_workspace_id.clone(), state.active_board_id.clone())
        };

        self.enqueue(WriteOp::delete(
            collections::WORKSPACES,
            Filter::by_id(workspace_id),
        ))
        .await;
        self.log_activity("workspace.deleted", Some(workspace_id), None, Value::Null)
            .await;
        if selection_changed {
            self.after_selection_change().await;
        }
        Ok(())
    }

    // ----- boards -----

    /// Create a board with one empty group in the active workspace.
    pub async fn add_board(&self, title: &str) -> Result<String, AppError> {
        let title = require_title(title, "Board title")?;
        let board = {
            let mut state = self.state.write().await;
            let workspace_id = state
                .active_workspace_id
                .clone()
                .ok_or_else(|| AppError::NotFound("No active workspace".to_string()))?;
            let position = next_position(
                state
                    .boards_in_workspace(&workspace_id)
                    .iter()
                    .map(|b| b.position),
            );
            let mut board = Board::new(workspace_id, title, position);
            board.groups = vec![Group::new(&board.id, "New Group", GROUP_COLORS[0], 0)];
            state.boards.push(board.clone());
            board
        };

        self.enqueue(WriteOp::insert(
            collections::BOARDS,
            vec![to_row(&board.to_row())?],
        ))
        .await;
        self.enqueue(WriteOp::insert(
            collections::GROUPS,
            board.groups.iter().map(to_row).collect::<Result<Vec<_>, _>>()?,
        ))
        .await;
        self.log_activity(
            "board.created",
            Some(&board.workspace_id),
            Some(&board.id),
            json!({ "title": board.title }),
        )
        .await;
        Ok(board.id)
    }

    pub async fn rename_board(&self, board_id: &str, title: &str) -> Result<(), AppError> {
        let title = require_title(title, "Board title")?;
        {
            let mut state = self.state.write().await;
            state.board_mut(board_id)?.title = title.clone();
        }
        self.enqueue(WriteOp::update(
            collections::BOARDS,
            to_patch(json!({ "title": title })),
            Filter::by_id(board_id),
        ))
        .await;
        Ok(())
    }

    pub async fn delete_board(&self, board_id: &str) -> Result<(), AppError> {
        let (workspace_id, selection_changed) = {
            let mut state = self.state.write().await;
            let workspace_id = state
                .board(board_id)
                .map(|b| b.workspace_id.clone())
                .ok_or_else(|| AppError::NotFound(format!("Board {} not found", board_id)))?;
            let was_active = state.active_board_id.as_deref() == Some(board_id);
            state.boards.retain(|b| b.id != board_id);
            state.member_counts.remove(board_id);
            state.repair_selection();
            (workspace_id, was_active)
        };

        self.enqueue(WriteOp::delete(collections::BOARDS, Filter::by_id(board_id)))
            .await;
        self.log_activity(
            "board.deleted",
            Some(&workspace_id),
            Some(board_id),
            Value::Null,
        )
        .await;
        if selection_changed {
            self.after_selection_change().await;
        }
        Ok(())
    }

    /// Move a board to the end of another workspace.
    pub async fn move_board_to_workspace(
        &self,
        board_id: &str,
        workspace_id: &str,
    ) -> Result<(), AppError> {
        let (position, follows) = {
            let mut state = self.state.write().await;
            if state.workspace(workspace_id).is_none() {
                return Err(AppError::NotFound(format!(
                    "Workspace {} not found",
                    workspace_id
                )));
            }
            let position = next_position(
                state
                    .boards_in_workspace(workspace_id)
                    .iter()
                    .filter(|b| b.id != board_id)
                    .map(|b| b.position),
            );
            let board = state.board_mut(board_id)?;
            board.workspace_id = workspace_id.to_string();
            board.position = position;
            let follows = state.active_board_id.as_deref() == Some(board_id);
            if follows {
                state.active_workspace_id = Some(workspace_id.to_string());
            }
            (position, follows)
        };

        self.enqueue(WriteOp::update(
            collections::BOARDS,
            to_patch(json!({ "workspace_id": workspace_id, "position": position })),
            Filter::by_id(board_id),
        ))
        .await;
        if follows {
            self.after_selection_change().await;
        }
        Ok(())
    }

    pub async fn set_item_column_width(&self, board_id: &str, width: u32) -> Result<(), AppError> {
        let width = check_width(width)?;
        {
            let mut state = self.state.write().await;
            state.board_mut(board_id)?.item_column_width = width;
        }
        self.enqueue(WriteOp::update(
            collections::BOARDS,
            to_patch(json!({ "item_column_width": width })),
            Filter::by_id(board_id),
        ))
        .await;
        Ok(())
    }

    /// Group by a column's values, or back to manual groups with `None`.
    pub async fn set_group_by(
        &self,
        board_id: &str,
        column_id: Option<&str>,
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let board = state.board_mut(board_id)?;
            if let Some(column_id) = column_id {
                if board.column(column_id).is_none() {
                    return Err(AppError::NotFound(format!(
                        "Column {} not found",
                        column_id
                    )));
                }
            }
            board.group_by_column_id = column_id.map(str::to_string);
        }
        self.enqueue(WriteOp::update(
            collections::BOARDS,
            to_patch(json!({ "group_by_column_id": column_id })),
            Filter::by_id(board_id),
        ))
        .await;
        Ok(())
    }

    // ----- groups -----

    pub async fn add_group(&self, board_id: &str, title: &str) -> Result<String, AppError> {
        let title = require_title(title, "Group title")?;
        let group = {
            let mut state = self.state.write().await;
            let board = state.board_mut(board_id)?;
            let color = GROUP_COLORS[board.groups.len() % GROUP_COLORS.len()];
            let position = next_position(board.groups.iter().map(|g| g.position));
            let group = Group::new(board_id, title, color, position);
            board.groups.push(group.clone());
            group
        };
        self.enqueue(WriteOp::insert(collections::GROUPS, vec![to_row(&group)?]))
            .await;
        Ok(group.id)
    }

    pub async fn rename_group(&self, group_id: &str, title: &str) -> Result<(), AppError> {
        let title = require_title(title, "Group title")?;
        self.patch_group(group_id, json!({ "title": title }), |g| g.title = title.clone())
            .await
    }

    pub async fn set_group_color(&self, group_id: &str, color: &str) -> Result<(), AppError> {
        if !color.starts_with('#') {
            return Err(AppError::Validation(format!(
                "Invalid group color {:?}",
                color
            )));
        }
        self.patch_group(group_id, json!({ "color": color }), |g| {
            g.color = color.to_string()
        })
        .await
    }

    async fn patch_group(
        &self,
        group_id: &str,
        patch: Value,
        apply: impl FnOnce(&mut Group),
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let board = state.board_of_group_mut(group_id)?;
            if let Some(group) = board.groups.iter_mut().find(|g| g.id == group_id) {
                apply(group);
            }
        }
        self.enqueue(WriteOp::update(
            collections::GROUPS,
            to_patch(patch),
            Filter::by_id(group_id),
        ))
        .await;
        Ok(())
    }

    /// Delete a group; its items move to the first remaining group.
    pub async fn delete_group(&self, group_id: &str) -> Result<(), AppError> {
        let fallback = {
            let mut state = self.state.write().await;
            let board = state.board_of_group_mut(group_id)?;
            board.groups.retain(|g| g.id != group_id);
            board.view.collapsed_groups.remove(group_id);
            let fallback = board.groups.first().map(|g| g.id.clone());
            if let Some(fallback) = &fallback {
                for item in board.items.iter_mut().filter(|i| i.group_id == group_id) {
                    item.group_id = fallback.clone();
                }
            }
            fallback
        };

        if let Some(fallback) = fallback {
            self.enqueue(WriteOp::update(
                collections::ITEMS,
                to_patch(json!({ "group_id": fallback })),
                Filter::new().eq("group_id", group_id),
            ))
            .await;
        }
        self.enqueue(WriteOp::delete(collections::GROUPS, Filter::by_id(group_id)))
            .await;
        Ok(())
    }

    /// Flip a group's collapsed flag; returns the new state. Client-local.
    pub async fn toggle_group_collapsed(&self, group_id: &str) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let board = state.board_of_group_mut(group_id)?;
        let collapsed = &mut board.view.collapsed_groups;
        if collapsed.remove(group_id) {
            Ok(false)
        } else {
            collapsed.insert(group_id.to_string());
            Ok(true)
        }
    }

    // ----- columns -----

    pub async fn add_column(
        &self,
        board_id: &str,
        kind: ColumnType,
        title: &str,
    ) -> Result<String, AppError> {
        let title = require_title(title, "Column title")?;
        let column = {
            let mut state = self.state.write().await;
            let board = state.board_mut(board_id)?;
            let position = next_position(board.columns.iter().map(|c| c.position));
            let column = Column::new(board_id, title, kind, position);
            board.columns.push(column.clone());
            column
        };
        self.enqueue(WriteOp::insert(collections::COLUMNS, vec![to_row(&column)?]))
            .await;
        Ok(column.id)
    }

    pub async fn rename_column(&self, column_id: &str, title: &str) -> Result<(), AppError> {
        let title = require_title(title, "Column title")?;
        {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(column_id)?;
            if let Some(column) = board.column_mut(column_id) {
                column.title = title.clone();
            }
        }
        self.enqueue(WriteOp::update(
            collections::COLUMNS,
            to_patch(json!({ "title": title })),
            Filter::by_id(column_id),
        ))
        .await;
        Ok(())
    }

    pub async fn set_column_width(&self, column_id: &str, width: u32) -> Result<(), AppError> {
        let width = check_width(width)?;
        {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(column_id)?;
            if let Some(column) = board.column_mut(column_id) {
                column.width = width;
            }
        }
        self.enqueue(WriteOp::update(
            collections::COLUMNS,
            to_patch(json!({ "width": width })),
            Filter::by_id(column_id),
        ))
        .await;
        Ok(())
    }

    /// Footer aggregation of a number column; `None` restores the default sum.
    pub async fn set_column_aggregation(
        &self,
        column_id: &str,
        aggregation: Option<Aggregation>,
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(column_id)?;
            let Some(column) = board.column_mut(column_id) else {
                return Err(AppError::NotFound(format!("Column {} not found", column_id)));
            };
            if column.kind != ColumnType::Number {
                return Err(AppError::Validation(format!(
                    "Only number columns aggregate, {} is {}",
                    column.title,
                    column.kind.as_str()
                )));
            }
            column.aggregation = aggregation;
        }
        self.enqueue(WriteOp::update(
            collections::COLUMNS,
            to_patch(json!({ "aggregation": aggregation })),
            Filter::by_id(column_id),
        ))
        .await;
        Ok(())
    }

    /// Delete a column and drop its key from every item of the board.
    pub async fn delete_column(&self, column_id: &str) -> Result<(), AppError> {
        let (board_id, cleared_group_by, touched) = {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(column_id)?;
            board.columns.retain(|c| c.id != column_id);
            board.view.filters.remove(column_id);
            if board
                .view
                .sort
                .as_ref()
                .is_some_and(|s| s.column_id.as_deref() == Some(column_id))
            {
                board.view.sort = None;
            }
            let cleared_group_by = board.group_by_column_id.as_deref() == Some(column_id);
            if cleared_group_by {
                board.group_by_column_id = None;
            }

            let mut touched = Vec::new();
            for item in board.items.iter_mut() {
                if item.remove_value(column_id) {
                    touched.push((item.id.clone(), item.values_json()));
                }
            }
            (board.id.clone(), cleared_group_by, touched)
        };

        self.enqueue(WriteOp::delete(collections::COLUMNS, Filter::by_id(column_id)))
            .await;
        for (item_id, values) in touched {
            self.enqueue(WriteOp::update(
                collections::ITEMS,
                to_patch(json!({ "values": values })),
                Filter::by_id(item_id),
            ))
            .await;
        }
        if cleared_group_by {
            self.enqueue(WriteOp::update(
                collections::BOARDS,
                to_patch(json!({ "group_by_column_id": Value::Null })),
                Filter::by_id(board_id),
            ))
            .await;
        }
        Ok(())
    }

    /// Append an option to a status or dropdown column; returns its id.
    pub async fn add_column_option(
        &self,
        column_id: &str,
        label: &str,
        color: &str,
    ) -> Result<String, AppError> {
        let label = require_title(label, "Option label")?;
        let option = ColumnOption::new(label, color);
        let option_id = option.id.clone();
        let options = {
            let mut state = self.state.write().await;
            let column = option_column(state.board_of_column_mut(column_id)?, column_id)?;
            column.options.push(option);
            column.options.clone()
        };
        self.persist_options(column_id, &options).await?;
        Ok(option_id)
    }

    /// Edit an option's label and/or color. A relabel rewrites item values that stored
    /// the old label.
    pub async fn update_column_option(
        &self,
        column_id: &str,
        option_id: &str,
        label: Option<&str>,
        color: Option<&str>,
    ) -> Result<(), AppError> {
        let label = label
            .map(|l| require_title(l, "Option label"))
            .transpose()?;
        let (options, touched) = {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(column_id)?;
            let column = option_column(board, column_id)?;
            let option = column
                .options
                .iter_mut()
                .find(|o| o.id == option_id)
                .ok_or_else(|| AppError::NotFound(format!("Option {} not found", option_id)))?;
            let old_label = option.label.clone();
            if let Some(label) = &label {
                option.label = label.clone();
            }
            if let Some(color) = color {
                option.color = color.to_string();
            }
            let options = column.options.clone();

            let mut touched = Vec::new();
            if let Some(new_label) = label.filter(|l| *l != old_label) {
                for item in board.items.iter_mut() {
                    if relabel(item, column_id, &old_label, &new_label) {
                        touched.push((item.id.clone(), item.values_json()));
                    }
                }
            }
            (options, touched)
        };

        self.persist_options(column_id, &options).await?;
        for (item_id, values) in touched {
            self.enqueue(WriteOp::update(
                collections::ITEMS,
                to_patch(json!({ "values": values })),
                Filter::by_id(item_id),
            ))
            .await;
        }
        Ok(())
    }

    pub async fn delete_column_option(
        &self,
        column_id: &str,
        option_id: &str,
    ) -> Result<(), AppError> {
        let options = {
            let mut state = self.state.write().await;
            let column = option_column(state.board_of_column_mut(column_id)?, column_id)?;
            let before = column.options.len();
            column.options.retain(|o| o.id != option_id);
            if column.options.len() == before {
                return Err(AppError::NotFound(format!("Option {} not found", option_id)));
            }
            column.options.clone()
        };
        self.persist_options(column_id, &options).await
    }

    async fn persist_options(
        &self,
        column_id: &str,
        options: &[ColumnOption],
    ) -> Result<(), AppError> {
        let options = serde_json::to_value(options)?;
        self.enqueue(WriteOp::update(
            collections::COLUMNS,
            to_patch(json!({ "options": options })),
            Filter::by_id(column_id),
        ))
        .await;
        Ok(())
    }

    // ----- items -----

    /// Append an item to a group. Status columns start at their default option.
    pub async fn add_item(&self, group_id: &str, title: &str) -> Result<String, AppError> {
        let title = require_title(title, "Item title")?;
        let item = {
            let mut state = self.state.write().await;
            let board = state.board_of_group_mut(group_id)?;
            let position = next_position(board.items.iter().map(|i| i.position));
            let mut item = Item::new(&board.id, group_id, title, position);
            for column in board.columns.iter() {
                if let Some(option) = column.default_status() {
                    item.set_value(column, CellValue::Status(option.label.clone()))?;
                }
            }
            board.items.push(item.clone());
            item
        };
        self.enqueue(WriteOp::insert(
            collections::ITEMS,
            vec![to_row(&item.to_row())?],
        ))
        .await;
        Ok(item.id)
    }

    pub async fn rename_item(&self, item_id: &str, title: &str) -> Result<(), AppError> {
        let title = require_title(title, "Item title")?;
        {
            let mut state = self.state.write().await;
            if let Some(item) = state.board_of_item_mut(item_id)?.item_mut(item_id) {
                item.title = title.clone();
            }
        }
        self.enqueue(WriteOp::update(
            collections::ITEMS,
            to_patch(json!({ "title": title })),
            Filter::by_id(item_id),
        ))
        .await;
        Ok(())
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<(), AppError> {
        let (workspace_id, board_id, title) = {
            let mut state = self.state.write().await;
            let board = state.board_of_item_mut(item_id)?;
            let title = board
                .item(item_id)
                .map(|i| i.title.clone())
                .unwrap_or_default();
            board.items.retain(|i| i.id != item_id);
            (board.workspace_id.clone(), board.id.clone(), title)
        };
        self.enqueue(WriteOp::delete(collections::ITEMS, Filter::by_id(item_id)))
            .await;
        self.log_activity(
            "item.deleted",
            Some(&workspace_id),
            Some(&board_id),
            json!({ "item_id": item_id, "title": title }),
        )
        .await;
        Ok(())
    }

    /// Copy an item, values included, directly below the original.
    pub async fn duplicate_item(&self, item_id: &str) -> Result<String, AppError> {
        let (copy, ordered_ids) = {
            let mut state = self.state.write().await;
            let board = state.board_of_item_mut(item_id)?;
            let index = board
                .items
                .iter()
                .position(|i| i.id == item_id)
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            let original = &board.items[index];
            let mut copy = Item::new(
                &original.board_id,
                &original.group_id,
                format!("{} (copy)", original.title),
                original.position + 1,
            );
            copy.values = original.values.clone();
            copy.raw_values = original.raw_values.clone();
            copy.is_hidden = original.is_hidden;
            board.items.insert(index + 1, copy.clone());
            board.reindex();
            let copy = board.item(&copy.id).cloned().unwrap_or(copy);
            let ordered_ids: Vec<String> = board.items.iter().map(|i| i.id.clone()).collect();
            (copy, ordered_ids)
        };

        self.enqueue(WriteOp::insert(
            collections::ITEMS,
            vec![to_row(&copy.to_row())?],
        ))
        .await;
        self.enqueue(WriteOp::call(
            procedures::REORDER_ITEMS,
            json!({ "ids": ordered_ids }),
        ))
        .await;
        Ok(copy.id)
    }

    pub async fn set_item_hidden(&self, item_id: &str, hidden: bool) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            if let Some(item) = state.board_of_item_mut(item_id)?.item_mut(item_id) {
                item.is_hidden = hidden;
            }
        }
        self.enqueue(WriteOp::update(
            collections::ITEMS,
            to_patch(json!({ "is_hidden": hidden })),
            Filter::by_id(item_id),
        ))
        .await;
        Ok(())
    }

    /// Set one cell. The remote receives the complete merged value map.
    pub async fn update_item_value(
        &self,
        item_id: &str,
        column_id: &str,
        value: CellValue,
    ) -> Result<(), AppError> {
        let values = {
            let mut state = self.state.write().await;
            let board = state.board_of_item_mut(item_id)?;
            let column = board
                .column(column_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Column {} not found", column_id)))?;
            let item = board
                .item_mut(item_id)
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            item.set_value(&column, value)?;
            item.values_json()
        };
        self.persist_values(item_id, values).await;
        Ok(())
    }

    pub async fn clear_item_value(&self, item_id: &str, column_id: &str) -> Result<(), AppError> {
        let values = {
            let mut state = self.state.write().await;
            let item = state
                .board_of_item_mut(item_id)?
                .item_mut(item_id)
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            if !item.remove_value(column_id) {
                return Ok(());
            }
            item.values_json()
        };
        self.persist_values(item_id, values).await;
        Ok(())
    }

    async fn persist_values(&self, item_id: &str, values: serde_json::Map<String, Value>) {
        self.enqueue(WriteOp::update(
            collections::ITEMS,
            to_patch(json!({ "values": values })),
            Filter::by_id(item_id),
        ))
        .await;
    }

    /// Post a comment on an item; newest first. Returns the update id.
    pub async fn add_item_update(&self, item_id: &str, body: &str) -> Result<String, AppError> {
        let body = require_title(body, "Update")?;
        let (update_id, updates) = {
            let mut state = self.state.write().await;
            let author = state.require_user()?.id.clone();
            let item = state
                .board_of_item_mut(item_id)?
                .item_mut(item_id)
                .ok_or_else(|| AppError::NotFound(format!("Item {} not found", item_id)))?;
            let update = ItemUpdate::new(author, body);
            let update_id = update.id.clone();
            item.updates.insert(0, update);
            (update_id, serde_json::to_value(&item.updates)?)
        };
        self.enqueue(WriteOp::update(
            collections::ITEMS,
            to_patch(json!({ "updates": updates })),
            Filter::by_id(item_id),
        ))
        .await;
        Ok(update_id)
    }

    // ----- view (client-local) -----

    pub async fn set_search(&self, text: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.active_board_mut()?.view.search = text.to_string();
        Ok(())
    }

    pub async fn set_sort(&self, sort: Option<SortSpec>) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let board = state.active_board_mut()?;
        if let Some(column_id) = sort.as_ref().and_then(|s| s.column_id.as_deref()) {
            if board.column(column_id).is_none() {
                return Err(AppError::NotFound(format!("Column {} not found", column_id)));
            }
        }
        board.view.sort = sort;
        Ok(())
    }

    /// Accept only items whose value in `column_id` matches one of `labels`.
    /// An empty label list removes the filter.
    pub async fn set_column_filter(
        &self,
        column_id: &str,
        labels: Vec<String>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let board = state.active_board_mut()?;
        if board.column(column_id).is_none() {
            return Err(AppError::NotFound(format!("Column {} not found", column_id)));
        }
        if labels.is_empty() {
            board.view.filters.remove(column_id);
        } else {
            board.view.filters.insert(column_id.to_string(), labels);
        }
        Ok(())
    }

    pub async fn clear_filters(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let board = state.active_board_mut()?;
        board.view.filters.clear();
        board.view.search.clear();
        Ok(())
    }
}

fn option_column<'a>(board: &'a mut Board, column_id: &str) -> Result<&'a mut Column, AppError> {
    let column = board
        .column_mut(column_id)
        .ok_or_else(|| AppError::NotFound(format!("Column {} not found", column_id)))?;
    if !column.kind.has_options() {
        return Err(AppError::Validation(format!(
            "Column {} has no options",
            column.title
        )));
    }
    Ok(column)
}

/// Replace `old` with `new` in an item's status or dropdown value.
fn relabel(item: &mut Item, column_id: &str, old: &str, new: &str) -> bool {
    match item.values.get_mut(column_id) {
        Some(CellValue::Status(label)) if label == old => {
            *label = new.to_string();
            true
        }
        Some(CellValue::Dropdown(labels)) if labels.iter().any(|l| l == old) => {
            for label in labels.iter_mut().filter(|l| *l == old) {
                *label = new.to_string();
            }
            true
        }
        _ => false,
    }
}
