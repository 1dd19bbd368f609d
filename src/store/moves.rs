//! Drag-and-drop reordering of boards, columns and items.
//!
//! Each move is applied locally first, then persisted with one reorder procedure call
//! carrying the complete id list in its new order.

use serde_json::json;

use crate::errors::AppError;
use crate::models::Board;
use crate::remote::{collections, procedures, to_patch, Filter};

use super::{Store, StoreState, WriteOp};

/// Move the element at `from` so it ends up at index `to`; other elements keep their
/// relative order. Out-of-range indices leave the list unchanged.
pub fn array_move<T>(list: &mut Vec<T>, from: usize, to: usize) {
    if from >= list.len() || to >= list.len() || from == to {
        return;
    }
    let element = list.remove(from);
    list.insert(to, element);
}

fn position_of<T>(list: &[T], id: &str, id_of: impl Fn(&T) -> &str) -> Option<usize> {
    list.iter().position(|element| id_of(element) == id)
}

/// Outcome of an item move, used to build the remote writes.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ItemMove {
    pub item_id: String,
    /// New group when the item changed groups
    pub new_group_id: Option<String>,
    pub ordered_ids: Vec<String>,
}

/// Apply an item drop to a board.
///
/// `over_id` is either a group id (the item goes to the top of that group) or an item id
/// (same group: array move; other group: the item lands just before the target).
pub(super) fn move_item_in(
    board: &mut Board,
    active_id: &str,
    over_id: &str,
) -> Result<Option<ItemMove>, AppError> {
    if active_id == over_id {
        return Ok(None);
    }
    let from = position_of(&board.items, active_id, |i| &i.id)
        .ok_or_else(|| AppError::NotFound(format!("Item {} not found", active_id)))?;
    let old_group = board.items[from].group_id.clone();
    let source_group = board
        .effective_group_id(&board.items[from])
        .map(str::to_string);

    let target_group = if board.group(over_id).is_some() {
        let mut item = board.items.remove(from);
        item.group_id = over_id.to_string();
        let insert_at = board
            .items
            .iter()
            .position(|i| board.effective_group_id(i) == Some(over_id))
            .unwrap_or(board.items.len());
        board.items.insert(insert_at, item);
        over_id.to_string()
    } else {
        let over = board
            .item(over_id)
            .ok_or_else(|| AppError::NotFound(format!("Drop target {} not found", over_id)))?;
        let target_group = board
            .effective_group_id(over)
            .map(str::to_string)
            .ok_or_else(|| AppError::NotFound("Board has no groups".to_string()))?;

        if source_group.as_deref() == Some(target_group.as_str()) {
            let to = position_of(&board.items, over_id, |i| &i.id).unwrap_or(from);
            array_move(&mut board.items, from, to);
        } else {
            let mut item = board.items.remove(from);
            item.group_id = target_group.clone();
            let insert_at =
                position_of(&board.items, over_id, |i| &i.id).unwrap_or(board.items.len());
            board.items.insert(insert_at, item);
        }
        target_group
    };

    // A dangling reference is normalized to the group the item rendered in.
    if let Some(item) = board.item_mut(active_id) {
        item.group_id = target_group.clone();
    }
    board.reindex();

    Ok(Some(ItemMove {
        item_id: active_id.to_string(),
        new_group_id: (old_group != target_group).then_some(target_group),
        ordered_ids: board.items.iter().map(|i| i.id.clone()).collect(),
    }))
}

/// Reorder the boards of one workspace; returns the workspace's ids in new order.
fn move_board_in(
    state: &mut StoreState,
    active_id: &str,
    over_id: &str,
) -> Result<Option<Vec<String>>, AppError> {
    if active_id == over_id {
        return Ok(None);
    }
    let workspace_id = state
        .board(active_id)
        .map(|b| b.workspace_id.clone())
        .ok_or_else(|| AppError::NotFound(format!("Board {} not found", active_id)))?;

    let mut ids: Vec<String> = state
        .boards_in_workspace(&workspace_id)
        .iter()
        .map(|b| b.id.clone())
        .collect();
    let from = position_of(&ids, active_id, |id| id).unwrap_or(0);
    let to = position_of(&ids, over_id, |id| id).ok_or_else(|| {
        AppError::NotFound(format!(
            "Board {} is not in workspace {}",
            over_id, workspace_id
        ))
    })?;
    array_move(&mut ids, from, to);

    for board in state.boards.iter_mut() {
        if let Some(idx) = ids.iter().position(|id| *id == board.id) {
            board.position = idx as i64;
        }
    }
    state.boards.sort_by_key(|b| b.position);
    Ok(Some(ids))
}

impl Store {
    /// Reorder boards within their workspace.
    pub async fn move_board(&self, active_id: &str, over_id: &str) -> Result<(), AppError> {
        let ids = {
            let mut state = self.state.write().await;
            move_board_in(&mut state, active_id, over_id)?
        };
        if let Some(ids) = ids {
            self.enqueue(WriteOp::call(
                procedures::REORDER_BOARDS,
                json!({ "ids": ids }),
            ))
            .await;
        }
        Ok(())
    }

    /// Reorder columns of the board holding `active_id`.
    pub async fn move_column(&self, active_id: &str, over_id: &str) -> Result<(), AppError> {
        if active_id == over_id {
            return Ok(());
        }
        let ids = {
            let mut state = self.state.write().await;
            let board = state.board_of_column_mut(active_id)?;
            let from = position_of(&board.columns, active_id, |c| &c.id).unwrap_or(0);
            let to = position_of(&board.columns, over_id, |c| &c.id)
                .ok_or_else(|| AppError::NotFound(format!("Column {} not found", over_id)))?;
            array_move(&mut board.columns, from, to);
            board.reindex();
            board
                .columns
                .iter()
                .map(|c| c.id.clone())
                .collect::<Vec<_>>()
        };
        self.enqueue(WriteOp::call(
            procedures::REORDER_COLUMNS,
            json!({ "ids": ids }),
        ))
        .await;
        Ok(())
    }

    /// Drop item `active_id` onto a group or another item of the active board.
    pub async fn move_item(&self, active_id: &str, over_id: &str) -> Result<(), AppError> {
        let moved = {
            let mut state = self.state.write().await;
            let board = state.active_board_mut()?;
            move_item_in(board, active_id, over_id)?
        };
        let Some(moved) = moved else {
            return Ok(());
        };

        if let Some(group_id) = &moved.new_group_id {
            self.enqueue(WriteOp::update(
                collections::ITEMS,
                to_patch(json!({ "group_id": group_id })),
                Filter::by_id(&moved.item_id),
            ))
            .await;
        }
        self.enqueue(WriteOp::call(
            procedures::REORDER_ITEMS,
            json!({ "ids": moved.ordered_ids }),
        ))
        .await;
        Ok(())
    }
}
