//! Presentation-ready ordering of a board.
//!
//! [`project`] turns the flat item list, the groups and the client-local view settings
//! into the row sequence a table renders: one `Group` row per group, a single `Header`,
//! the visible `Item` rows and one `Footer` per expanded group. It is a pure function;
//! [`ProjectionMemo`] caches its output for unchanged inputs.

mod aggregate;
mod window;

pub use aggregate::*;
pub use window::*;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    default_group_color, Board, Column, ColumnType, Group, Item, SortDirection, SortSpec,
    ViewState,
};

pub const DEFAULT_GROUP_ID: &str = "default";
pub const DEFAULT_GROUP_TITLE: &str = "Main Table";
pub const DYNAMIC_GROUP_ID: &str = "dynamic";
pub const DYNAMIC_GROUP_TITLE: &str = "All Items";

/// One rendered row.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewRow {
    Group {
        id: String,
        title: String,
        color: String,
        /// Items assigned to the group, before search and filters
        count: usize,
        collapsed: bool,
    },
    Header {
        group_id: String,
    },
    Item {
        id: String,
        group_id: String,
    },
    Footer {
        group_id: String,
        summaries: Vec<ColumnSummary>,
    },
}

impl ViewRow {
    pub fn item_id(&self) -> Option<&str> {
        match self {
            ViewRow::Item { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Project a whole board using its own view settings.
pub fn project_board(board: &Board) -> Vec<ViewRow> {
    project(
        &board.items,
        &board.groups,
        &board.columns,
        board.group_by_column_id.as_deref(),
        &board.view,
    )
}

/// Compute the ordered row sequence.
///
/// With `group_by_column_id` set, manual groups are bypassed and every item lands in a
/// single synthetic group. This dynamic mode is deliberately partial.
pub fn project(
    items: &[Item],
    groups: &[Group],
    columns: &[Column],
    group_by_column_id: Option<&str>,
    view: &ViewState,
) -> Vec<ViewRow> {
    let effective = effective_groups(groups, group_by_column_id);
    let known: Vec<&str> = effective.iter().map(|g| g.id.as_str()).collect();

    let mut buckets: HashMap<&str, Vec<&Item>> = HashMap::new();
    for item in items {
        let target = if known.contains(&item.group_id.as_str()) {
            item.group_id.as_str()
        } else {
            known[0]
        };
        buckets.entry(target).or_default().push(item);
    }

    let mut rows = Vec::new();
    let mut header_emitted = false;
    for group in &effective {
        let members = buckets.remove(group.id.as_str()).unwrap_or_default();
        let collapsed = view.collapsed_groups.contains(&group.id);

        rows.push(ViewRow::Group {
            id: group.id.clone(),
            title: group.title.clone(),
            color: group.color.clone(),
            count: members.len(),
            collapsed,
        });
        if collapsed {
            continue;
        }

        if !header_emitted {
            rows.push(ViewRow::Header {
                group_id: group.id.clone(),
            });
            header_emitted = true;
        }

        let mut visible: Vec<&Item> = members
            .iter()
            .copied()
            .filter(|item| is_visible(item, columns, view))
            .collect();
        if let Some(sort) = &view.sort {
            sort_items(&mut visible, columns, sort);
        }
        rows.extend(visible.into_iter().map(|item| ViewRow::Item {
            id: item.id.clone(),
            group_id: group.id.clone(),
        }));

        rows.push(ViewRow::Footer {
            group_id: group.id.clone(),
            summaries: summarize(columns, &members),
        });
    }
    rows
}

fn effective_groups(groups: &[Group], group_by_column_id: Option<&str>) -> Vec<Group> {
    if group_by_column_id.is_some() {
        return vec![synthetic_group(DYNAMIC_GROUP_ID, DYNAMIC_GROUP_TITLE)];
    }
    if groups.is_empty() {
        return vec![synthetic_group(DEFAULT_GROUP_ID, DEFAULT_GROUP_TITLE)];
    }
    groups.to_vec()
}

fn synthetic_group(id: &str, title: &str) -> Group {
    Group {
        id: id.to_string(),
        board_id: String::new(),
        title: title.to_string(),
        color: default_group_color(),
        position: 0,
    }
}

fn is_visible(item: &Item, columns: &[Column], view: &ViewState) -> bool {
    if item.is_hidden {
        return false;
    }
    let needle = view.search.trim().to_lowercase();
    if !needle.is_empty() && !item.title.to_lowercase().contains(&needle) {
        return false;
    }
    view.filters.iter().all(|(column_id, accepted)| {
        if accepted.is_empty() {
            return true;
        }
        // Filters on deleted columns are ignored rather than hiding everything.
        let Some(column) = columns.iter().find(|c| &c.id == column_id) else {
            return true;
        };
        match item.values.get(column_id) {
            Some(value) => value
                .labels(column)
                .iter()
                .any(|label| accepted.contains(label)),
            None => accepted.iter().any(String::is_empty),
        }
    })
}

fn sort_items(items: &mut [&Item], columns: &[Column], sort: &SortSpec) {
    let column = sort
        .column_id
        .as_deref()
        .and_then(|id| columns.iter().find(|c| c.id == id));

    items.sort_by(|a, b| {
        let ord = match column {
            None => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            Some(column) => compare_cells(a, b, column),
        };
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Empty cells sort after filled ones in ascending order.
fn compare_cells(a: &Item, b: &Item, column: &Column) -> Ordering {
    let (va, vb) = (a.values.get(&column.id), b.values.get(&column.id));
    match (va, vb) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) if column.kind == ColumnType::Number => {
            let (x, y) = (x.as_number(), y.as_number());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => x.sort_key(column).cmp(&y.sort_key(column)),
    }
}

/// Inputs a projection depends on.
#[derive(Debug, Clone, PartialEq)]
struct MemoKey {
    items: Vec<Item>,
    groups: Vec<Group>,
    columns: Vec<Column>,
    group_by_column_id: Option<String>,
    view: ViewState,
}

impl MemoKey {
    fn of(board: &Board) -> Self {
        Self {
            items: board.items.clone(),
            groups: board.groups.clone(),
            columns: board.columns.clone(),
            group_by_column_id: board.group_by_column_id.clone(),
            view: board.view.clone(),
        }
    }

    fn matches(&self, board: &Board) -> bool {
        self.items == board.items
            && self.groups == board.groups
            && self.columns == board.columns
            && self.group_by_column_id == board.group_by_column_id
            && self.view == board.view
    }
}

/// Single-entry cache: identical inputs return the same `Arc`.
#[derive(Debug, Default)]
pub struct ProjectionMemo {
    last: Option<(MemoKey, Arc<[ViewRow]>)>,
}

impl ProjectionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&mut self, board: &Board) -> Arc<[ViewRow]> {
        if let Some((key, rows)) = &self.last {
            if key.matches(board) {
                return Arc::clone(rows);
            }
        }
        let rows: Arc<[ViewRow]> = project_board(board).into();
        self.last = Some((MemoKey::of(board), Arc::clone(&rows)));
        rows
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;

    struct Fixture {
        board: Board,
        status: String,
    }

    fn fixture() -> Fixture {
        let mut board = Board::new("w1", "Sprint", 0);
        let status = Column::new(&board.id, "Status", ColumnType::Status, 0);
        let g1 = Group::new(&board.id, "This week", "#579bfc", 0);
        let g2 = Group::new(&board.id, "Next week", "#a25ddc", 1);

        let labels = ["Done", "Stuck", "Done", "Working on it"];
        for (idx, label) in labels.iter().enumerate() {
            let group = if idx < 3 { &g1 } else { &g2 };
            let mut item = Item::new(&board.id, &group.id, format!("Task {}", idx), idx as i64);
            item.set_value(&status, CellValue::Status(label.to_string()))
                .unwrap();
            board.items.push(item);
        }
        let status_id = status.id.clone();
        board.columns.push(status);
        board.groups = vec![g1, g2];
        Fixture {
            board,
            status: status_id,
        }
    }

    fn kinds(rows: &[ViewRow]) -> Vec<&'static str> {
        rows.iter()
            .map(|r| match r {
                ViewRow::Group { .. } => "group",
                ViewRow::Header { .. } => "header",
                ViewRow::Item { .. } => "item",
                ViewRow::Footer { .. } => "footer",
            })
            .collect()
    }

    #[test]
    fn test_row_layout() {
        let f = fixture();
        let rows = project_board(&f.board);
        assert_eq!(
            kinds(&rows),
            vec![
                "group", "header", "item", "item", "item", "footer", "group", "item", "footer"
            ]
        );
    }

    #[test]
    fn test_projection_is_pure() {
        let f = fixture();
        let before = f.board.clone();
        let first = project_board(&f.board);
        let second = project_board(&f.board);
        assert_eq!(first, second);
        assert_eq!(before, f.board);
    }

    #[test]
    fn test_synthetic_main_table_when_no_groups() {
        let mut f = fixture();
        f.board.groups.clear();
        let rows = project_board(&f.board);
        match &rows[0] {
            ViewRow::Group { id, title, count, .. } => {
                assert_eq!(id, DEFAULT_GROUP_ID);
                assert_eq!(title, DEFAULT_GROUP_TITLE);
                assert_eq!(*count, 4);
            }
            other => panic!("expected group row, got {:?}", other),
        }
    }

    #[test]
    fn test_group_by_uses_single_dynamic_group() {
        let mut f = fixture();
        f.board.group_by_column_id = Some(f.status.clone());
        let rows = project_board(&f.board);
        let groups: Vec<_> = rows
            .iter()
            .filter(|r| matches!(r, ViewRow::Group { .. }))
            .collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(rows.iter().filter_map(ViewRow::item_id).count(), 4);
    }

    #[test]
    fn test_dangling_items_fold_into_first_group() {
        let mut f = fixture();
        let first = f.board.groups[0].id.clone();
        f.board.items[3].group_id = "deleted-group".to_string();
        let rows = project_board(&f.board);
        match &rows[0] {
            ViewRow::Group { id, count, .. } => {
                assert_eq!(id, &first);
                assert_eq!(*count, 4);
            }
            other => panic!("expected group row, got {:?}", other),
        }
    }

    #[test]
    fn test_collapsed_group_keeps_only_group_row() {
        let mut f = fixture();
        let first = f.board.groups[0].id.clone();
        f.board.view.collapsed_groups.insert(first);
        let rows = project_board(&f.board);
        // Header moves to the first expanded group.
        assert_eq!(
            kinds(&rows),
            vec!["group", "group", "header", "item", "footer"]
        );
    }

    #[test]
    fn test_filter_keeps_unfiltered_counts() {
        let mut f = fixture();
        f.board
            .view
            .filters
            .insert(f.status.clone(), vec!["Done".to_string()]);
        let rows = project_board(&f.board);

        let visible: Vec<_> = rows.iter().filter_map(ViewRow::item_id).collect();
        assert_eq!(visible.len(), 2);
        for id in visible {
            let item = f.board.item(id).unwrap();
            assert_eq!(
                item.values.get(&f.status),
                Some(&CellValue::Status("Done".into()))
            );
        }

        let counts: Vec<usize> = rows
            .iter()
            .filter_map(|r| match r {
                ViewRow::Group { count, .. } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![3, 1]);
    }

    #[test]
    fn test_search_and_hidden_items() {
        let mut f = fixture();
        f.board.items[0].is_hidden = true;
        f.board.view.search = "task".to_string();
        let rows = project_board(&f.board);
        assert_eq!(rows.iter().filter_map(ViewRow::item_id).count(), 3);

        f.board.view.search = "TASK 3".to_string();
        let rows = project_board(&f.board);
        assert_eq!(rows.iter().filter_map(ViewRow::item_id).count(), 1);
    }

    #[test]
    fn test_sort_by_title_desc() {
        let mut f = fixture();
        f.board.view.sort = Some(SortSpec {
            column_id: None,
            direction: SortDirection::Desc,
        });
        let rows = project_board(&f.board);
        let titles: Vec<_> = rows
            .iter()
            .filter_map(ViewRow::item_id)
            .map(|id| f.board.item(id).unwrap().title.clone())
            .collect();
        assert_eq!(titles, vec!["Task 2", "Task 1", "Task 0", "Task 3"]);
    }

    #[test]
    fn test_memo_returns_same_arc_until_inputs_change() {
        let mut f = fixture();
        let mut memo = ProjectionMemo::new();
        let a = memo.rows(&f.board);
        let b = memo.rows(&f.board);
        assert!(Arc::ptr_eq(&a, &b));

        f.board.view.search = "1".to_string();
        let c = memo.rows(&f.board);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
