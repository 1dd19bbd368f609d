//! Board aggregate: columns, groups and the flat item list.
//!
//! The board keeps items as one flat list keyed by `group_id`. Group membership is
//! always derived from that list, so there is no nested copy to keep in sync.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::Item;

/// Column value type. Unknown types read from the remote degrade to `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Status,
    Date,
    Number,
    Dropdown,
    Checkbox,
    Link,
    People,
    #[serde(other)]
    Text,
}

impl ColumnType {
    pub const ALL: [ColumnType; 8] = [
        ColumnType::Text,
        ColumnType::Status,
        ColumnType::Date,
        ColumnType::Number,
        ColumnType::Dropdown,
        ColumnType::Checkbox,
        ColumnType::Link,
        ColumnType::People,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Status => "status",
            ColumnType::Date => "date",
            ColumnType::Number => "number",
            ColumnType::Dropdown => "dropdown",
            ColumnType::Checkbox => "checkbox",
            ColumnType::Link => "link",
            ColumnType::People => "people",
        }
    }

    /// Whether the column carries a fixed option set.
    pub fn has_options(&self) -> bool {
        matches!(self, ColumnType::Status | ColumnType::Dropdown)
    }

    pub fn default_width(&self) -> u32 {
        match self {
            ColumnType::Checkbox => 90,
            ColumnType::Status | ColumnType::People | ColumnType::Date => 140,
            ColumnType::Text | ColumnType::Link => 180,
            ColumnType::Number | ColumnType::Dropdown => 150,
        }
    }
}

/// A selectable option of a status or dropdown column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOption {
    pub id: String,
    pub label: String,
    pub color: String,
}

impl ColumnOption {
    pub fn new(label: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            color: color.into(),
        }
    }
}

/// Footer summary requested for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// A typed attribute definition applied across all items of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub board_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub options: Vec<ColumnOption>,
    #[serde(default = "default_column_width")]
    pub width: u32,
    #[serde(default)]
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
}

fn default_column_width() -> u32 {
    150
}

impl Column {
    pub const COLLECTION: &'static str = "columns";

    pub fn new(
        board_id: impl Into<String>,
        title: impl Into<String>,
        kind: ColumnType,
        position: i64,
    ) -> Self {
        let options = match kind {
            ColumnType::Status => default_status_options(),
            _ => Vec::new(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            title: title.into(),
            kind,
            options,
            width: kind.default_width(),
            position,
            aggregation: None,
        }
    }

    /// Resolve a stored value to an option, matching by id first and label second.
    pub fn find_option(&self, raw: &str) -> Option<&ColumnOption> {
        self.options
            .iter()
            .find(|o| o.id == raw)
            .or_else(|| self.options.iter().find(|o| o.label == raw))
    }

    /// Display label for a stored option value; unknown values pass through.
    pub fn option_label<'a>(&'a self, raw: &'a str) -> &'a str {
        self.find_option(raw).map(|o| o.label.as_str()).unwrap_or(raw)
    }

    /// Initial value for a freshly created item.
    pub fn default_status(&self) -> Option<&ColumnOption> {
        if self.kind != ColumnType::Status {
            return None;
        }
        self.options
            .iter()
            .find(|o| o.label == "To Do")
            .or_else(|| self.options.last())
    }
}

/// The status options every new status column starts with.
pub fn default_status_options() -> Vec<ColumnOption> {
    vec![
        ColumnOption::new("Done", "#00c875"),
        ColumnOption::new("Working on it", "#fdab3d"),
        ColumnOption::new("Stuck", "#e2445c"),
        ColumnOption::new("To Do", "#c4c4c4"),
    ]
}

/// A named, ordered partition of a board's items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub board_id: String,
    pub title: String,
    #[serde(default = "default_group_color")]
    pub color: String,
    #[serde(default)]
    pub position: i64,
}

pub fn default_group_color() -> String {
    "#579bfc".to_string()
}

impl Group {
    pub const COLLECTION: &'static str = "groups";

    pub fn new(
        board_id: impl Into<String>,
        title: impl Into<String>,
        color: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            title: title.into(),
            color: color.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key. `column_id = None` sorts by item title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column_id: Option<String>,
    pub direction: SortDirection,
}

/// Client-local view settings. Never written to the remote; carried across reloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub collapsed_groups: BTreeSet<String>,
    pub sort: Option<SortSpec>,
    /// Column id -> accepted labels
    pub filters: BTreeMap<String, Vec<String>>,
    pub search: String,
}

/// The persisted part of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardRow {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default = "default_item_column_width")]
    pub item_column_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_column_id: Option<String>,
}

fn default_item_column_width() -> u32 {
    320
}

/// A single spreadsheet-like project view.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub position: i64,
    pub item_column_width: u32,
    pub group_by_column_id: Option<String>,
    pub columns: Vec<Column>,
    pub groups: Vec<Group>,
    pub items: Vec<Item>,
    pub view: ViewState,
}

impl Board {
    pub const COLLECTION: &'static str = "boards";

    pub fn new(workspace_id: impl Into<String>, title: impl Into<String>, position: i64) -> Self {
        Self::from_row(BoardRow {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            position,
            item_column_width: default_item_column_width(),
            group_by_column_id: None,
        })
    }

    pub fn from_row(row: BoardRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            title: row.title,
            position: row.position,
            item_column_width: row.item_column_width,
            group_by_column_id: row.group_by_column_id,
            columns: Vec::new(),
            groups: Vec::new(),
            items: Vec::new(),
            view: ViewState::default(),
        }
    }

    pub fn to_row(&self) -> BoardRow {
        BoardRow {
            id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            title: self.title.clone(),
            position: self.position,
            item_column_width: self.item_column_width,
            group_by_column_id: self.group_by_column_id.clone(),
        }
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn first_column_of(&self, kind: ColumnType) -> Option<&Column> {
        self.columns.iter().find(|c| c.kind == kind)
    }

    /// Group an item effectively renders in; dangling references fold into the first group.
    pub fn effective_group_id<'a>(&'a self, item: &'a Item) -> Option<&'a str> {
        if self.group(&item.group_id).is_some() {
            Some(item.group_id.as_str())
        } else {
            self.groups.first().map(|g| g.id.as_str())
        }
    }

    /// Items of one group in board order, derived from the flat list.
    pub fn group_items(&self, group_id: &str) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|i| self.effective_group_id(i) == Some(group_id))
            .collect()
    }

    /// Rewrite `position` to the current list order for columns, groups and items.
    pub fn reindex(&mut self) {
        for (idx, column) in self.columns.iter_mut().enumerate() {
            column.position = idx as i64;
        }
        for (idx, group) in self.groups.iter_mut().enumerate() {
            group.position = idx as i64;
        }
        for (idx, item) in self.items.iter_mut().enumerate() {
            item.position = idx as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_type_degrades_to_text() {
        let column: Column = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "board_id": "b1",
            "title": "Legacy",
            "type": "formula"
        }))
        .unwrap();
        assert_eq!(column.kind, ColumnType::Text);
        assert_eq!(column.width, 150);
    }

    #[test]
    fn test_option_lookup_falls_back_to_label() {
        let column = Column::new("b1", "Status", ColumnType::Status, 0);
        let done_id = column.options[0].id.clone();
        assert_eq!(column.option_label(&done_id), "Done");
        assert_eq!(column.option_label("Stuck"), "Stuck");
        assert_eq!(column.option_label("Unknown"), "Unknown");
    }

    #[test]
    fn test_default_status_prefers_to_do() {
        let mut column = Column::new("b1", "Status", ColumnType::Status, 0);
        assert_eq!(column.default_status().unwrap().label, "To Do");

        column.options.retain(|o| o.label != "To Do");
        assert_eq!(column.default_status().unwrap().label, "Stuck");
    }

    #[test]
    fn test_dangling_group_folds_into_first() {
        let mut board = Board::new("w1", "Board", 0);
        let g1 = Group::new(&board.id, "One", "#fff", 0);
        let g2 = Group::new(&board.id, "Two", "#000", 1);
        let first_id = g1.id.clone();
        board.groups = vec![g1, g2];
        board.items.push(Item::new(&board.id, "ghost-group", "Orphan", 0));

        assert_eq!(board.group_items(&first_id).len(), 1);
    }
}
