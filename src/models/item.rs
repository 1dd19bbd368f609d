//! Item model and the typed per-column cell value.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Column, ColumnType};
use crate::errors::AppError;

/// Value of one cell, discriminated by the owning column's type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Status(String),
    Date(String),
    /// Numeric string, kept verbatim so user formatting survives a round trip
    Number(String),
    Dropdown(Vec<String>),
    People(Vec<String>),
    Checkbox(bool),
    Link(String),
}

impl CellValue {
    pub fn kind(&self) -> ColumnType {
        match self {
            CellValue::Text(_) => ColumnType::Text,
            CellValue::Status(_) => ColumnType::Status,
            CellValue::Date(_) => ColumnType::Date,
            CellValue::Number(_) => ColumnType::Number,
            CellValue::Dropdown(_) => ColumnType::Dropdown,
            CellValue::People(_) => ColumnType::People,
            CellValue::Checkbox(_) => ColumnType::Checkbox,
            CellValue::Link(_) => ColumnType::Link,
        }
    }

    /// Read a raw remote value for a column of type `kind`.
    ///
    /// Tolerates the shapes older clients wrote: bare strings for list columns,
    /// JSON numbers for number columns and `"true"`/`"false"` for checkboxes.
    /// Returns `None` for null or shapes that cannot be coerced.
    pub fn from_json(kind: ColumnType, raw: &Value) -> Option<Self> {
        match kind {
            ColumnType::Text => scalar_string(raw).map(CellValue::Text),
            ColumnType::Status => scalar_string(raw).map(CellValue::Status),
            ColumnType::Date => scalar_string(raw).map(CellValue::Date),
            ColumnType::Link => scalar_string(raw).map(CellValue::Link),
            ColumnType::Number => match raw {
                Value::Number(n) => Some(CellValue::Number(n.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Some(CellValue::Number(s.trim().to_string()))
                }
                _ => None,
            },
            ColumnType::Dropdown => string_list(raw).map(CellValue::Dropdown),
            ColumnType::People => string_list(raw).map(CellValue::People),
            ColumnType::Checkbox => match raw {
                Value::Bool(b) => Some(CellValue::Checkbox(*b)),
                Value::String(s) if s == "true" => Some(CellValue::Checkbox(true)),
                Value::String(s) if s == "false" => Some(CellValue::Checkbox(false)),
                _ => None,
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Text(s)
            | CellValue::Status(s)
            | CellValue::Date(s)
            | CellValue::Number(s)
            | CellValue::Link(s) => Value::String(s.clone()),
            CellValue::Dropdown(list) | CellValue::People(list) => {
                Value::Array(list.iter().cloned().map(Value::String).collect())
            }
            CellValue::Checkbox(b) => Value::Bool(*b),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Text(s)
            | CellValue::Status(s)
            | CellValue::Date(s)
            | CellValue::Number(s)
            | CellValue::Link(s) => s.is_empty(),
            CellValue::Dropdown(list) | CellValue::People(list) => list.is_empty(),
            CellValue::Checkbox(b) => !b,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Labels this value matches against in filters, resolved through `column` options.
    pub fn labels(&self, column: &Column) -> Vec<String> {
        match self {
            CellValue::Status(s) => vec![column.option_label(s).to_string()],
            CellValue::Dropdown(list) => list
                .iter()
                .map(|s| column.option_label(s).to_string())
                .collect(),
            CellValue::People(list) => list.clone(),
            CellValue::Checkbox(b) => vec![b.to_string()],
            CellValue::Text(s) | CellValue::Date(s) | CellValue::Number(s) | CellValue::Link(s) => {
                vec![s.clone()]
            }
        }
    }

    /// Key used when sorting by this value.
    pub fn sort_key(&self, column: &Column) -> String {
        match self {
            CellValue::Number(s) => s.clone(),
            CellValue::Checkbox(b) => (*b as u8).to_string(),
            other => other.labels(column).join(", ").to_lowercase(),
        }
    }
}

fn scalar_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Value::String(s) if s.is_empty() => Some(Vec::new()),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// A comment posted on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
}

impl ItemUpdate {
    pub fn new(author_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author_id.into(),
            body: body.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// The persisted shape of an item; `values` stays untyped until joined with columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub board_id: String,
    pub group_id: String,
    pub title: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub updates: Vec<ItemUpdate>,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub created_at: String,
}

/// A single row/task within a board.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub board_id: String,
    pub group_id: String,
    pub title: String,
    pub position: i64,
    pub values: BTreeMap<String, CellValue>,
    /// Stored values this client cannot read: unknown columns or shapes the column
    /// type rejects. Written back untouched with every value update.
    pub raw_values: Map<String, Value>,
    pub updates: Vec<ItemUpdate>,
    pub is_hidden: bool,
    pub created_at: String,
}

impl Item {
    pub const COLLECTION: &'static str = "items";

    pub fn new(
        board_id: impl Into<String>,
        group_id: impl Into<String>,
        title: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            group_id: group_id.into(),
            title: title.into(),
            position,
            values: BTreeMap::new(),
            raw_values: Map::new(),
            updates: Vec::new(),
            is_hidden: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Join a raw row with the board's columns. Values for unknown columns or with
    /// shapes the column type cannot read go to `raw_values`.
    pub fn from_row(row: ItemRow, columns: &[Column]) -> Self {
        let mut values = BTreeMap::new();
        let mut raw_values = Map::new();
        for (column_id, raw) in row.values {
            let typed = columns
                .iter()
                .find(|c| c.id == column_id)
                .and_then(|column| CellValue::from_json(column.kind, &raw));
            match typed {
                Some(value) => {
                    values.insert(column_id, value);
                }
                None => {
                    raw_values.insert(column_id, raw);
                }
            }
        }

        Self {
            id: row.id,
            board_id: row.board_id,
            group_id: row.group_id,
            title: row.title,
            position: row.position,
            values,
            raw_values,
            updates: row.updates,
            is_hidden: row.is_hidden,
            created_at: row.created_at,
        }
    }

    pub fn to_row(&self) -> ItemRow {
        ItemRow {
            id: self.id.clone(),
            board_id: self.board_id.clone(),
            group_id: self.group_id.clone(),
            title: self.title.clone(),
            position: self.position,
            values: self.values_json(),
            updates: self.updates.clone(),
            is_hidden: self.is_hidden,
            created_at: self.created_at.clone(),
        }
    }

    /// The complete value map as sent to the remote.
    pub fn values_json(&self) -> Map<String, Value> {
        let mut map = self.raw_values.clone();
        for (k, v) in &self.values {
            map.insert(k.clone(), v.to_json());
        }
        map
    }

    /// Drop the value stored under `column_id`, readable or not. Returns whether
    /// anything was removed.
    pub fn remove_value(&mut self, column_id: &str) -> bool {
        let typed = self.values.remove(column_id).is_some();
        let raw = self.raw_values.remove(column_id).is_some();
        typed || raw
    }

    /// Type-check `value` against `column` and merge it into the value map.
    pub fn set_value(&mut self, column: &Column, value: CellValue) -> Result<(), AppError> {
        if value.kind() != column.kind {
            return Err(AppError::Validation(format!(
                "Column {} expects a {} value, got {}",
                column.title,
                column.kind.as_str(),
                value.kind().as_str()
            )));
        }
        self.raw_values.remove(&column.id);
        self.values.insert(column.id.clone(), value);
        Ok(())
    }
}
