//! Filters, ordering and row-level write semantics shared by every backend.
//!
//! Backends that cannot push these down evaluate them in memory with the helpers here,
//! and the outbox uses the same helpers to replay pending writes onto fresh snapshots.

use std::cmp::Ordering;

use serde_json::Value;

use super::Row;
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Condition {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Eq(field, expected) => row.get(field) == Some(expected),
            Condition::In(field, options) => row
                .get(field)
                .map(|v| options.contains(v))
                .unwrap_or(false),
        }
    }
}

/// Conjunction of conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq("id", id.into())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

/// A collection read: filter plus optional ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order: Option<Order>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            order: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Evaluate the query against an in-memory row set.
    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut rows: Vec<Row> = rows
            .into_iter()
            .filter(|row| self.filter.matches(row))
            .collect();
        if let Some(order) = &self.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        rows
    }
}

/// Total order over optional JSON scalars: missing < null < bool < number < string.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Build a patch row from a JSON object literal. Non-objects yield an empty patch.
pub fn to_patch(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Shallow-merge `patch` into every matching row. Returns the ids touched.
pub fn apply_patch(rows: &mut [Row], patch: &Row, filter: &Filter) -> Vec<String> {
    let mut touched = Vec::new();
    for row in rows.iter_mut().filter(|row| filter.matches(row)) {
        for (key, value) in patch {
            row.insert(key.clone(), value.clone());
        }
        if let Some(id) = row_id(row) {
            touched.push(id.to_string());
        }
    }
    touched
}

/// Parse the `{ "ids": [...] }` argument of a reorder procedure.
pub fn reorder_ids(args: &Value) -> Result<Vec<String>, AppError> {
    let ids = args
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("Reorder call requires an `ids` array".to_string()))?;
    ids.iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or_else(|| {
                AppError::Validation("Reorder ids must be strings".to_string())
            })
        })
        .collect()
}

/// Set `position` of each listed row to its index in `ids`. Unlisted rows keep theirs.
pub fn apply_reorder(rows: &mut [Row], ids: &[String]) -> Vec<String> {
    let mut touched = Vec::new();
    for row in rows.iter_mut() {
        let Some(id) = row_id(row).map(str::to_string) else {
            continue;
        };
        if let Some(idx) = ids.iter().position(|candidate| *candidate == id) {
            row.insert("position".to_string(), Value::from(idx as i64));
            touched.push(id);
        }
    }
    touched
}
