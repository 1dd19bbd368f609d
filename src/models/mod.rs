//! Domain models for workspaces, boards and collaboration records.
//!
//! Field names match the remote collections so rows (de)serialize with serde directly,
//! except where a typed aggregate (`Board`, `Item`) is joined from several rows.

mod activity;
mod board;
mod item;
mod member;
mod notification;
mod workspace;

pub use activity::*;
pub use board::*;
pub use item::*;
pub use member::*;
pub use notification::*;
pub use workspace::*;

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::AppError;
use crate::remote::Row;

/// Deserialize a remote row into a model.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, AppError> {
    Ok(serde_json::from_value(serde_json::Value::Object(row.clone()))?)
}

/// Serialize a model into a remote row.
pub fn to_row<T: Serialize>(model: &T) -> Result<Row, AppError> {
    match serde_json::to_value(model)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(AppError::Serialization(format!(
            "Expected an object row, got {}",
            other
        ))),
    }
}

/// Deserialize every row, logging and skipping the ones that do not parse.
pub fn rows_into<T: DeserializeOwned>(collection: &str, rows: &[Row]) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match from_row::<T>(row) {
            Ok(model) => Some(model),
            Err(e) => {
                tracing::warn!("Skipping malformed {} row: {}", collection, e);
                None
            }
        })
        .collect()
}
