//! Startup data repair.
//!
//! Older clients persisted People columns with type `text`. The repair pass finds
//! those columns and rewrites their type. It runs once at startup, separately from the
//! load path, and is a no-op on already-correct data.

use serde_json::json;

use crate::errors::AppError;
use crate::models::{rows_into, Column, ColumnType};
use crate::remote::{collections, to_patch, Filter, Query, RemoteStore};

/// Titles that identify a People column written with the wrong type.
const PEOPLE_COLUMN_TITLES: [&str; 6] = [
    "people",
    "person",
    "owner",
    "assignee",
    "assignees",
    "assigned to",
];

pub fn is_misfiled_people_column(column: &Column) -> bool {
    column.kind == ColumnType::Text
        && PEOPLE_COLUMN_TITLES.contains(&column.title.trim().to_lowercase().as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub inspected: usize,
    pub repaired: Vec<String>,
}

/// Rewrite misfiled People columns on the remote.
///
/// Each repair is its own write; a failure is logged and the remaining columns are
/// still attempted. Only columns whose write succeeded are reported as repaired.
pub async fn repair_people_columns(remote: &dyn RemoteStore) -> Result<RepairReport, AppError> {
    let rows = remote.select(collections::COLUMNS, &Query::all()).await?;
    let columns: Vec<Column> = rows_into(collections::COLUMNS, &rows);

    let mut report = RepairReport {
        inspected: columns.len(),
        repaired: Vec::new(),
    };
    for column in columns.iter().filter(|c| is_misfiled_people_column(c)) {
        let patch = to_patch(json!({ "type": ColumnType::People.as_str() }));
        match remote
            .update(collections::COLUMNS, patch, &Filter::by_id(&column.id))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Repaired column {} ({:?}) on board {}: text -> people",
                    column.id,
                    column.title,
                    column.board_id
                );
                report.repaired.push(column.id.clone());
            }
            Err(e) => tracing::warn!("Could not repair column {}: {}", column.id, e),
        }
    }

    if report.repaired.is_empty() {
        tracing::debug!("Column repair: {} inspected, nothing to do", report.inspected);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database, SqliteRemote};
    use crate::models::to_row;
    use tempfile::TempDir;

    #[test]
    fn test_detection() {
        let mut column = Column::new("b1", "Owner", ColumnType::Text, 0);
        assert!(is_misfiled_people_column(&column));
        column.kind = ColumnType::People;
        assert!(!is_misfiled_people_column(&column));
        let notes = Column::new("b1", "Notes", ColumnType::Text, 1);
        assert!(!is_misfiled_people_column(&notes));
    }

    #[tokio::test]
    async fn test_repair_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("repair.sqlite")).await.unwrap();
        let remote = SqliteRemote::new(pool);

        let broken = Column::new("b1", "People", ColumnType::Text, 0);
        let healthy = Column::new("b1", "Assignee", ColumnType::People, 1);
        remote
            .insert(
                collections::COLUMNS,
                vec![to_row(&broken).unwrap(), to_row(&healthy).unwrap()],
            )
            .await
            .unwrap();

        let first = repair_people_columns(&remote).await.unwrap();
        assert_eq!(first.repaired, vec![broken.id.clone()]);

        let rows = remote
            .select(collections::COLUMNS, &Query::all())
            .await
            .unwrap();
        let columns: Vec<Column> = rows_into(collections::COLUMNS, &rows);
        assert!(columns.iter().all(|c| c.kind == ColumnType::People));

        let second = repair_people_columns(&remote).await.unwrap();
        assert!(second.repaired.is_empty());
        assert_eq!(second.inspected, 2);
    }
}
