//! `RemoteStore` implementation over the SQLite document table.
//!
//! Filters and ordering are evaluated in memory after loading a collection, writes run
//! in a transaction, and every committed write is broadcast to change-feed subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row as _, SqliteConnection, SqlitePool};
use tokio::sync::{mpsc, Mutex};

use crate::errors::AppError;
use crate::remote::{
    apply_patch, apply_reorder, collections, procedures, reorder_ids, row_id, ChangeEvent,
    ChangeKind, ChannelMessage, ChannelStatus, Filter, Query, RemoteStore, Row, Subscription,
    SubscriptionHandle, UserIdentity,
};

struct Subscriber {
    scope: String,
    tables: Vec<String>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

/// SQLite-backed remote collection store.
pub struct SqliteRemote {
    pool: SqlitePool,
    user: Option<UserIdentity>,
    /// Shared by every client on the same database
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    next_handle: Arc<AtomicU64>,
}

impl SqliteRemote {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            user: None,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach the session identity returned by `current_user`.
    pub fn with_user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }

    /// A second client on the same database, signed in as another user.
    /// Writes of either client reach the change feeds of both.
    pub fn reconnect_as(&self, user: UserIdentity) -> Self {
        Self {
            pool: self.pool.clone(),
            user: Some(user),
            subscribers: Arc::clone(&self.subscribers),
            next_handle: Arc::clone(&self.next_handle),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of open change-feed subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    async fn delete_cascading(
        &self,
        conn: &mut SqliteConnection,
        collection: &str,
        filter: &Filter,
        removed: &mut Vec<(String, Row)>,
    ) -> Result<(), AppError> {
        let mut pending = vec![(collection.to_string(), filter.clone())];

        while let Some((collection, filter)) = pending.pop() {
            let doomed: Vec<Row> = load_rows(conn, &collection)
                .await?
                .into_iter()
                .filter(|row| filter.matches(row))
                .collect();
            if doomed.is_empty() {
                continue;
            }

            let ids: Vec<String> = doomed
                .iter()
                .filter_map(row_id)
                .map(str::to_string)
                .collect();
            for id in &ids {
                sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                    .bind(&collection)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }

            for (child, fk) in cascade_children(&collection) {
                pending.push((
                    child.to_string(),
                    Filter::new().is_in(*fk, ids.iter().cloned()),
                ));
            }
            removed.extend(doomed.into_iter().map(|row| (collection.clone(), row)));
        }
        Ok(())
    }

    /// Deliver change events to interested subscribers, dropping closed channels.
    async fn publish(&self, table: &str, kind: ChangeKind, rows: &[Row]) {
        if rows.is_empty() {
            return;
        }
        let board_scopes = match self.select(collections::BOARDS, &Query::all()).await {
            Ok(boards) => boards
                .iter()
                .filter_map(|b| Some((row_id(b)?.to_string(), str_field(b, "workspace_id")?)))
                .collect::<HashMap<_, _>>(),
            Err(e) => {
                tracing::warn!("Could not resolve change scopes: {}", e);
                HashMap::new()
            }
        };

        let mut subscribers = self.subscribers.lock().await;
        for row in rows {
            let event = ChangeEvent {
                table: table.to_string(),
                kind,
                row_id: row_id(row).map(str::to_string),
                scope: change_scope(table, row, &board_scopes),
            };
            subscribers.retain(|_, sub| {
                let wanted = sub.tables.iter().any(|t| t == table)
                    && event.scope.as_deref().map_or(true, |s| s == sub.scope);
                !wanted || sub.tx.send(ChannelMessage::Change(event.clone())).is_ok()
            });
        }
    }

    async fn delete_user(&self, user_id: &str) -> Result<Value, AppError> {
        let mut removed = Vec::new();
        let mut tx = self.pool.begin().await?;
        self.delete_cascading(
            &mut tx,
            collections::WORKSPACES,
            &Filter::new().eq("owner_id", user_id),
            &mut removed,
        )
        .await?;
        for collection in [
            collections::WORKSPACE_MEMBERS,
            collections::BOARD_MEMBERS,
            collections::NOTIFICATIONS,
        ] {
            self.delete_cascading(
                &mut tx,
                collection,
                &Filter::new().eq("user_id", user_id),
                &mut removed,
            )
            .await?;
        }
        self.delete_cascading(
            &mut tx,
            collections::PROFILES,
            &Filter::by_id(user_id),
            &mut removed,
        )
        .await?;
        tx.commit().await?;

        let count = removed.len();
        self.publish_removed(removed).await;
        Ok(serde_json::json!({ "deleted": count }))
    }

    async fn publish_removed(&self, removed: Vec<(String, Row)>) {
        let mut by_table: HashMap<String, Vec<Row>> = HashMap::new();
        for (table, row) in removed {
            by_table.entry(table).or_default().push(row);
        }
        for (table, rows) in by_table {
            self.publish(&table, ChangeKind::Delete, &rows).await;
        }
    }
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn current_user(&self) -> Result<UserIdentity, AppError> {
        self.user
            .clone()
            .ok_or_else(|| AppError::Forbidden("No active session".to_string()))
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = load_rows(&mut conn, collection).await?;
        Ok(query.apply(rows))
    }

    async fn insert(&self, collection: &str, rows: Vec<Row>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for row in &rows {
            let id = row_id(row).ok_or_else(|| {
                AppError::Validation(format!("{} row is missing an id", collection))
            })?;
            sqlx::query("INSERT INTO records (collection, id, body) VALUES (?, ?, ?)")
                .bind(collection)
                .bind(id)
                .bind(serde_json::to_string(row)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.publish(collection, ChangeKind::Insert, &rows).await;
        Ok(())
    }

    async fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let mut rows = load_rows(&mut tx, collection).await?;
        let touched = apply_patch(&mut rows, &patch, filter);
        let changed: Vec<Row> = rows
            .into_iter()
            .filter(|row| row_id(row).is_some_and(|id| touched.iter().any(|t| t == id)))
            .collect();
        for row in &changed {
            store_row(&mut tx, collection, row).await?;
        }
        tx.commit().await?;

        self.publish(collection, ChangeKind::Update, &changed).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), AppError> {
        let mut removed = Vec::new();
        let mut tx = self.pool.begin().await?;
        self.delete_cascading(&mut tx, collection, filter, &mut removed)
            .await?;
        tx.commit().await?;

        self.publish_removed(removed).await;
        Ok(())
    }

    async fn call(&self, procedure: &str, args: Value) -> Result<Value, AppError> {
        if let Some(collection) = procedures::reorder_target(procedure) {
            let ids = reorder_ids(&args)?;
            let mut tx = self.pool.begin().await?;
            let mut rows = load_rows(&mut tx, collection).await?;
            let touched = apply_reorder(&mut rows, &ids);
            let changed: Vec<Row> = rows
                .into_iter()
                .filter(|row| row_id(row).is_some_and(|id| touched.iter().any(|t| t == id)))
                .collect();
            for row in &changed {
                store_row(&mut tx, collection, row).await?;
            }
            tx.commit().await?;

            self.publish(collection, ChangeKind::Update, &changed).await;
            return Ok(serde_json::json!({ "updated": changed.len() }));
        }

        match procedure {
            procedures::LOG_ACTIVITY => {
                let mut row = match args {
                    Value::Object(map) => map,
                    _ => {
                        return Err(AppError::Validation(
                            "log_activity expects an object".to_string(),
                        ))
                    }
                };
                row.insert(
                    "id".to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
                row.insert(
                    "created_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                self.insert(collections::ACTIVITY_LOGS, vec![row]).await?;
                Ok(Value::Null)
            }
            procedures::DELETE_USER => {
                let user_id = args
                    .get("user_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AppError::Validation("delete_user requires user_id".to_string())
                    })?
                    .to_string();
                self.delete_user(&user_id).await
            }
            other => Err(AppError::NotFound(format!("Unknown procedure {}", other))),
        }
    }

    async fn subscribe_changes(
        &self,
        scope: &str,
        tables: &[&str],
    ) -> Result<Subscription, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        tx.send(ChannelMessage::Status(ChannelStatus::Subscribed))
            .map_err(|_| AppError::Internal("Subscription channel closed".to_string()))?;

        self.subscribers.lock().await.insert(
            handle,
            Subscriber {
                scope: scope.to_string(),
                tables: tables.iter().map(|t| t.to_string()).collect(),
                tx,
            },
        );
        tracing::debug!("Opened change feed {} for scope {}", handle, scope);

        Ok(Subscription {
            handle: SubscriptionHandle(handle),
            messages: rx,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AppError> {
        if let Some(sub) = self.subscribers.lock().await.remove(&handle.0) {
            sub.tx
                .send(ChannelMessage::Status(ChannelStatus::Closed))
                .ok();
        }
        Ok(())
    }
}

// Helper functions for row storage

async fn load_rows(conn: &mut SqliteConnection, collection: &str) -> Result<Vec<Row>, AppError> {
    let records = sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY seq")
        .bind(collection)
        .fetch_all(&mut *conn)
        .await?;

    records
        .iter()
        .map(|record| {
            let body: String = record.get("body");
            Ok(serde_json::from_str::<Row>(&body)?)
        })
        .collect()
}

async fn store_row(
    conn: &mut SqliteConnection,
    collection: &str,
    row: &Row,
) -> Result<(), AppError> {
    let id = row_id(row).unwrap_or_default();
    sqlx::query("UPDATE records SET body = ? WHERE collection = ? AND id = ?")
        .bind(serde_json::to_string(row)?)
        .bind(collection)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn str_field(row: &Row, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Child collections removed together with their parent, with the foreign key field.
fn cascade_children(collection: &str) -> &'static [(&'static str, &'static str)] {
    match collection {
        collections::WORKSPACES => &[
            (collections::BOARDS, "workspace_id"),
            (collections::WORKSPACE_MEMBERS, "workspace_id"),
        ],
        collections::BOARDS => &[
            (collections::GROUPS, "board_id"),
            (collections::COLUMNS, "board_id"),
            (collections::ITEMS, "board_id"),
            (collections::BOARD_MEMBERS, "board_id"),
        ],
        _ => &[],
    }
}

/// Workspace a changed row belongs to.
fn change_scope(table: &str, row: &Row, board_scopes: &HashMap<String, String>) -> Option<String> {
    match table {
        collections::WORKSPACES => row_id(row).map(str::to_string),
        collections::BOARDS | collections::WORKSPACE_MEMBERS => str_field(row, "workspace_id"),
        collections::GROUPS | collections::COLUMNS | collections::ITEMS | collections::BOARD_MEMBERS => {
            str_field(row, "board_id").and_then(|b| board_scopes.get(&b).cloned())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use serde_json::json;
    use tempfile::TempDir;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn remote(dir: &TempDir) -> SqliteRemote {
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        SqliteRemote::new(pool).with_user(UserIdentity {
            id: "u1".into(),
            email: "u1@example.com".into(),
            metadata: Value::Null,
        })
    }

    #[tokio::test]
    async fn test_insert_select_update() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir).await;

        remote
            .insert(
                "groups",
                vec![
                    row(json!({ "id": "g1", "board_id": "b1", "title": "A", "position": 1 })),
                    row(json!({ "id": "g2", "board_id": "b1", "title": "B", "position": 0 })),
                ],
            )
            .await
            .unwrap();

        remote
            .update("groups", row(json!({ "title": "Renamed" })), &Filter::by_id("g1"))
            .await
            .unwrap();

        let rows = remote
            .select(
                "groups",
                &Query::filtered(Filter::new().eq("board_id", "b1")).order_by("position", true),
            )
            .await
            .unwrap();
        assert_eq!(row_id(&rows[0]), Some("g2"));
        assert_eq!(rows[1]["title"], json!("Renamed"));
    }

    #[tokio::test]
    async fn test_board_delete_cascades() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir).await;

        remote
            .insert("boards", vec![row(json!({ "id": "b1", "workspace_id": "w1", "title": "B" }))])
            .await
            .unwrap();
        remote
            .insert(
                "items",
                vec![row(json!({ "id": "i1", "board_id": "b1", "group_id": "g1", "title": "x" }))],
            )
            .await
            .unwrap();

        remote.delete("boards", &Filter::by_id("b1")).await.unwrap();
        assert!(remote.select("items", &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reorder_procedure() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir).await;
        remote
            .insert(
                "columns",
                vec![
                    row(json!({ "id": "c1", "board_id": "b1", "title": "A", "type": "text", "position": 0 })),
                    row(json!({ "id": "c2", "board_id": "b1", "title": "B", "type": "text", "position": 1 })),
                ],
            )
            .await
            .unwrap();

        remote
            .call("reorder_columns", json!({ "ids": ["c2", "c1"] }))
            .await
            .unwrap();

        let rows = remote
            .select("columns", &Query::all().order_by("position", true))
            .await
            .unwrap();
        assert_eq!(row_id(&rows[0]), Some("c2"));
    }

    #[tokio::test]
    async fn test_change_feed_is_scoped() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir).await;
        remote
            .insert("boards", vec![row(json!({ "id": "b1", "workspace_id": "w1", "title": "B" }))])
            .await
            .unwrap();

        let mut mine = remote.subscribe_changes("w1", &["items"]).await.unwrap();
        let mut other = remote.subscribe_changes("w2", &["items"]).await.unwrap();
        assert_eq!(
            mine.messages.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );
        other.messages.recv().await;

        remote
            .insert(
                "items",
                vec![row(json!({ "id": "i1", "board_id": "b1", "group_id": "g1", "title": "x" }))],
            )
            .await
            .unwrap();

        match mine.messages.recv().await {
            Some(ChannelMessage::Change(event)) => {
                assert_eq!(event.table, "items");
                assert_eq!(event.kind, ChangeKind::Insert);
                assert_eq!(event.scope.as_deref(), Some("w1"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(other.messages.try_recv().is_err());

        remote.unsubscribe(mine.handle).await.unwrap();
        remote.unsubscribe(mine.handle).await.unwrap();
        assert_eq!(remote.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_user_removes_owned_data() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir).await;
        remote
            .insert("workspaces", vec![row(json!({ "id": "w1", "title": "W", "owner_id": "u1" }))])
            .await
            .unwrap();
        remote
            .insert("boards", vec![row(json!({ "id": "b1", "workspace_id": "w1", "title": "B" }))])
            .await
            .unwrap();

        remote
            .call("delete_user", json!({ "user_id": "u1" }))
            .await
            .unwrap();
        assert!(remote.select("boards", &Query::all()).await.unwrap().is_empty());
    }
}
