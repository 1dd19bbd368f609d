//! Integration tests for the board store against the SQLite backend.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::SyncSettings;
use crate::db::{init_database, SqliteRemote};
use crate::errors::AppError;
use crate::models::{
    to_row, Board, CellValue, ColumnType, Item, NotificationKind, Profile, Role,
};
use crate::permissions::{query_role, Action};
use crate::projection::ViewRow;
use crate::remote::{
    collections, to_patch, ChannelMessage, ChannelStatus, Filter, Query, RemoteStore, Row,
    Subscription, SubscriptionHandle, UserIdentity,
};
use crate::session::SessionStore;
use crate::store::{Store, WriteOp, WriteStatus};

/// Handle of the hand-driven feed opened by `FaultyRemote`.
const MANUAL_FEED: SubscriptionHandle = SubscriptionHandle(u64::MAX);

fn settings() -> SyncSettings {
    SyncSettings {
        fallback_poll_interval: Duration::from_millis(50),
        backstop_poll_interval: Duration::from_secs(60),
        subscribe_timeout: Duration::from_millis(200),
    }
}

fn user(id: &str, email: &str, name: &str) -> UserIdentity {
    UserIdentity {
        id: id.to_string(),
        email: email.to_string(),
        metadata: json!({ "full_name": name }),
    }
}

fn owner() -> UserIdentity {
    user("u1", "ada@example.com", "Ada")
}

async fn open_remote(dir: &TempDir) -> SqliteRemote {
    let pool = init_database(&dir.path().join("test.sqlite"))
        .await
        .expect("Failed to init DB");
    SqliteRemote::new(pool).with_user(owner())
}

async fn count(remote: &dyn RemoteStore, collection: &str) -> usize {
    remote
        .select(collection, &Query::all())
        .await
        .expect("select failed")
        .len()
}

async fn active_board(store: &Store) -> Board {
    store.active_board().await.expect("no active board")
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}

/// SQLite backend with switchable failures and a hand-driven change feed.
struct FaultyRemote {
    inner: SqliteRemote,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    withhold_ack: AtomicBool,
    fail_reads: AtomicBool,
    hold_reads: AtomicBool,
    feed: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
    /// Writes block while a test holds this for writing
    write_gate: RwLock<()>,
    /// Reads started while `hold_reads` is set block on this
    read_gate: RwLock<()>,
}

impl FaultyRemote {
    fn new(inner: SqliteRemote) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            withhold_ack: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            hold_reads: AtomicBool::new(false),
            feed: Mutex::new(None),
            write_gate: RwLock::new(()),
            read_gate: RwLock::new(()),
        }
    }

    fn set_fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    fn set_fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    async fn push(&self, message: ChannelMessage) {
        if let Some(tx) = self.feed.lock().await.as_ref() {
            tx.send(message).ok();
        }
    }

    async fn guard_write(&self) -> Result<(), AppError> {
        let _open = self.write_gate.read().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Remote("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn current_user(&self) -> Result<UserIdentity, AppError> {
        self.inner.current_user().await
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, AppError> {
        if self.hold_reads.load(Ordering::SeqCst) {
            let _open = self.read_gate.read().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Remote("injected read failure".to_string()));
        }
        self.inner.select(collection, query).await
    }

    async fn insert(&self, collection: &str, rows: Vec<Row>) -> Result<(), AppError> {
        self.guard_write().await?;
        self.inner.insert(collection, rows).await
    }

    async fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<(), AppError> {
        self.guard_write().await?;
        self.inner.update(collection, patch, filter).await
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), AppError> {
        self.guard_write().await?;
        self.inner.delete(collection, filter).await
    }

    async fn call(&self, procedure: &str, args: Value) -> Result<Value, AppError> {
        self.guard_write().await?;
        self.inner.call(procedure, args).await
    }

    async fn subscribe_changes(
        &self,
        scope: &str,
        tables: &[&str],
    ) -> Result<Subscription, AppError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(AppError::Remote("injected subscribe failure".to_string()));
        }
        if self.withhold_ack.load(Ordering::SeqCst) {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.feed.lock().await = Some(tx);
            return Ok(Subscription {
                handle: MANUAL_FEED,
                messages: rx,
            });
        }
        self.inner.subscribe_changes(scope, tables).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AppError> {
        if handle == MANUAL_FEED {
            self.feed.lock().await.take();
            return Ok(());
        }
        self.inner.unsubscribe(handle).await
    }
}

/// Test fixture: a store signed in as `owner()` over a fresh database.
struct TestFixture<R> {
    remote: Arc<R>,
    store: Arc<Store>,
    temp_dir: TempDir,
}

impl TestFixture<SqliteRemote> {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let remote = Arc::new(open_remote(&temp_dir).await);
        let store = Store::new(remote.clone(), SessionStore::in_memory(), settings());
        Self {
            remote,
            store,
            temp_dir,
        }
    }

    /// Another client on the same database.
    fn client(&self, identity: UserIdentity) -> Arc<Store> {
        let remote = Arc::new(self.remote.reconnect_as(identity));
        Store::new(remote, SessionStore::in_memory(), settings())
    }
}

impl TestFixture<FaultyRemote> {
    async fn faulty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let remote = Arc::new(FaultyRemote::new(open_remote(&temp_dir).await));
        let store = Store::new(remote.clone(), SessionStore::in_memory(), settings());
        Self {
            remote,
            store,
            temp_dir,
        }
    }
}

impl<R: RemoteStore + 'static> TestFixture<R> {
    /// First load followed by a flush, so the starter board exists remotely.
    async fn loaded(self) -> Self {
        self.store.load_user_data(false).await.unwrap();
        self.store.flush().await;
        self
    }
}

// ----- first run -----

#[tokio::test]
async fn test_first_load_provisions_starter_board() {
    let fixture = TestFixture::new().await;
    let store = &fixture.store;

    store.load_user_data(false).await.unwrap();
    {
        let state = store.state().await;
        assert!(!state.is_loading);
        assert_eq!(state.error, None);
        assert_eq!(state.workspaces.len(), 1);
        assert_eq!(state.workspaces[0].title, "Ada's Workspace");
        assert_eq!(state.boards.len(), 1);
        assert_eq!(
            state.active_board_id.as_deref(),
            Some(state.boards[0].id.as_str())
        );

        let board = &state.boards[0];
        assert_eq!(board.groups.len(), 2);
        assert_eq!(board.columns.len(), 8);
        assert_eq!(board.items.len(), 2);
    }
    assert!(store.can(Action::DeleteBoard).await);

    store.flush().await;
    assert_eq!(store.write_error().await, None);
    let remote = &*fixture.remote;
    assert_eq!(count(remote, collections::WORKSPACES).await, 1);
    assert_eq!(count(remote, collections::BOARDS).await, 1);
    assert_eq!(count(remote, collections::GROUPS).await, 2);
    assert_eq!(count(remote, collections::COLUMNS).await, 8);
    assert_eq!(count(remote, collections::ITEMS).await, 2);
    assert_eq!(count(remote, collections::PROFILES).await, 1);

    // A second full load finds the workspace and does not provision again
    store.load_user_data(false).await.unwrap();
    assert_eq!(store.state().await.workspaces.len(), 1);
    assert_eq!(count(remote, collections::WORKSPACES).await, 1);
    assert_eq!(store.sync_counts().full_reloads, 2);
}

#[tokio::test]
async fn test_selection_restored_from_session_file() {
    let fixture = TestFixture::new().await;
    let session_path = fixture.temp_dir.path().join("session.json");

    let first = Store::new(
        fixture.remote.clone(),
        SessionStore::at(&session_path),
        settings(),
    );
    first.load_user_data(false).await.unwrap();
    let roadmap = first.add_board("Roadmap").await.unwrap();
    first.set_active_board(&roadmap).await.unwrap();
    first.flush().await;

    let second = Store::new(
        fixture.remote.clone(),
        SessionStore::at(&session_path),
        settings(),
    );
    second.load_user_data(false).await.unwrap();
    assert_eq!(active_board(&second).await.id, roadmap);
    assert_eq!(active_board(&second).await.title, "Roadmap");
}

// ----- optimistic writes -----

#[tokio::test]
async fn test_add_item_starts_at_default_status() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let status = board.first_column_of(ColumnType::Status).unwrap().clone();

    let id = store
        .add_item(&board.groups[0].id, "  Write docs ")
        .await
        .unwrap();
    let board = active_board(store).await;
    let item = board.item(&id).unwrap();
    assert_eq!(item.title, "Write docs");
    assert_eq!(
        item.values.get(&status.id),
        Some(&CellValue::Status("To Do".into()))
    );

    assert!(matches!(
        store.add_item(&board.groups[0].id, "   ").await,
        Err(AppError::Validation(_))
    ));

    store.flush().await;
    assert_eq!(count(&*fixture.remote, collections::ITEMS).await, 3);
}

#[tokio::test]
async fn test_value_edit_keeps_unreadable_cells_on_remote() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let item = board.items[0].clone();
    let checkbox = board.first_column_of(ColumnType::Checkbox).unwrap().id.clone();
    let text = board.first_column_of(ColumnType::Text).unwrap().id.clone();

    let mut stored = item.values_json();
    stored.insert(checkbox.clone(), json!(1));
    fixture
        .remote
        .update(
            collections::ITEMS,
            to_patch(json!({ "values": stored })),
            &Filter::by_id(item.id.as_str()),
        )
        .await
        .unwrap();
    store.load_user_data(true).await.unwrap();

    store
        .update_item_value(&item.id, &text, CellValue::Text("note".into()))
        .await
        .unwrap();
    store.flush().await;

    let rows = fixture
        .remote
        .select(
            collections::ITEMS,
            &Query::filtered(Filter::by_id(item.id.as_str())),
        )
        .await
        .unwrap();
    let values = &rows[0]["values"];
    assert_eq!(values[checkbox.as_str()], json!(1));
    assert_eq!(values[text.as_str()], json!("note"));
}

#[tokio::test]
async fn test_drop_item_on_group_moves_it_to_the_top() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let target = board.groups[1].id.clone();
    let moving = board.group_items(&board.groups[0].id)[0].id.clone();

    store.move_item(&moving, &target).await.unwrap();
    let board = active_board(store).await;
    assert_eq!(board.group_items(&target)[0].id, moving);
    assert_eq!(board.group_items(&target).len(), 2);

    store.flush().await;
    let rows = fixture
        .remote
        .select(collections::ITEMS, &Query::filtered(Filter::by_id(&moving)))
        .await
        .unwrap();
    assert_eq!(rows[0]["group_id"], json!(target));

    store.load_user_data(true).await.unwrap();
    let board = active_board(store).await;
    assert_eq!(board.group_items(&target)[0].id, moving);
}

#[tokio::test]
async fn test_filter_hides_items_but_keeps_group_counts() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let status = board.first_column_of(ColumnType::Status).unwrap().id.clone();
    let done = board.items[0].id.clone();

    store
        .update_item_value(&done, &status, CellValue::Status("Done".into()))
        .await
        .unwrap();
    store
        .set_column_filter(&status, vec!["Done".to_string()])
        .await
        .unwrap();

    let rows = store.projected_rows().await.unwrap();
    let counts: Vec<usize> = rows
        .iter()
        .filter_map(|row| match row {
            ViewRow::Group { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 1]);
    let shown: Vec<&str> = rows.iter().filter_map(ViewRow::item_id).collect();
    assert_eq!(shown, vec![done.as_str()]);

    let again = store.projected_rows().await.unwrap();
    assert!(Arc::ptr_eq(&rows, &again));

    store.clear_filters().await.unwrap();
    let rows = store.projected_rows().await.unwrap();
    assert_eq!(rows.iter().filter_map(ViewRow::item_id).count(), 2);
}

#[tokio::test]
async fn test_failed_write_keeps_local_change_and_reports() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    let item = active_board(store).await.items[0].clone();

    fixture.remote.set_fail_writes(true);
    store.rename_item(&item.id, "Renamed").await.unwrap();
    store.flush().await;

    let error = store.write_error().await.expect("write error expected");
    assert!(error.contains("injected write failure"));
    assert_eq!(
        active_board(store).await.item(&item.id).unwrap().title,
        "Renamed"
    );
    assert!(store
        .outbox()
        .entries()
        .await
        .iter()
        .any(|e| matches!(e.status, WriteStatus::Failed(_))));

    // The next reload reflects what the remote actually holds
    fixture.remote.set_fail_writes(false);
    store.load_user_data(true).await.unwrap();
    assert_eq!(
        active_board(store).await.item(&item.id).unwrap().title,
        item.title
    );

    store.clear_write_error().await;
    assert_eq!(store.write_error().await, None);
}

#[tokio::test]
async fn test_silent_reload_keeps_pending_writes_and_view() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let group = board.groups[0].id.clone();

    store.set_search("docs").await.unwrap();
    assert!(store.toggle_group_collapsed(&group).await.unwrap());

    let gate = fixture.remote.write_gate.write().await;
    let id = store.add_item(&group, "Write docs").await.unwrap();
    store.load_user_data(true).await.unwrap();

    let reloaded = active_board(store).await;
    assert_eq!(reloaded.id, board.id);
    assert!(reloaded.item(&id).is_some());
    assert_eq!(reloaded.view.search, "docs");
    assert!(reloaded.view.collapsed_groups.contains(&group));
    assert_eq!(store.outbox().pending_count().await, 1);

    drop(gate);
    store.flush().await;
    store.load_user_data(true).await.unwrap();
    assert!(active_board(store).await.item(&id).is_some());
    assert_eq!(count(&*fixture.remote, collections::ITEMS).await, 3);
    assert_eq!(store.sync_counts().silent_reloads, 2);
}

#[tokio::test]
async fn test_stale_silent_reload_does_not_revert_confirmed_edit() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    let item = active_board(store).await.items[0].clone();

    // This reload reads the remote before the rename lands and finishes last
    let gate = fixture.remote.read_gate.write().await;
    fixture.remote.hold_reads.store(true, Ordering::SeqCst);
    let slow = tokio::spawn({
        let store = Arc::clone(store);
        async move { store.load_user_data(true).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    fixture.remote.hold_reads.store(false, Ordering::SeqCst);

    store.rename_item(&item.id, "Renamed").await.unwrap();
    store.flush().await;
    store.load_user_data(true).await.unwrap();
    assert_eq!(
        active_board(store).await.item(&item.id).unwrap().title,
        "Renamed"
    );

    drop(gate);
    slow.await.unwrap().unwrap();
    assert_eq!(
        active_board(store).await.item(&item.id).unwrap().title,
        "Renamed"
    );
    assert_eq!(store.outbox().pending_count().await, 0);
}

#[tokio::test]
async fn test_failed_load_sets_error_and_clears_loading() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;

    fixture.remote.set_fail_reads(true);
    let result = store.load_user_data(false).await;
    assert!(matches!(result, Err(AppError::Remote(_))));
    {
        let state = store.state().await;
        assert!(!state.is_loading);
        let error = state.error.as_deref().expect("load error expected");
        assert!(error.contains("injected read failure"));
        // The last good data stays on screen
        assert_eq!(state.boards.len(), 1);
    }

    fixture.remote.set_fail_reads(false);
    store.load_user_data(false).await.unwrap();
    assert_eq!(store.state().await.error, None);
}

// ----- realtime -----

#[tokio::test]
async fn test_change_from_another_client_triggers_one_silent_reload() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;

    store.subscribe_to_realtime().await;
    assert!(store.is_subscribed().await);
    assert!(!store.is_fallback_polling().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = store.sync_counts().silent_reloads;

    let other = fixture
        .remote
        .reconnect_as(user("u2", "grace@example.com", "Grace"));
    let item = Item::new(&board.id, &board.groups[1].id, "From elsewhere", 99);
    other
        .insert(collections::ITEMS, vec![to_row(&item.to_row()).unwrap()])
        .await
        .unwrap();

    let s = store;
    let new_id = item.id.as_str();
    assert!(eventually(|| async move { active_board(s).await.item(new_id).is_some() }).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.sync_counts().silent_reloads, before + 1);
    assert!(!store.is_loading().await);

    store.unsubscribe_from_realtime().await;
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;

    store.unsubscribe_from_realtime().await;
    store.subscribe_to_realtime().await;
    assert_eq!(fixture.remote.subscriber_count().await, 1);

    store.unsubscribe_from_realtime().await;
    store.unsubscribe_from_realtime().await;
    assert!(!store.is_subscribed().await);
    assert!(!store.is_fallback_polling().await);
    assert_eq!(fixture.remote.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_subscribe_failure_falls_back_to_polling() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    fixture.remote.fail_subscribe.store(true, Ordering::SeqCst);

    store.subscribe_to_realtime().await;
    assert!(!store.is_subscribed().await);
    assert!(store.is_fallback_polling().await);

    let s = store;
    assert!(eventually(|| async move { s.sync_counts().silent_reloads >= 2 }).await);

    store.unsubscribe_from_realtime().await;
    assert!(!store.is_fallback_polling().await);
}

#[tokio::test]
async fn test_fallback_polling_follows_channel_status() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    fixture.remote.withhold_ack.store(true, Ordering::SeqCst);

    store.subscribe_to_realtime().await;
    assert!(store.is_subscribed().await);

    let s = store;
    // No acknowledgement within the subscribe timeout
    assert!(eventually(|| async move { s.is_fallback_polling().await }).await);

    fixture
        .remote
        .push(ChannelMessage::Status(ChannelStatus::Subscribed))
        .await;
    assert!(eventually(|| async move { !s.is_fallback_polling().await }).await);

    fixture
        .remote
        .push(ChannelMessage::Status(ChannelStatus::ChannelError(
            "socket reset".to_string(),
        )))
        .await;
    assert!(eventually(|| async move { s.is_fallback_polling().await }).await);

    store.unsubscribe_from_realtime().await;
    assert!(!store.is_fallback_polling().await);
}

// ----- collaboration -----

#[tokio::test]
async fn test_invite_and_assign_user() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let people = board.first_column_of(ColumnType::People).unwrap().id.clone();
    let item = board.items[0].id.clone();

    store
        .invite_and_assign_user(&board.id, "u2", Role::Member, &item, &people)
        .await
        .unwrap();
    store.flush().await;

    let board = active_board(store).await;
    assert_eq!(
        board.item(&item).unwrap().values.get(&people),
        Some(&CellValue::People(vec!["u1".into(), "u2".into()]))
    );
    assert_eq!(store.board_member_count(&board.id).await, 1);

    let notifications = fixture
        .remote
        .select(
            collections::NOTIFICATIONS,
            &Query::filtered(Filter::new().eq("user_id", "u2")),
        )
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"], json!("assignment"));
}

#[tokio::test]
async fn test_invite_and_assign_stops_when_membership_fails() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;
    let people = board.first_column_of(ColumnType::People).unwrap().id.clone();
    let item = board.items[0].id.clone();

    fixture.remote.set_fail_writes(true);
    let result = store
        .invite_and_assign_user(&board.id, "u2", Role::Member, &item, &people)
        .await;
    assert!(matches!(result, Err(AppError::Remote(_))));

    let board = active_board(store).await;
    assert_eq!(
        board.item(&item).unwrap().values.get(&people),
        Some(&CellValue::People(vec!["u1".into()]))
    );
    let queued_notification = store.outbox().entries().await.into_iter().any(|e| {
        matches!(&e.op, WriteOp::Insert { collection, .. } if collection == collections::NOTIFICATIONS)
    });
    assert!(!queued_notification);
}

#[tokio::test]
async fn test_invite_unknown_email_writes_nothing() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    let board = active_board(store).await;

    let result = store
        .invite_to_board_by_email(&board.id, "nobody@example.com", Role::Member)
        .await;
    match result {
        Err(AppError::Validation(message)) => assert!(message.contains("nobody@example.com")),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(matches!(
        store
            .invite_to_board_by_email(&board.id, "not-an-email", Role::Member)
            .await,
        Err(AppError::Validation(_))
    ));

    store.flush().await;
    let remote = &*fixture.remote;
    assert_eq!(count(remote, collections::BOARD_MEMBERS).await, 0);
    assert_eq!(count(remote, collections::NOTIFICATIONS).await, 0);
}

#[tokio::test]
async fn test_board_invite_accepted_by_invitee() {
    let fixture = TestFixture::new().await.loaded().await;
    let owner_store = &fixture.store;
    let shared = active_board(owner_store).await;

    let grace = fixture.client(user("u2", "grace@example.com", "Grace"));
    grace.load_user_data(false).await.unwrap();
    grace.flush().await;
    let own_board = active_board(&grace).await.id;
    assert_ne!(own_board, shared.id);

    let membership = owner_store
        .invite_to_board_by_email(&shared.id, " Grace@Example.com ", Role::Member)
        .await
        .unwrap();
    assert_eq!(membership.user_id, "u2");
    owner_store.flush().await;
    assert!(matches!(
        owner_store
            .invite_to_board_by_email(&shared.id, "grace@example.com", Role::Admin)
            .await,
        Err(AppError::Validation(_))
    ));

    let notifications = grace.fetch_notifications().await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::BoardInvite);
    assert_eq!(grace.unread_notification_count().await, 1);

    grace.accept_notification(&notifications[0].id).await.unwrap();
    {
        let state = grace.state().await;
        assert_eq!(state.active_board_id.as_deref(), Some(shared.id.as_str()));
        assert_eq!(
            state.active_workspace_id.as_deref(),
            Some(shared.workspace_id.as_str())
        );
        assert_eq!(state.workspaces.len(), 2);
    }
    assert_eq!(grace.unread_notification_count().await, 0);
    assert!(grace.can(Action::EditItems).await);
    assert!(!grace.can(Action::DeleteBoard).await);
}

#[tokio::test]
async fn test_workspace_member_role_resolved_remotely() {
    let fixture = TestFixture::new().await.loaded().await;
    let owner_store = &fixture.store;
    let workspace = owner_store.active_workspace().await.unwrap();

    let profile = Profile {
        id: "u3".to_string(),
        email: "linus@example.com".to_string(),
        full_name: Some("Linus".to_string()),
        avatar_url: None,
    };
    fixture
        .remote
        .insert(collections::PROFILES, vec![to_row(&profile).unwrap()])
        .await
        .unwrap();
    owner_store
        .invite_to_workspace_by_email(&workspace.id, "linus@example.com", Role::Admin)
        .await
        .unwrap();
    owner_store.flush().await;

    let linus = fixture.client(user("u3", "linus@example.com", "Linus"));
    linus.load_user_data(false).await.unwrap();
    assert_eq!(
        linus.active_workspace().await.map(|w| w.id),
        Some(workspace.id.clone())
    );
    assert_eq!(linus.state().await.permissions.role, Some(Role::Admin));
    assert!(linus.can(Action::InviteMembers).await);
    assert_eq!(
        count(&*fixture.remote, collections::WORKSPACES).await,
        1
    );
}

#[tokio::test]
async fn test_role_query_fails_closed_on_read_error() {
    let fixture = TestFixture::faulty().await.loaded().await;
    let store = &fixture.store;
    let workspace = store.active_workspace().await.unwrap();
    let board = active_board(store).await;

    let profile = Profile {
        id: "u3".to_string(),
        email: "linus@example.com".to_string(),
        full_name: Some("Linus".to_string()),
        avatar_url: None,
    };
    fixture
        .remote
        .insert(collections::PROFILES, vec![to_row(&profile).unwrap()])
        .await
        .unwrap();
    store
        .invite_to_workspace_by_email(&workspace.id, "linus@example.com", Role::Admin)
        .await
        .unwrap();
    store.flush().await;

    let remote = &*fixture.remote;
    let (board_id, workspace_id) = (Some(board.id.as_str()), Some(workspace.id.as_str()));
    let role = query_role(remote, "u3", board_id, workspace_id).await;
    assert_eq!(role, Role::Admin);

    fixture.remote.set_fail_reads(true);
    let role = query_role(remote, "u3", board_id, workspace_id).await;
    assert_eq!(role, Role::Viewer);
    let role = query_role(remote, "u3", None, workspace_id).await;
    assert_eq!(role, Role::Viewer);
}

#[tokio::test]
async fn test_delete_account_resets_store() {
    let fixture = TestFixture::new().await.loaded().await;
    let store = &fixture.store;
    store.subscribe_to_realtime().await;

    store.delete_account().await.unwrap();
    assert!(!store.is_subscribed().await);
    let state = store.state().await;
    assert!(state.user.is_none());
    assert!(state.boards.is_empty());
    drop(state);

    let remote = &*fixture.remote;
    assert_eq!(count(remote, collections::WORKSPACES).await, 0);
    assert_eq!(count(remote, collections::ITEMS).await, 0);
    assert_eq!(count(remote, collections::PROFILES).await, 0);
}
