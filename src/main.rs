//! Board Sync
//!
//! Runs the sync core against the local SQLite backend: loads (or provisions) the
//! configured user's boards, follows changes until Ctrl-C, then drains pending writes.

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use board_sync::projection::ViewRow;
use board_sync::repair::repair_people_columns;
use board_sync::{init_database, Config, RemoteStore, SessionStore, SqliteRemote, Store, UserIdentity};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Board Sync");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Session path: {:?}", config.session_path);
    tracing::info!("Signed in as: {} <{}>", config.user_id, config.user_email);

    // Initialize database
    let pool = init_database(&config.db_path).await?;
    let remote: Arc<dyn RemoteStore> = Arc::new(SqliteRemote::new(pool).with_user(UserIdentity {
        id: config.user_id.clone(),
        email: config.user_email.clone(),
        metadata: Value::Null,
    }));

    // One-off data fix before the first load
    let report = repair_people_columns(remote.as_ref()).await?;
    if !report.repaired.is_empty() {
        tracing::info!(
            "Repaired {} of {} column(s)",
            report.repaired.len(),
            report.inspected
        );
    }

    let session = match &config.session_path {
        Some(path) => SessionStore::at(path),
        None => SessionStore::in_memory(),
    };
    let store = Store::new(remote, session, config.sync);

    store.load_user_data(false).await?;
    print_active_board(&store).await;

    store.subscribe_to_realtime().await;
    tracing::info!("Following changes; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    store.unsubscribe_from_realtime().await;
    store.flush().await;
    if let Some(error) = store.write_error().await {
        tracing::warn!("Last write failed: {}", error);
    }
    Ok(())
}

async fn print_active_board(store: &Store) {
    let Some(board) = store.active_board().await else {
        println!("No board selected");
        return;
    };
    let Some(rows) = store.projected_rows().await else {
        return;
    };

    println!("{} ({} items)", board.title, board.items.len());
    for row in rows.iter() {
        match row {
            ViewRow::Group {
                title,
                count,
                collapsed,
                ..
            } => {
                let marker = if *collapsed { "+" } else { "-" };
                println!("{} {} ({})", marker, title, count);
            }
            ViewRow::Item { id, .. } => {
                if let Some(item) = board.item(id) {
                    println!("    {}", item.title);
                }
            }
            ViewRow::Header { .. } | ViewRow::Footer { .. } => {}
        }
    }
}
