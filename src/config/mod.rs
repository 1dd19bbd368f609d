//! Configuration module for the board sync core.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database backing the local remote store
    pub db_path: PathBuf,
    /// Path of the JSON file holding the last active board/workspace
    pub session_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Identity the local remote store signs in as
    pub user_id: String,
    pub user_email: String,
    /// Realtime and polling cadence
    pub sync: SyncSettings,
}

/// Timing knobs for the synchronization subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Polling period used while the realtime channel is down
    pub fallback_poll_interval: Duration,
    /// Always-on consistency poll
    pub backstop_poll_interval: Duration,
    /// How long to wait for the channel to report `Subscribed`
    pub subscribe_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fallback_poll_interval: Duration::from_secs(5),
            backstop_poll_interval: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("BOARD_SYNC_DB_PATH")
            .unwrap_or_else(|_| "./data/boards.sqlite".to_string())
            .into();

        let session_path = match env::var("BOARD_SYNC_SESSION_PATH") {
            Ok(path) if path.is_empty() => None,
            Ok(path) => Some(path.into()),
            Err(_) => Some("./data/session.json".into()),
        };

        let log_level = env::var("BOARD_SYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let user_id = env::var("BOARD_SYNC_USER_ID").unwrap_or_else(|_| "local-user".to_string());
        let user_email =
            env::var("BOARD_SYNC_USER_EMAIL").unwrap_or_else(|_| "local@example.com".to_string());

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            fallback_poll_interval: millis_var(
                "BOARD_SYNC_FALLBACK_POLL_MS",
                defaults.fallback_poll_interval,
            ),
            backstop_poll_interval: millis_var(
                "BOARD_SYNC_BACKSTOP_POLL_MS",
                defaults.backstop_poll_interval,
            ),
            subscribe_timeout: millis_var(
                "BOARD_SYNC_SUBSCRIBE_TIMEOUT_MS",
                defaults.subscribe_timeout,
            ),
        };

        Self {
            db_path,
            session_path,
            log_level,
            user_id,
            user_email,
            sync,
        }
    }
}

fn millis_var(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                tracing::warn!("Ignoring invalid {}={:?}, using {:?}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
