//! Board Sync
//!
//! Client-side state, optimistic writes and realtime synchronization for collaborative
//! project boards. A [`Store`] mirrors the signed-in user's workspaces and boards from any
//! [`RemoteStore`]; [`SqliteRemote`] is the bundled backend.

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod permissions;
pub mod projection;
pub mod remote;
pub mod repair;
pub mod session;
pub mod store;

pub use config::{Config, SyncSettings};
pub use db::{init_database, SqliteRemote};
pub use errors::AppError;
pub use remote::{RemoteStore, UserIdentity};
pub use session::SessionStore;
pub use store::{Store, StoreState};

#[cfg(test)]
mod tests;
