//! Client-local persistence of the last active workspace and board.
//!
//! Kept apart from the remote store so a reload resumes where the user left off even
//! before the first snapshot arrives.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub active_workspace_id: Option<String>,
    pub active_board_id: Option<String>,
}

/// Selection storage: a JSON file, or memory only when no path is configured.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    current: Mutex<Selection>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Mutex::new(Selection::default()),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            current: Mutex::new(Selection::default()),
        }
    }

    /// Read the persisted selection. A missing or unreadable file yields an empty one.
    pub async fn load(&self) -> Selection {
        let Some(path) = &self.path else {
            return self.current.lock().await.clone();
        };
        let selection = match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt session file {:?}: {}", path, e);
                Selection::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Selection::default(),
            Err(e) => {
                tracing::warn!("Could not read session file {:?}: {}", path, e);
                Selection::default()
            }
        };
        *self.current.lock().await = selection.clone();
        selection
    }

    pub async fn save(&self, selection: &Selection) -> Result<(), AppError> {
        *self.current.lock().await = selection.clone();
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(path, serde_json::to_vec_pretty(selection)?).await?;
        }
        Ok(())
    }
}
