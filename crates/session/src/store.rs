//! Saved sessions.
//!
//! Sessions are cached in memory and persisted to a JSON file keyed by
//! session id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SessionError;

/// A paired receiver that transfers can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    pub session_id: String,
    pub name: String,
    pub host: String,
    /// Transfer port.
    pub port: u16,
    pub token: String,
    pub paired_at: DateTime<Utc>,
}

/// Persistent store of [`SavedSession`]s.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, SavedSession>>,
}

impl SessionStore {
    /// Opens the store, loading existing sessions from disk.
    pub fn new(path: PathBuf) -> Result<Self, SessionError> {
        let sessions = load_sessions(&path)?;
        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, session_id: &str) -> Option<SavedSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Inserts or replaces a session and writes the store to disk.
    pub fn save(&self, session: SavedSession) -> Result<(), SessionError> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id.clone(), session);
        self.persist()
    }

    /// Removes a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// All sessions, most recently paired first.
    pub fn list(&self) -> Vec<SavedSession> {
        let mut sessions: Vec<SavedSession> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.paired_at.cmp(&a.paired_at));
        sessions
    }

    fn persist(&self) -> Result<(), SessionError> {
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} session(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

fn load_sessions(path: &Path) -> Result<HashMap<String, SavedSession>, SessionError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let sessions: HashMap<String, SavedSession> = serde_json::from_str(&data)?;
    debug!("loaded {} session(s) from {:?}", sessions.len(), path);
    Ok(sessions)
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
