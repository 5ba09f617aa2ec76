// src/session/store.rs

//! Session persistence keyed by (user, ref)
//!
//! Stores do a plain read-modify-write: two requests racing on the same
//! session both succeed and the later save wins. Only `apply` detects a
//! stale client, through the state hash.

use super::SessionState;
use crate::db;
use crate::error::Result;
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Keyed store of session states
pub trait SessionStore: Send + Sync {
    fn load(&self, user_id: &str, ref_id: &str) -> Result<Option<SessionState>>;

    /// Insert or replace the state stored for its (user, ref)
    fn save(&self, state: &SessionState) -> Result<()>;

    /// Drop a stored session; returns whether one existed
    fn clear(&self, user_id: &str, ref_id: &str) -> Result<bool>;
}

/// SQLite-backed store: one JSON row per (user, ref)
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self, user_id: &str, ref_id: &str) -> Result<Option<SessionState>> {
        let conn = db::open(&self.db_path)?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM sessions WHERE user_id = ?1 AND ref_id = ?2",
                params![user_id, ref_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        let conn = db::open(&self.db_path)?;
        let json = serde_json::to_string(state)?;
        conn.execute(
            "INSERT INTO sessions (user_id, ref_id, state_json, hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, ref_id) DO UPDATE SET
                state_json = excluded.state_json,
                hash = excluded.hash,
                updated_at = excluded.updated_at",
            params![&state.user_id, &state.ref_id, json, &state.hash, &state.timestamp],
        )?;
        debug!("Saved session {}/{} ({})", state.user_id, state.ref_id, state.hash);
        Ok(())
    }

    fn clear(&self, user_id: &str, ref_id: &str) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let rows = conn.execute(
            "DELETE FROM sessions WHERE user_id = ?1 AND ref_id = ?2",
            params![user_id, ref_id],
        )?;
        Ok(rows > 0)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<(String, String), SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, ref_id: &str) -> (String, String) {
        (user_id.to_string(), ref_id.to_string())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, user_id: &str, ref_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(&Self::key(user_id, ref_id)).cloned())
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(Self::key(&state.user_id, &state.ref_id), state.clone());
        Ok(())
    }

    fn clear(&self, user_id: &str, ref_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.remove(&Self::key(user_id, ref_id)).is_some())
    }
}
