// src/db/mod.rs

//! SQLite persistence
//!
//! Connections are opened on demand from a path (one per request), the same
//! way every store in this crate works: nothing holds a long-lived
//! connection, so stores are `Send + Sync` without locking.

pub mod schema;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Create (if needed) and migrate the database at `db_path`
pub fn init<P: AsRef<Path>>(db_path: P) -> Result<()> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    info!("Initializing database at {}", db_path.display());
    let conn = Connection::open(db_path)?;
    schema::migrate(&conn)?;
    Ok(())
}

/// Open a connection with foreign keys enforced
pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

/// Run `f` inside a transaction, committing on success
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}
