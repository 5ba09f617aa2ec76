// src/db/schema.rs

//! Database schema definitions and migrations for packsmith
//!
//! This module defines the SQLite schema for sessions, operations and the
//! installed-pack registry, and provides a migration system to evolve the
//! schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        other => Err(crate::Error::InvalidState(format!(
            "Unknown migration version: {}",
            other
        ))),
    }
}

/// Initial schema - Version 1
///
/// - sessions: one pending selection per (user, ref), stored as JSON
/// - operations: durable records of asynchronous apply/install/remove jobs
/// - installed_packs / installed_pack_deps / installed_pages: the registry
///   of what each ref currently has installed
/// - content_pages: titles present in the content store that no pack owns
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE sessions (
            user_id TEXT NOT NULL,
            ref_id TEXT NOT NULL,
            state_json TEXT NOT NULL,
            hash TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, ref_id)
        );

        CREATE TABLE operations (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL CHECK(type IN ('pack_install', 'pack_update', 'pack_remove',
                'pack_apply', 'repo_add', 'repo_sync', 'repo_remove')),
            status TEXT NOT NULL CHECK(status IN ('queued', 'running', 'success', 'failed')),
            progress INTEGER NOT NULL DEFAULT 0 CHECK(progress BETWEEN 0 AND 100),
            message TEXT NOT NULL DEFAULT '',
            result_json TEXT,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX idx_operations_user ON operations(user_id, created_at);
        CREATE INDEX idx_operations_status ON operations(status);

        CREATE TABLE installed_packs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ref_id TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(ref_id, name)
        );

        CREATE TABLE installed_pack_deps (
            pack_id INTEGER NOT NULL,
            depends_on TEXT NOT NULL,
            PRIMARY KEY (pack_id, depends_on),
            FOREIGN KEY (pack_id) REFERENCES installed_packs(id) ON DELETE CASCADE
        );

        CREATE TABLE installed_pages (
            pack_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            final_title TEXT NOT NULL,
            PRIMARY KEY (pack_id, name),
            FOREIGN KEY (pack_id) REFERENCES installed_packs(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_installed_pages_title ON installed_pages(final_title);

        CREATE TABLE content_pages (
            ref_id TEXT NOT NULL,
            title TEXT NOT NULL,
            PRIMARY KEY (ref_id, title)
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_creation() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "sessions",
            "operations",
            "installed_packs",
            "installed_pack_deps",
            "installed_pages",
            "content_pages",
            "schema_version",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        let version1 = get_schema_version(&conn).unwrap();

        migrate(&conn).unwrap();
        let version2 = get_schema_version(&conn).unwrap();

        assert_eq!(version1, version2);
        assert_eq!(version1, SCHEMA_VERSION);
    }

    #[test]
    fn test_operation_status_constraint() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO operations (id, type, status, user_id, created_at, updated_at)
             VALUES ('x', 'pack_apply', 'exploded', 'alice', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_installed_pack_unique_per_ref() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO installed_packs (ref_id, name, version) VALUES ('main', 'base', '1.0')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO installed_packs (ref_id, name, version) VALUES ('main', 'base', '1.1')",
            [],
        );
        assert!(dup.is_err());

        conn.execute(
            "INSERT INTO installed_packs (ref_id, name, version) VALUES ('dev', 'base', '1.1')",
            [],
        )
        .unwrap();
    }
}
