// src/error.rs

//! Error types for packsmith
//!
//! Engine errors fall into two groups: the kinds a caller is expected to act
//! on (bad arguments, missing sessions, stale hashes, dependency and version
//! violations), and infrastructure failures bubbling up from SQLite, JSON or
//! the filesystem. Title conflicts are never errors; they travel as warnings.

use crate::sync::OutOfSync;
use crate::validation::{DependencyViolation, VersionChange};
use serde_json::{Value, json};
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed, missing, or unknown reference in command data
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A command was issued against a state that cannot accept it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Client hash does not match the authoritative session
    #[error("Session state out of sync (server hash {}, {} reconcile commands)", .0.hash, .0.reconcile.len())]
    StateOutOfSync(Box<OutOfSync>),

    /// Blocking dependents or unmet dependencies
    #[error("Dependency error: {0}")]
    Dependency(DependencyViolation),

    /// Major version change rejected
    #[error("Version compatibility error: {}", describe_version_changes(.0))]
    VersionCompatibility(Vec<VersionChange>),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job queue closed: {0}")]
    QueueClosed(String),
}

impl Error {
    /// Stable snake_case identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidState(_) => "invalid_state",
            Error::StateOutOfSync(_) => "state_out_of_sync",
            Error::Dependency(_) => "dependency_error",
            Error::VersionCompatibility(_) => "version_compatibility_error",
            Error::Database(_) => "database_error",
            Error::Json(_) => "json_error",
            Error::Io(_) => "io_error",
            Error::ManifestParse(_) => "manifest_parse_error",
            Error::Config(_) => "config_error",
            Error::QueueClosed(_) => "queue_closed",
        }
    }

    /// Structured payload a client can act on without reloading
    pub fn details(&self) -> Value {
        match self {
            Error::StateOutOfSync(out_of_sync) => {
                serde_json::to_value(out_of_sync.as_ref()).unwrap_or(Value::Null)
            }
            Error::Dependency(violation) => {
                serde_json::to_value(violation).unwrap_or(Value::Null)
            }
            Error::VersionCompatibility(changes) => json!({ "changes": changes }),
            other => json!({ "message": other.to_string() }),
        }
    }

    /// Whether this error means "nothing was wrong with the infrastructure"
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::InvalidState(_)
                | Error::StateOutOfSync(_)
                | Error::Dependency(_)
                | Error::VersionCompatibility(_)
        )
    }
}

fn describe_version_changes(changes: &[VersionChange]) -> String {
    changes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
