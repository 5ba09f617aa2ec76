// src/lib.rs

//! Packsmith
//!
//! Session-based installer for versioned content packs. A user opens a
//! session against a manifest ref, selects packs to install, update or
//! remove, and applies the result as one background operation.
//!
//! # Architecture
//!
//! - Sessions: per (user, ref) working copies of the pack selection, stored in SQLite
//! - Dependencies: selecting a pack auto-selects what it needs; deselecting checks dependents
//! - State hash: a short digest the client echoes back so stale applies are caught
//! - Operations: applies are queued as jobs and tracked to completion

pub mod command;
pub mod config;
pub mod db;
mod error;
pub mod manifest;
pub mod operation;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod session;
pub mod sync;
pub mod validation;
pub mod version;

pub use command::{Command, CommandOutcome, CommandRequest, RefreshPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestSource, PackDefinition};
pub use operation::{Operation, OperationStatus, OperationType};
pub use service::{CommandResponse, PackService};
pub use session::{PackAction, PackState, PageState, SessionState};
