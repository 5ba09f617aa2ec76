// src/cli/mod.rs
//! CLI definitions for packsmith
//!
//! Command-line front end over `PackService`. Every command prints its
//! result as JSON on stdout.
//!
//! Contexts:
//! - `session` - Edit and apply the selection for a (user, ref)
//! - `pack` - Install, update or remove packs directly
//! - `op` - Inspect operations
//! - `db` - Database maintenance

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod op;
mod pack;
mod session;

pub use op::OpCommands;
pub use pack::PackCommands;
pub use session::SessionCommands;

#[derive(Parser)]
#[command(name = "packsmith")]
#[command(author = "Packsmith Contributors")]
#[command(version)]
#[command(about = "Session-based installer for versioned content packs", long_about = None)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Directory holding `<ref>.toml` manifests (overrides the config)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub manifest_dir: Option<PathBuf>,

    /// User the command acts for
    #[arg(short, long, global = true, default_value = "admin")]
    pub user: String,

    /// Manifest ref the command acts on
    #[arg(short = 'r', long = "ref", global = true, default_value = "main")]
    pub ref_id: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Edit and apply a pack selection session
    #[command(subcommand)]
    Session(SessionCommands),

    /// Install, update or remove packs without a session
    #[command(subcommand)]
    Pack(PackCommands),

    /// Inspect background operations
    #[command(subcommand)]
    Op(OpCommands),

    /// Database maintenance
    #[command(subcommand)]
    Db(DbCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Create the database and its schema
    Init,
}
