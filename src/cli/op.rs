// src/cli/op.rs
//! Operation inspection commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum OpCommands {
    /// Show one operation
    Show {
        /// Operation ID
        operation_id: String,
    },

    /// List recent operations for the user
    List {
        /// Maximum number to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
}
