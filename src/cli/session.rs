// src/cli/session.rs
//! Session commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Start a session from what is installed
    Init,

    /// Print the stored session
    Show,

    /// Select a pack for install or update
    Select {
        /// Pack name
        pack: String,
    },

    /// Drop a pack from the selection
    Deselect {
        /// Pack name
        pack: String,

        /// Also deselect packs that depend on it
        #[arg(long)]
        cascade: bool,
    },

    /// Set an explicit action on a pack
    Action {
        /// Pack name
        pack: String,

        /// One of: unchanged, install, update, remove
        action: String,
    },

    /// Give a page a custom title
    Rename {
        /// Pack name
        pack: String,

        /// Page name within the pack
        page: String,

        /// New title
        title: String,
    },

    /// Set the title prefix for a pack's pages
    Prefix {
        /// Pack name
        pack: String,

        /// Prefix, may be empty
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Rebuild the session from the registry and manifest
    Refresh,

    /// Discard the session
    Clear,

    /// Queue the selection as an operation
    Apply {
        /// State hash the selection was made against (defaults to the stored one)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Send a raw `{"command": ..., "data": ...}` request
    Raw {
        /// Request JSON
        request: String,
    },
}
