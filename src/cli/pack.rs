// src/cli/pack.rs
//! Direct pack commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum PackCommands {
    /// Install packs with default page titles
    Install {
        /// Pack names
        #[arg(required = true)]
        packs: Vec<String>,
    },

    /// Update installed packs to the manifest version
    Update {
        /// Pack names
        #[arg(required = true)]
        packs: Vec<String>,
    },

    /// Remove installed packs
    Remove {
        /// Pack names
        #[arg(required = true)]
        packs: Vec<String>,
    },
}
