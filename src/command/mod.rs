// src/command/mod.rs

//! Session commands
//!
//! Every command a client can send is a variant of [`Command`], parsed from
//! the `{"command": ..., "data": {...}}` request shape and routed through
//! the single `match` in [`dispatch`]. Handlers take the loaded session by
//! value and either return the new state or fail, so a failed command never
//! touches what is stored.

mod apply;
mod handlers;

pub use apply::{ApplyReceipt, build_operations, direct_operations};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::operation::OperationPipeline;
use crate::registry::InstalledRegistry;
use crate::resolver::TitleOracle;
use crate::session::{PackAction, PackState, SessionState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// How `refresh` treats the current selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Rebuild the baseline and re-apply selections that still make sense
    #[default]
    Revalidate,
    /// Rebuild the baseline and drop every selection, like `init`
    Rebuild,
}

impl RefreshPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshPolicy::Revalidate => "revalidate",
            RefreshPolicy::Rebuild => "rebuild",
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "revalidate" => Ok(RefreshPolicy::Revalidate),
            "rebuild" => Ok(RefreshPolicy::Rebuild),
            _ => Err(Error::InvalidArgument(format!("Invalid refresh policy: {s}"))),
        }
    }
}

/// Raw request as it arrives from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, data: Value) -> Self {
        Self {
            command: command.into(),
            data,
        }
    }
}

/// A parsed session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    SelectPack {
        pack_name: String,
    },
    DeselectPack {
        pack_name: String,
        cascade: bool,
    },
    SetPackAction {
        pack_name: String,
        action: PackAction,
    },
    RenamePage {
        pack_name: String,
        page_name: String,
        title: String,
    },
    SetPackPrefix {
        pack_name: String,
        prefix: String,
    },
    Refresh,
    Clear,
    Apply {
        state_hash: String,
        /// The client's view of the packs, used to build a precise diff
        client_packs: Option<BTreeMap<String, PackState>>,
    },
}

#[derive(Deserialize)]
struct PackArgs {
    pack_name: String,
}

#[derive(Deserialize)]
struct DeselectArgs {
    pack_name: String,
    #[serde(default)]
    cascade: bool,
}

#[derive(Deserialize)]
struct ActionArgs {
    pack_name: String,
    action: PackAction,
}

#[derive(Deserialize)]
struct RenameArgs {
    pack_name: String,
    page_name: String,
    title: String,
}

#[derive(Deserialize)]
struct PrefixArgs {
    pack_name: String,
    prefix: String,
}

#[derive(Deserialize)]
struct ApplyArgs {
    state_hash: String,
    #[serde(default)]
    packs: Option<BTreeMap<String, PackState>>,
}

fn args<T: DeserializeOwned>(command: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::InvalidArgument(format!("Invalid data for {}: {}", command, e)))
}

impl Command {
    /// Parse a request into a command
    pub fn parse(request: CommandRequest) -> Result<Self> {
        let CommandRequest { command, data } = request;
        let parsed = match command.as_str() {
            "init" => Command::Init,
            "refresh" => Command::Refresh,
            "clear" => Command::Clear,
            "select_pack" => {
                let a: PackArgs = args(&command, data)?;
                Command::SelectPack { pack_name: a.pack_name }
            }
            "deselect_pack" => {
                let a: DeselectArgs = args(&command, data)?;
                Command::DeselectPack {
                    pack_name: a.pack_name,
                    cascade: a.cascade,
                }
            }
            "set_pack_action" => {
                let a: ActionArgs = args(&command, data)?;
                Command::SetPackAction {
                    pack_name: a.pack_name,
                    action: a.action,
                }
            }
            "rename_page" => {
                let a: RenameArgs = args(&command, data)?;
                Command::RenamePage {
                    pack_name: a.pack_name,
                    page_name: a.page_name,
                    title: a.title,
                }
            }
            "set_pack_prefix" => {
                let a: PrefixArgs = args(&command, data)?;
                Command::SetPackPrefix {
                    pack_name: a.pack_name,
                    prefix: a.prefix,
                }
            }
            "apply" => {
                let a: ApplyArgs = args(&command, data)?;
                Command::Apply {
                    state_hash: a.state_hash,
                    client_packs: a.packs,
                }
            }
            other => return Err(Error::InvalidArgument(format!("Unknown command: {}", other))),
        };
        Ok(parsed)
    }

    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::SelectPack { .. } => "select_pack",
            Command::DeselectPack { .. } => "deselect_pack",
            Command::SetPackAction { .. } => "set_pack_action",
            Command::RenamePage { .. } => "rename_page",
            Command::SetPackPrefix { .. } => "set_pack_prefix",
            Command::Refresh => "refresh",
            Command::Clear => "clear",
            Command::Apply { .. } => "apply",
        }
    }

    /// Whether the command works without a stored session
    pub fn needs_session(&self) -> bool {
        !matches!(self, Command::Init | Command::Clear)
    }
}

impl TryFrom<CommandRequest> for Command {
    type Error = Error;

    fn try_from(request: CommandRequest) -> Result<Self> {
        Command::parse(request)
    }
}

/// Collaborators and identity a handler works against
pub struct CommandContext<'a> {
    pub user_id: &'a str,
    pub ref_id: &'a str,
    pub installed: &'a dyn InstalledRegistry,
    pub titles: &'a dyn TitleOracle,
    pub pipeline: &'a OperationPipeline,
    pub refresh_policy: RefreshPolicy,
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub state: SessionState,
    pub warnings: Vec<String>,
    /// False when the caller must not store `state`
    pub persist: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ApplyReceipt>,
}

impl CommandOutcome {
    fn persisted(state: SessionState, warnings: Vec<String>) -> Self {
        Self {
            state,
            warnings,
            persist: true,
            receipt: None,
        }
    }
}

/// Run a command against the loaded session
///
/// `state` is `None` when no session is stored; only `init` and `clear`
/// accept that.
pub fn dispatch(
    state: Option<SessionState>,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
    command: Command,
) -> Result<CommandOutcome> {
    info!("{} for {}/{}", command.name(), ctx.user_id, ctx.ref_id);

    let state = match (state, command.needs_session()) {
        (Some(state), _) => Some(state),
        (None, false) => None,
        (None, true) => {
            return Err(Error::InvalidState(format!(
                "No session for {} on {}; run init first",
                ctx.user_id, ctx.ref_id
            )));
        }
    };

    match (command, state) {
        (Command::Init, _) => handlers::init(manifest, ctx),
        (Command::Clear, _) => handlers::clear(manifest, ctx),
        (Command::SelectPack { pack_name }, Some(state)) => {
            handlers::select_pack(state, manifest, ctx, &pack_name)
        }
        (Command::DeselectPack { pack_name, cascade }, Some(state)) => {
            handlers::deselect_pack(state, manifest, ctx, &pack_name, cascade)
        }
        (Command::SetPackAction { pack_name, action }, Some(state)) => {
            handlers::set_pack_action(state, manifest, ctx, &pack_name, action)
        }
        (
            Command::RenamePage {
                pack_name,
                page_name,
                title,
            },
            Some(state),
        ) => handlers::rename_page(state, ctx, &pack_name, &page_name, &title),
        (Command::SetPackPrefix { pack_name, prefix }, Some(state)) => {
            handlers::set_pack_prefix(state, ctx, &pack_name, &prefix)
        }
        (Command::Refresh, Some(state)) => handlers::refresh(state, manifest, ctx),
        (
            Command::Apply {
                state_hash,
                client_packs,
            },
            Some(state),
        ) => apply::apply(state, manifest, ctx, &state_hash, client_packs.as_ref()),
        (command, None) => Err(Error::InvalidState(format!(
            "{} requires a session",
            command.name()
        ))),
    }
}
