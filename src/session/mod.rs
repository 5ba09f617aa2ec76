// src/session/mod.rs

//! Session state for an in-progress pack selection
//!
//! A session belongs to one (user, ref) pair and records, for every pack the
//! manifest offers (plus packs installed but no longer offered), what the
//! operator intends to do with it and how its pages will be titled. The
//! state is plain data: every mutation goes through the command handlers,
//! which call [`SessionState::touch`] to refresh the timestamp and hash.

pub mod hash;
pub mod store;

pub use hash::{HASH_LEN, compute_hash, hash_packs};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::registry::InstalledPack;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What will happen to a pack when the session is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackAction {
    #[default]
    Unchanged,
    Install,
    Update,
    Remove,
}

impl PackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackAction::Unchanged => "unchanged",
            PackAction::Install => "install",
            PackAction::Update => "update",
            PackAction::Remove => "remove",
        }
    }

    /// Anything other than `Unchanged`
    pub fn is_pending(&self) -> bool {
        *self != PackAction::Unchanged
    }

    /// Install or update: the pack's pages will be written
    pub fn writes_pages(&self) -> bool {
        matches!(self, PackAction::Install | PackAction::Update)
    }
}

impl fmt::Display for PackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unchanged" => Ok(PackAction::Unchanged),
            "install" => Ok(PackAction::Install),
            "update" => Ok(PackAction::Update),
            "remove" => Ok(PackAction::Remove),
            _ => Err(Error::InvalidArgument(format!("Invalid pack action: {s}"))),
        }
    }
}

/// Why a page title was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// A page with this title already exists in the content store
    ExistingPage,
    /// Another page in the same selection uses this title
    DuplicateInSelection,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ExistingPage => "existing_page",
            ConflictType::DuplicateInSelection => "duplicate_in_selection",
        }
    }
}

/// Title a page gets when nobody renamed it
pub fn default_title(prefix: &str, page_name: &str) -> String {
    format!("{}{}", prefix, page_name)
}

/// Per-page state within a pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub name: String,
    pub default_title: String,
    pub final_title: String,
    pub has_conflict: bool,
    pub conflict_type: Option<ConflictType>,
    pub installed: bool,
}

impl PageState {
    /// Create a page titled by its pack prefix
    pub fn new(name: impl Into<String>, prefix: &str) -> Self {
        let name = name.into();
        let title = default_title(prefix, &name);
        Self {
            name,
            default_title: title.clone(),
            final_title: title,
            has_conflict: false,
            conflict_type: None,
            installed: false,
        }
    }

    /// Whether the final title was changed away from the default
    pub fn is_renamed(&self) -> bool {
        self.final_title != self.default_title
    }

    pub fn mark_conflict(&mut self, kind: ConflictType) {
        self.has_conflict = true;
        self.conflict_type = Some(kind);
    }

    pub fn clear_conflict(&mut self) {
        self.has_conflict = false;
        self.conflict_type = None;
    }
}

/// Per-pack state within a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackState {
    pub action: PackAction,
    /// Non-null when the action was propagated from a dependent
    pub auto_selected_reason: Option<String>,
    /// Installed version, or None when not installed
    pub current_version: Option<String>,
    /// Manifest version, or None when the manifest no longer offers the pack
    pub target_version: Option<String>,
    pub prefix: String,
    pub installed: bool,
    pub pages: BTreeMap<String, PageState>,
}

impl PackState {
    /// Chosen by the user rather than by dependency propagation
    pub fn is_manual(&self) -> bool {
        self.action.is_pending() && self.auto_selected_reason.is_none()
    }

    /// Chosen by dependency propagation
    pub fn is_auto(&self) -> bool {
        self.action.is_pending() && self.auto_selected_reason.is_some()
    }

    /// The action that brings this pack to its manifest version
    ///
    /// `Install` when absent, `Update` when the installed version differs
    /// from the manifest, otherwise `Unchanged`.
    pub fn needed_action(&self) -> PackAction {
        match (&self.current_version, &self.target_version) {
            (None, Some(_)) => PackAction::Install,
            (Some(current), Some(target)) if current != target => PackAction::Update,
            _ => PackAction::Unchanged,
        }
    }

    /// Record a user-chosen action
    pub fn set_manual(&mut self, action: PackAction) {
        self.action = action;
        self.auto_selected_reason = None;
    }

    /// Record a propagated action
    pub fn set_auto(&mut self, action: PackAction, reason: String) {
        self.action = action;
        self.auto_selected_reason = Some(reason);
    }

    /// Back to `Unchanged` with no reason
    pub fn reset(&mut self) {
        self.action = PackAction::Unchanged;
        self.auto_selected_reason = None;
    }

    /// Change the prefix, moving untouched titles along with it
    ///
    /// Pages whose final title still equals their old default title follow
    /// the new prefix; pages renamed to something else keep their title.
    pub fn apply_prefix(&mut self, prefix: &str) {
        for page in self.pages.values_mut() {
            let new_default = default_title(prefix, &page.name);
            if !page.is_renamed() {
                page.final_title = new_default.clone();
            }
            page.default_title = new_default;
        }
        self.prefix = prefix.to_string();
    }
}

/// The mutable, hashed record of one user's pending selections for a ref
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub ref_id: String,
    pub user_id: String,
    pub packs: BTreeMap<String, PackState>,
    pub timestamp: String,
    pub hash: String,
}

impl SessionState {
    /// A session with no packs
    pub fn empty(user_id: impl Into<String>, ref_id: impl Into<String>) -> Self {
        let mut state = Self {
            ref_id: ref_id.into(),
            user_id: user_id.into(),
            packs: BTreeMap::new(),
            timestamp: String::new(),
            hash: String::new(),
        };
        state.touch();
        state
    }

    /// Build the untouched baseline for a ref
    ///
    /// Every manifest pack gets `action = unchanged`, its installed version
    /// (if any) and its manifest version. Titles of installed pages are taken
    /// from the registry. Installed packs the manifest no longer declares are
    /// kept with no target version so they can still be removed.
    pub fn baseline(
        user_id: &str,
        ref_id: &str,
        manifest: &Manifest,
        installed: &[InstalledPack],
    ) -> Self {
        let mut state = Self::empty(user_id, ref_id);
        let installed_by_name: BTreeMap<&str, &InstalledPack> =
            installed.iter().map(|p| (p.name.as_str(), p)).collect();

        for (name, def) in &manifest.packs {
            let prefix = def.prefix.clone().unwrap_or_default();
            let record = installed_by_name.get(name.as_str());

            let mut pack = PackState {
                current_version: record.map(|r| r.version.clone()),
                target_version: Some(def.version.clone()),
                prefix: prefix.clone(),
                installed: record.is_some(),
                ..PackState::default()
            };

            for page_name in &def.pages {
                pack.pages
                    .insert(page_name.clone(), PageState::new(page_name.as_str(), &prefix));
            }

            if let Some(record) = record {
                for installed_page in &record.pages {
                    let page = pack
                        .pages
                        .entry(installed_page.name.clone())
                        .or_insert_with(|| PageState::new(installed_page.name.as_str(), &prefix));
                    page.final_title = installed_page.final_title.clone();
                    page.installed = true;
                }
            }

            state.packs.insert(name.clone(), pack);
        }

        for record in installed {
            if manifest.contains(&record.name) {
                continue;
            }
            let mut pack = PackState {
                current_version: Some(record.version.clone()),
                target_version: None,
                installed: true,
                ..PackState::default()
            };
            for installed_page in &record.pages {
                let mut page = PageState::new(installed_page.name.as_str(), "");
                page.final_title = installed_page.final_title.clone();
                page.installed = true;
                pack.pages.insert(installed_page.name.clone(), page);
            }
            state.packs.insert(record.name.clone(), pack);
        }

        state.touch();
        state
    }

    /// Look up a pack, failing with InvalidArgument when unknown
    pub fn pack(&self, name: &str) -> Result<&PackState> {
        self.packs
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown pack: {name}")))
    }

    /// Mutable pack lookup, failing with InvalidArgument when unknown
    pub fn pack_mut(&mut self, name: &str) -> Result<&mut PackState> {
        self.packs
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown pack: {name}")))
    }

    /// Refresh the timestamp and recompute the hash
    pub fn touch(&mut self) {
        self.timestamp = chrono::Utc::now().to_rfc3339();
        self.hash = compute_hash(self);
    }

    /// Packs with a pending action, in name order
    pub fn pending(&self) -> impl Iterator<Item = (&String, &PackState)> {
        self.packs.iter().filter(|(_, p)| p.action.is_pending())
    }

    /// Whether nothing is pending
    pub fn is_clean(&self) -> bool {
        self.pending().next().is_none()
    }
}
