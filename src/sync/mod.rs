// src/sync/mod.rs

//! Optimistic concurrency for session state
//!
//! A client echoes the hash of the state it last saw. When that hash no
//! longer matches the authoritative session, the server answers with the
//! authoritative packs, a field-level diff, and a queue of reconcile
//! commands. Replaying the queue against the stale client packs brings them
//! in line with the server without a full reload.

use crate::error::{Error, Result};
use crate::session::{ConflictType, PackAction, PackState, PageState, SessionState, default_title};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One differing field: what the client had and what the server has
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub client: Value,
    pub server: Value,
}

/// Differences for one pack, including nested page differences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackDiff {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, FieldChange>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub pages: BTreeMap<String, BTreeMap<String, FieldChange>>,
}

impl PackDiff {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.pages.is_empty()
    }

    /// Whether anything other than the prefix differs at pack level
    fn needs_action_entry(&self) -> bool {
        self.fields.keys().any(|k| k != "prefix")
    }
}

/// Pack name to its differences
pub type DiffMap = BTreeMap<String, PackDiff>;

/// A synthesized instruction that moves a stale client toward the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum ReconcileCommand {
    SetPackAction {
        pack_name: String,
        action: PackAction,
        auto_selected_reason: Option<String>,
        current_version: Option<String>,
        target_version: Option<String>,
        installed: bool,
    },
    SetPackPrefix {
        pack_name: String,
        prefix: String,
    },
    RenamePage {
        pack_name: String,
        page_name: String,
        title: String,
        conflict_type: Option<ConflictType>,
        installed: bool,
    },
}

impl ReconcileCommand {
    pub fn pack_name(&self) -> &str {
        match self {
            ReconcileCommand::SetPackAction { pack_name, .. } => pack_name,
            ReconcileCommand::SetPackPrefix { pack_name, .. } => pack_name,
            ReconcileCommand::RenamePage { pack_name, .. } => pack_name,
        }
    }

    fn action_entry(pack_name: &str, pack: &PackState) -> Self {
        ReconcileCommand::SetPackAction {
            pack_name: pack_name.to_string(),
            action: pack.action,
            auto_selected_reason: pack.auto_selected_reason.clone(),
            current_version: pack.current_version.clone(),
            target_version: pack.target_version.clone(),
            installed: pack.installed,
        }
    }

    fn prefix_entry(pack_name: &str, pack: &PackState) -> Self {
        ReconcileCommand::SetPackPrefix {
            pack_name: pack_name.to_string(),
            prefix: pack.prefix.clone(),
        }
    }

    fn page_entry(pack_name: &str, page: &PageState) -> Self {
        ReconcileCommand::RenamePage {
            pack_name: pack_name.to_string(),
            page_name: page.name.clone(),
            title: page.final_title.clone(),
            conflict_type: page.conflict_type,
            installed: page.installed,
        }
    }
}

/// Payload of a `StateOutOfSync` error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfSync {
    /// Authoritative packs
    pub packs: BTreeMap<String, PackState>,
    /// Authoritative hash
    pub hash: String,
    pub diff: DiffMap,
    pub reconcile: Vec<ReconcileCommand>,
}

fn pack_fields(pack: &PackState) -> [(&'static str, Value); 6] {
    [
        ("action", Value::from(pack.action.as_str())),
        ("auto_selected_reason", Value::from(pack.auto_selected_reason.clone())),
        ("current_version", Value::from(pack.current_version.clone())),
        ("target_version", Value::from(pack.target_version.clone())),
        ("prefix", Value::from(pack.prefix.clone())),
        ("installed", Value::from(pack.installed)),
    ]
}

fn page_fields(page: &PageState) -> [(&'static str, Value); 5] {
    [
        ("default_title", Value::from(page.default_title.clone())),
        ("final_title", Value::from(page.final_title.clone())),
        ("has_conflict", Value::from(page.has_conflict)),
        ("conflict_type", Value::from(page.conflict_type.map(|c| c.as_str()))),
        ("installed", Value::from(page.installed)),
    ]
}

fn field_changes<const N: usize>(
    client: Option<[(&'static str, Value); N]>,
    server: [(&'static str, Value); N],
) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();
    let client_values: Vec<Value> = match client {
        Some(fields) => fields.into_iter().map(|(_, v)| v).collect(),
        None => vec![Value::Null; N],
    };

    for ((name, server_value), client_value) in server.into_iter().zip(client_values) {
        if client_value != server_value {
            changes.insert(
                name.to_string(),
                FieldChange {
                    client: client_value,
                    server: server_value,
                },
            );
        }
    }
    changes
}

/// Field-level differences for every pack present on both sides
///
/// Pages the server has and the client lacks are reported with null client
/// values. Pages only the client has are not reported.
pub fn diff_packs(
    client: &BTreeMap<String, PackState>,
    server: &BTreeMap<String, PackState>,
) -> DiffMap {
    let mut diff = DiffMap::new();

    for (name, server_pack) in server {
        let Some(client_pack) = client.get(name) else {
            continue;
        };

        let mut pack_diff = PackDiff {
            fields: field_changes(Some(pack_fields(client_pack)), pack_fields(server_pack)),
            ..PackDiff::default()
        };

        for (page_name, server_page) in &server_pack.pages {
            let client_page = client_pack.pages.get(page_name).map(page_fields);
            let changes = field_changes(client_page, page_fields(server_page));
            if !changes.is_empty() {
                pack_diff.pages.insert(page_name.clone(), changes);
            }
        }

        if !pack_diff.is_empty() {
            diff.insert(name.clone(), pack_diff);
        }
    }

    diff
}

/// Reconcile commands for a diff, in pack-then-page order
///
/// Per pack: one `set_pack_action` when any non-prefix field differs, one
/// `set_pack_prefix` when the prefix differs, then one `rename_page` per
/// differing page.
pub fn reconcile_queue(diff: &DiffMap, server: &BTreeMap<String, PackState>) -> Vec<ReconcileCommand> {
    let mut queue = Vec::new();

    for (name, pack_diff) in diff {
        let Some(pack) = server.get(name) else {
            continue;
        };

        if pack_diff.needs_action_entry() {
            queue.push(ReconcileCommand::action_entry(name, pack));
        }
        if pack_diff.fields.contains_key("prefix") {
            queue.push(ReconcileCommand::prefix_entry(name, pack));
        }
        for page_name in pack_diff.pages.keys() {
            if let Some(page) = pack.pages.get(page_name) {
                queue.push(ReconcileCommand::page_entry(name, page));
            }
        }
    }

    queue
}

/// Commands that rebuild the server packs from nothing
///
/// Used when the client sent only a hash and no packs to diff against.
pub fn snapshot_queue(server: &BTreeMap<String, PackState>) -> Vec<ReconcileCommand> {
    let mut queue = Vec::new();
    for (name, pack) in server {
        queue.push(ReconcileCommand::action_entry(name, pack));
        queue.push(ReconcileCommand::prefix_entry(name, pack));
        for page in pack.pages.values() {
            queue.push(ReconcileCommand::page_entry(name, page));
        }
    }
    queue
}

/// Apply reconcile commands to client packs as raw field setters
///
/// No propagation or conflict detection runs. A prefix entry recomputes
/// default titles without moving final titles; final titles arrive through
/// their own `rename_page` entries. Unknown packs and pages are created.
pub fn replay(packs: &mut BTreeMap<String, PackState>, queue: &[ReconcileCommand]) {
    for command in queue {
        let pack = packs.entry(command.pack_name().to_string()).or_default();

        match command {
            ReconcileCommand::SetPackAction {
                action,
                auto_selected_reason,
                current_version,
                target_version,
                installed,
                ..
            } => {
                pack.action = *action;
                pack.auto_selected_reason = auto_selected_reason.clone();
                pack.current_version = current_version.clone();
                pack.target_version = target_version.clone();
                pack.installed = *installed;
            }
            ReconcileCommand::SetPackPrefix { prefix, .. } => {
                pack.prefix = prefix.clone();
                for page in pack.pages.values_mut() {
                    page.default_title = default_title(prefix, &page.name);
                }
            }
            ReconcileCommand::RenamePage {
                page_name,
                title,
                conflict_type,
                installed,
                ..
            } => {
                let prefix = pack.prefix.clone();
                let page = pack
                    .pages
                    .entry(page_name.clone())
                    .or_insert_with(|| PageState::new(page_name.as_str(), &prefix));
                page.final_title = title.clone();
                page.has_conflict = conflict_type.is_some();
                page.conflict_type = *conflict_type;
                page.installed = *installed;
            }
        }
    }
}

/// Build the out-of-sync payload for a stale client
pub fn out_of_sync(server: &SessionState, client_packs: Option<&BTreeMap<String, PackState>>) -> OutOfSync {
    let (diff, reconcile) = match client_packs {
        Some(client) => {
            let diff = diff_packs(client, &server.packs);
            let queue = reconcile_queue(&diff, &server.packs);
            (diff, queue)
        }
        None => (DiffMap::new(), snapshot_queue(&server.packs)),
    };

    OutOfSync {
        packs: server.packs.clone(),
        hash: server.hash.clone(),
        diff,
        reconcile,
    }
}

/// Compare a client hash with the authoritative session
pub fn check_hash(
    server: &SessionState,
    client_hash: &str,
    client_packs: Option<&BTreeMap<String, PackState>>,
) -> Result<()> {
    let current = crate::session::compute_hash(server);
    if current == client_hash {
        debug!("Client hash {} matches session", client_hash);
        return Ok(());
    }

    let payload = out_of_sync(server, client_packs);
    info!(
        "Session {}/{} out of sync: client {}, server {}, {} reconcile commands",
        server.user_id,
        server.ref_id,
        client_hash,
        current,
        payload.reconcile.len()
    );
    Err(Error::StateOutOfSync(Box::new(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, PackDefinition};
    use crate::registry::InstalledPack;
    use crate::session::hash_packs;

    fn manifest() -> Manifest {
        Manifest::new()
            .with_pack("a", PackDefinition::new("1.0").with_pages(["One"]).with_prefix("A:"))
            .with_pack(
                "b",
                PackDefinition::new("2.0")
                    .with_depends_on(["a"])
                    .with_pages(["Two", "Three"])
                    .with_prefix("B:"),
            )
    }

    fn diverged() -> (SessionState, SessionState) {
        let installed = vec![InstalledPack::new("a", "0.9")];
        let client = SessionState::baseline("u", "r", &manifest(), &installed);
        let mut server = client.clone();

        let b = server.pack_mut("b").unwrap();
        b.set_manual(PackAction::Install);
        b.apply_prefix("Beta/");
        b.pages.get_mut("Two").unwrap().final_title = "Second".to_string();
        b.pages.get_mut("Three").unwrap().mark_conflict(ConflictType::ExistingPage);
        server
            .pack_mut("a")
            .unwrap()
            .set_auto(PackAction::Update, "Required by b".to_string());
        server.touch();

        (client, server)
    }

    #[test]
    fn test_matching_hash_passes() {
        let (_, server) = diverged();
        assert!(check_hash(&server, &server.hash, None).is_ok());
    }

    #[test]
    fn test_diff_reports_changed_fields() {
        let (client, server) = diverged();
        let diff = diff_packs(&client.packs, &server.packs);

        let a = &diff["a"];
        assert_eq!(a.fields["action"].client, Value::from("unchanged"));
        assert_eq!(a.fields["action"].server, Value::from("update"));
        assert!(a.fields.contains_key("auto_selected_reason"));
        assert!(a.pages.is_empty());

        let b = &diff["b"];
        assert_eq!(b.fields["prefix"].server, Value::from("Beta/"));
        assert_eq!(b.pages["Two"]["final_title"].server, Value::from("Second"));
        assert_eq!(b.pages["Three"]["conflict_type"].server, Value::from("existing_page"));
    }

    #[test]
    fn test_queue_order() {
        let (client, server) = diverged();
        let diff = diff_packs(&client.packs, &server.packs);
        let queue = reconcile_queue(&diff, &server.packs);

        let kinds: Vec<(&str, &str)> = queue
            .iter()
            .map(|c| {
                let kind = match c {
                    ReconcileCommand::SetPackAction { .. } => "action",
                    ReconcileCommand::SetPackPrefix { .. } => "prefix",
                    ReconcileCommand::RenamePage { page_name, .. } => page_name.as_str(),
                };
                (c.pack_name(), kind)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a", "action"),
                ("b", "action"),
                ("b", "prefix"),
                ("b", "Three"),
                ("b", "Two"),
            ]
        );
    }

    #[test]
    fn test_replay_converges() {
        let (client, server) = diverged();
        let err = check_hash(&server, &client.hash, Some(&client.packs)).unwrap_err();
        let Error::StateOutOfSync(payload) = err else {
            panic!("expected StateOutOfSync");
        };
        assert_eq!(payload.hash, server.hash);

        let mut packs = client.packs.clone();
        replay(&mut packs, &payload.reconcile);
        assert_eq!(packs, server.packs);
        assert_eq!(hash_packs(&packs), server.hash);
    }

    #[test]
    fn test_snapshot_queue_without_client_packs() {
        let (_, server) = diverged();
        let payload = out_of_sync(&server, None);
        assert!(payload.diff.is_empty());

        let mut packs = BTreeMap::new();
        replay(&mut packs, &payload.reconcile);
        assert_eq!(packs, server.packs);
    }

    #[test]
    fn test_reconcile_wire_shape() {
        let command = ReconcileCommand::SetPackPrefix {
            pack_name: "b".to_string(),
            prefix: "Beta/".to_string(),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "set_pack_prefix");
        assert_eq!(json["data"]["pack_name"], "b");
    }
}
