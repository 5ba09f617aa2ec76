// src/command/apply.rs

//! Turning a finished selection into an operation

use super::{CommandContext, CommandOutcome, handlers};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::operation::{
    ApplySummary, OperationStatus, OperationType, PackOperation, PageSpec,
};
use crate::registry::{InstalledPack, InstalledRegistry};
use crate::resolver::DependencyGraph;
use crate::session::{PackAction, PackState, SessionState, default_title};
use crate::{sync, validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// What the client gets back from a successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub operation_id: String,
    pub status: OperationStatus,
    pub summary: ApplySummary,
}

fn page_specs(pack: &PackState) -> Vec<PageSpec> {
    pack.pages
        .values()
        .map(|p| PageSpec {
            name: p.name.clone(),
            final_title: p.final_title.clone(),
        })
        .collect()
}

fn missing_version(pack_name: &str, which: &str) -> Error {
    Error::InvalidState(format!("Pack {} has no {} version", pack_name, which))
}

/// One operation per pending pack, in dependency order
///
/// Removals come first, dependents before what they depend on. Installs and
/// updates follow, each after the packs it depends on.
pub fn build_operations(
    state: &SessionState,
    manifest: &Manifest,
    installed: &dyn InstalledRegistry,
) -> Result<Vec<PackOperation>> {
    let pending: Vec<String> = state.pending().map(|(name, _)| name.clone()).collect();
    let order = DependencyGraph::from_manifest(manifest).dependency_order(&pending);

    let mut removals = Vec::new();
    let mut writes = Vec::new();

    for name in &order {
        let pack = state.pack(name)?;
        match pack.action {
            PackAction::Install => writes.push(PackOperation::Install {
                pack_name: name.clone(),
                target_version: pack
                    .target_version
                    .clone()
                    .ok_or_else(|| missing_version(name, "target"))?,
                depends_on: manifest.depends_on(name).to_vec(),
                pages: page_specs(pack),
            }),
            PackAction::Update => writes.push(PackOperation::Update {
                pack_name: name.clone(),
                current_version: pack
                    .current_version
                    .clone()
                    .ok_or_else(|| missing_version(name, "installed"))?,
                target_version: pack
                    .target_version
                    .clone()
                    .ok_or_else(|| missing_version(name, "target"))?,
                depends_on: manifest.depends_on(name).to_vec(),
                pages: page_specs(pack),
            }),
            PackAction::Remove => removals.push(PackOperation::Remove {
                pack_name: name.clone(),
                pack_id: installed.pack_id_by_name(&state.ref_id, name)?,
            }),
            PackAction::Unchanged => {}
        }
    }

    removals.reverse();
    removals.extend(writes);
    Ok(removals)
}

/// Operations for a direct install, update or remove of named packs
///
/// Pages get their default titles. Packs that are not applicable (installing
/// an installed pack, updating an up-to-date one, removing a missing one)
/// are rejected.
pub fn direct_operations(
    action: PackAction,
    pack_names: &[String],
    manifest: &Manifest,
    installed: &[InstalledPack],
    registry: &dyn InstalledRegistry,
    ref_id: &str,
) -> Result<Vec<PackOperation>> {
    let by_name: BTreeMap<&str, &InstalledPack> =
        installed.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut operations = Vec::new();

    for name in pack_names {
        let record = by_name.get(name.as_str());

        let op = match action {
            PackAction::Install | PackAction::Update => {
                let def = manifest.get(name).ok_or_else(|| {
                    Error::InvalidArgument(format!("Pack {} is not offered by the manifest", name))
                })?;
                let prefix = def.prefix.clone().unwrap_or_default();
                let pages = def
                    .pages
                    .iter()
                    .map(|page| PageSpec {
                        name: page.clone(),
                        final_title: default_title(&prefix, page),
                    })
                    .collect();

                match (action, record) {
                    (PackAction::Install, None) => PackOperation::Install {
                        pack_name: name.clone(),
                        target_version: def.version.clone(),
                        depends_on: def.depends_on.clone(),
                        pages,
                    },
                    (PackAction::Install, Some(_)) => {
                        return Err(Error::InvalidArgument(format!(
                            "Pack {} is already installed",
                            name
                        )));
                    }
                    (_, Some(r)) if r.version != def.version => PackOperation::Update {
                        pack_name: name.clone(),
                        current_version: r.version.clone(),
                        target_version: def.version.clone(),
                        depends_on: def.depends_on.clone(),
                        pages,
                    },
                    (_, Some(_)) => {
                        return Err(Error::InvalidArgument(format!(
                            "Pack {} is already up to date",
                            name
                        )));
                    }
                    (_, None) => {
                        return Err(Error::InvalidArgument(format!(
                            "Pack {} is not installed",
                            name
                        )));
                    }
                }
            }
            PackAction::Remove => {
                if record.is_none() {
                    return Err(Error::InvalidArgument(format!("Pack {} is not installed", name)));
                }
                PackOperation::Remove {
                    pack_name: name.clone(),
                    pack_id: registry.pack_id_by_name(ref_id, name)?,
                }
            }
            PackAction::Unchanged => {
                return Err(Error::InvalidArgument(
                    "unchanged is not an operation".to_string(),
                ));
            }
        };
        operations.push(op);
    }

    Ok(operations)
}

/// Check the client hash, validate, and hand the batch off
pub(super) fn apply(
    state: SessionState,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
    state_hash: &str,
    client_packs: Option<&BTreeMap<String, PackState>>,
) -> Result<CommandOutcome> {
    sync::check_hash(&state, state_hash, client_packs)?;

    let operations = build_operations(&state, manifest, ctx.installed)?;
    if operations.is_empty() {
        return Err(Error::InvalidArgument("no operations to apply".to_string()));
    }

    let installed = ctx.installed.list_installed(ctx.ref_id)?;
    validation::validate(&operations, manifest, &installed)?;

    let summary = ApplySummary::of(&operations);
    let message = format!(
        "Applying {} installs, {} updates, {} removes",
        summary.installs, summary.updates, summary.removes
    );
    let operation = ctx.pipeline.submit(
        OperationType::PackApply,
        ctx.user_id,
        ctx.ref_id,
        operations,
        &message,
    )?;
    info!(
        "Applied session {}/{} as operation {}",
        ctx.user_id, ctx.ref_id, operation.operation_id
    );

    let mut outcome = CommandOutcome::persisted(handlers::baseline(manifest, ctx)?, Vec::new());
    outcome.persist = false;
    outcome.receipt = Some(ApplyReceipt {
        operation_id: operation.operation_id,
        status: operation.status,
        summary,
    });
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackDefinition;
    use crate::registry::StaticRegistry;

    #[test]
    fn test_build_operations_follow_dependencies() {
        let manifest = Manifest::new()
            .with_pack("base", PackDefinition::new("1.1"))
            .with_pack("forms", PackDefinition::new("1.0").with_depends_on(["base"]))
            .with_pack("charts", PackDefinition::new("1.0").with_depends_on(["forms"]))
            .with_pack("lib", PackDefinition::new("1.0"))
            .with_pack("app", PackDefinition::new("1.0").with_depends_on(["lib"]));
        let installed = vec![
            InstalledPack::new("base", "1.0"),
            InstalledPack::new("lib", "1.0"),
            InstalledPack::new("app", "1.0").with_depends_on(["lib"]),
        ];
        let registry = StaticRegistry::with_installed(installed.clone());

        let mut state = SessionState::baseline("u", "main", &manifest, &installed);
        state.pack_mut("charts").unwrap().set_manual(PackAction::Install);
        state.pack_mut("forms").unwrap().set_manual(PackAction::Install);
        state.pack_mut("base").unwrap().set_manual(PackAction::Update);
        state.pack_mut("lib").unwrap().set_manual(PackAction::Remove);
        state.pack_mut("app").unwrap().set_manual(PackAction::Remove);

        let operations = build_operations(&state, &manifest, &registry).unwrap();
        let names: Vec<&str> = operations.iter().map(|op| op.pack_name()).collect();
        assert_eq!(names, vec!["app", "lib", "base", "forms", "charts"]);

        let PackOperation::Remove { pack_id, .. } = &operations[1] else {
            panic!("expected a removal");
        };
        assert_eq!(*pack_id, registry.pack_id_by_name("main", "lib").unwrap());
        assert!(pack_id.is_some());
    }
}
