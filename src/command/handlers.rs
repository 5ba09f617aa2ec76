// src/command/handlers.rs

//! Handlers for the session-editing commands

use super::{CommandContext, CommandOutcome, RefreshPolicy};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::resolver::{conflict_warnings, detect_conflicts, find_dependents, propagate, prune_unneeded_auto_actions};
use crate::session::{PackAction, SessionState};
use crate::validation::DependencyViolation;
use std::collections::HashSet;
use tracing::{debug, info};

/// Re-run conflict detection, refresh the hash, and persist
fn finish(mut state: SessionState, ctx: &CommandContext<'_>, mut warnings: Vec<String>) -> CommandOutcome {
    let conflicts = detect_conflicts(&mut state, ctx.titles);
    warnings.extend(conflict_warnings(&conflicts));
    state.touch();
    CommandOutcome::persisted(state, warnings)
}

pub(super) fn baseline(manifest: &Manifest, ctx: &CommandContext<'_>) -> Result<SessionState> {
    let installed = ctx.installed.list_installed(ctx.ref_id)?;
    Ok(SessionState::baseline(ctx.user_id, ctx.ref_id, manifest, &installed))
}

pub(super) fn init(manifest: &Manifest, ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let state = baseline(manifest, ctx)?;
    info!(
        "Initialized session {}/{} with {} packs",
        ctx.user_id,
        ctx.ref_id,
        state.packs.len()
    );
    Ok(finish(state, ctx, Vec::new()))
}

pub(super) fn clear(manifest: &Manifest, ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut outcome = finish(baseline(manifest, ctx)?, ctx, Vec::new());
    outcome.persist = false;
    Ok(outcome)
}

fn require_manifest_pack(manifest: &Manifest, pack_name: &str) -> Result<()> {
    if manifest.contains(pack_name) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Pack {} is not offered by the manifest",
            pack_name
        )))
    }
}

pub(super) fn select_pack(
    mut state: SessionState,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
    pack_name: &str,
) -> Result<CommandOutcome> {
    require_manifest_pack(manifest, pack_name)?;
    let pack = state.pack_mut(pack_name)?;
    let mut warnings = Vec::new();

    let needed = pack.needed_action();
    if needed.is_pending() {
        pack.set_manual(needed);
        let auto = propagate(&mut state, manifest, pack_name);
        debug!("Selected {} ({}), auto-selected {:?}", pack_name, needed, auto);
    } else {
        // Selecting an installed pack keeps it, so a pending removal is dropped
        if pack.action == PackAction::Remove {
            pack.reset();
            debug!("Cancelled removal of {}", pack_name);
        }
        warnings.push(format!("Pack {} is already up to date", pack_name));
    }

    Ok(finish(state, ctx, warnings))
}

fn reset_with_dependents(
    state: &mut SessionState,
    manifest: &Manifest,
    pack_name: &str,
    visited: &mut HashSet<String>,
) -> Result<()> {
    if !visited.insert(pack_name.to_string()) {
        return Ok(());
    }
    for dependent in find_dependents(state, manifest, pack_name) {
        reset_with_dependents(state, manifest, &dependent, visited)?;
    }
    state.pack_mut(pack_name)?.reset();
    Ok(())
}

pub(super) fn deselect_pack(
    mut state: SessionState,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
    pack_name: &str,
    cascade: bool,
) -> Result<CommandOutcome> {
    // Cancelling a removal leaves the pack installed, so dependents stay satisfied
    if state.pack(pack_name)?.action == PackAction::Remove {
        state.pack_mut(pack_name)?.reset();
        debug!("Cancelled removal of {}", pack_name);
        return Ok(finish(state, ctx, Vec::new()));
    }

    let dependents = find_dependents(&state, manifest, pack_name);
    if !dependents.is_empty() && !cascade {
        return Err(Error::Dependency(DependencyViolation::Dependents {
            pack: pack_name.to_string(),
            dependents,
        }));
    }

    let mut warnings = Vec::new();
    if !dependents.is_empty() {
        warnings.push(format!(
            "Also deselected dependents of {}: {}",
            pack_name,
            dependents.join(", ")
        ));
    }

    reset_with_dependents(&mut state, manifest, pack_name, &mut HashSet::new())?;
    prune_unneeded_auto_actions(&mut state, manifest);
    Ok(finish(state, ctx, warnings))
}

pub(super) fn set_pack_action(
    mut state: SessionState,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
    pack_name: &str,
    action: PackAction,
) -> Result<CommandOutcome> {
    let pack = state.pack(pack_name)?;

    match action {
        PackAction::Unchanged => return deselect_pack(state, manifest, ctx, pack_name, false),
        PackAction::Install => {
            require_manifest_pack(manifest, pack_name)?;
            if pack.needed_action() != PackAction::Install {
                return Err(Error::InvalidArgument(format!(
                    "Pack {} is already installed",
                    pack_name
                )));
            }
        }
        PackAction::Update => {
            require_manifest_pack(manifest, pack_name)?;
            if pack.needed_action() != PackAction::Update {
                return Err(Error::InvalidArgument(format!(
                    "Pack {} has no update available",
                    pack_name
                )));
            }
        }
        PackAction::Remove => {
            if !pack.installed {
                return Err(Error::InvalidArgument(format!(
                    "Pack {} is not installed",
                    pack_name
                )));
            }
            let dependents: Vec<String> = find_dependents(&state, manifest, pack_name)
                .into_iter()
                .filter(|d| state.packs.get(d).is_some_and(|p| p.action.writes_pages()))
                .collect();
            if !dependents.is_empty() {
                return Err(Error::Dependency(DependencyViolation::Dependents {
                    pack: pack_name.to_string(),
                    dependents,
                }));
            }
        }
    }

    state.pack_mut(pack_name)?.set_manual(action);
    if action.writes_pages() {
        propagate(&mut state, manifest, pack_name);
    } else {
        prune_unneeded_auto_actions(&mut state, manifest);
    }
    Ok(finish(state, ctx, Vec::new()))
}

pub(super) fn rename_page(
    mut state: SessionState,
    ctx: &CommandContext<'_>,
    pack_name: &str,
    page_name: &str,
    title: &str,
) -> Result<CommandOutcome> {
    if title.trim().is_empty() {
        return Err(Error::InvalidArgument("Page title cannot be empty".to_string()));
    }

    let page = state
        .pack_mut(pack_name)?
        .pages
        .get_mut(page_name)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("Pack {} has no page {}", pack_name, page_name))
        })?;
    page.final_title = title.to_string();

    Ok(finish(state, ctx, Vec::new()))
}

pub(super) fn set_pack_prefix(
    mut state: SessionState,
    ctx: &CommandContext<'_>,
    pack_name: &str,
    prefix: &str,
) -> Result<CommandOutcome> {
    state.pack_mut(pack_name)?.apply_prefix(prefix);
    Ok(finish(state, ctx, Vec::new()))
}

/// Rebuild from the registry, then carry over what still applies
///
/// Prefixes and custom titles of pages not yet installed carry over.
/// Manual selections are re-applied when the fresh baseline still needs
/// them; auto-selections are recomputed from those.
pub(super) fn refresh(
    state: SessionState,
    manifest: &Manifest,
    ctx: &CommandContext<'_>,
) -> Result<CommandOutcome> {
    let mut fresh = baseline(manifest, ctx)?;
    if ctx.refresh_policy == RefreshPolicy::Rebuild {
        info!("Rebuilt session {}/{}", ctx.user_id, ctx.ref_id);
        return Ok(finish(fresh, ctx, Vec::new()));
    }

    let mut warnings = Vec::new();
    let mut reselected = Vec::new();

    for (name, old) in &state.packs {
        let Some(pack) = fresh.packs.get_mut(name) else {
            if old.action.is_pending() {
                warnings.push(format!("Pack {} is no longer available; dropped its selection", name));
            }
            continue;
        };

        if old.prefix != pack.prefix {
            let kept: Vec<(String, String)> = pack
                .pages
                .values()
                .filter(|p| p.installed)
                .map(|p| (p.name.clone(), p.final_title.clone()))
                .collect();
            pack.apply_prefix(&old.prefix);
            for (page_name, title) in kept {
                if let Some(page) = pack.pages.get_mut(&page_name) {
                    page.final_title = title;
                }
            }
        }

        for (page_name, old_page) in &old.pages {
            if let Some(page) = pack.pages.get_mut(page_name) {
                if old_page.is_renamed() && !page.installed {
                    page.final_title = old_page.final_title.clone();
                }
            }
        }

        if !old.is_manual() {
            continue;
        }
        let still_applies = match old.action {
            PackAction::Remove => pack.installed,
            _ => pack.needed_action().is_pending(),
        };
        if still_applies {
            let action = match old.action {
                PackAction::Remove => PackAction::Remove,
                _ => pack.needed_action(),
            };
            pack.set_manual(action);
            reselected.push(name.clone());
        } else {
            warnings.push(format!(
                "Pack {} no longer needs {}; selection dropped",
                name, old.action
            ));
        }
    }

    for name in &reselected {
        if fresh.packs.get(name).is_some_and(|p| p.action.writes_pages()) {
            propagate(&mut fresh, manifest, name);
        }
    }
    prune_unneeded_auto_actions(&mut fresh, manifest);

    info!(
        "Refreshed session {}/{}: {} selections kept",
        ctx.user_id,
        ctx.ref_id,
        reselected.len()
    );
    Ok(finish(fresh, ctx, warnings))
}
