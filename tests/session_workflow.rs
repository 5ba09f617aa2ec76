// tests/session_workflow.rs

//! Integration tests for editing a session through the service.
//!
//! These tests verify that:
//! 1. Selecting a pack pulls in what it depends on
//! 2. Rejected commands leave the stored session and its hash alone
//! 3. Cascading deselects and prunes return the session to a clean state
//! 4. Pending removals can be cancelled without disturbing other selections
//! 5. Prefixes, renames and title conflicts show up in page state

mod common;

use common::{REF, USER, sample_manifest, setup};
use packsmith::registry::{InstalledPack, RegistryWriter};
use packsmith::session::{ConflictType, compute_hash};
use packsmith::{Command, CommandRequest, Error, PackAction};
use serde_json::json;

#[test]
fn test_select_pulls_in_dependencies() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();

    let outcome = env.select("theme");
    let packs = &outcome.state.packs;

    assert_eq!(packs["theme"].action, PackAction::Install);
    assert!(packs["theme"].is_manual());
    assert!(packs["widgets"].is_auto());
    assert_eq!(
        packs["widgets"].auto_selected_reason.as_deref(),
        Some("Required by theme")
    );
    assert!(packs["core"].is_auto());
    assert_eq!(packs["icons"].action, PackAction::Unchanged);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_select_skips_installed_dependencies() {
    let installed = [InstalledPack::new("core", "1.0.0").with_page("Home", "Home")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    env.run(Command::Init).unwrap();

    let outcome = env.select("widgets");
    assert_eq!(outcome.state.packs["widgets"].action, PackAction::Install);
    assert_eq!(outcome.state.packs["core"].action, PackAction::Unchanged);
    assert!(outcome.state.packs["core"].installed);
}

#[test]
fn test_select_up_to_date_pack_warns() {
    let installed = [InstalledPack::new("core", "1.0.0").with_page("Home", "Home")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    env.run(Command::Init).unwrap();
    let before = env.stored_hash();

    let outcome = env.select("core");
    assert_eq!(outcome.warnings, vec!["Pack core is already up to date".to_string()]);
    assert!(outcome.state.is_clean());
    assert_eq!(outcome.state.hash, before);
}

fn mark_removed(env: &common::TestEnv, pack: &str) {
    env.run(Command::SetPackAction {
        pack_name: pack.to_string(),
        action: PackAction::Remove,
    })
    .unwrap();
}

#[test]
fn test_cancel_removal_with_selected_dependent() {
    let installed = [InstalledPack::new("core", "1.0.0").with_page("Home", "Home")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    env.run(Command::Init).unwrap();
    mark_removed(&env, "core");
    env.select("widgets");

    let outcome = env
        .run(Command::DeselectPack {
            pack_name: "core".to_string(),
            cascade: false,
        })
        .unwrap();

    let packs = &outcome.state.packs;
    assert_eq!(packs["core"].action, PackAction::Unchanged);
    assert!(packs["core"].installed);
    assert_eq!(packs["widgets"].action, PackAction::Install);
    assert!(packs["widgets"].is_manual());
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_cancel_removal_through_set_action() {
    let installed = [InstalledPack::new("core", "1.0.0").with_page("Home", "Home")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    let clean_hash = env.run(Command::Init).unwrap().state.hash;
    mark_removed(&env, "core");
    env.select("widgets");

    let outcome = env
        .run(Command::SetPackAction {
            pack_name: "core".to_string(),
            action: PackAction::Unchanged,
        })
        .unwrap();
    assert_eq!(outcome.state.packs["core"].action, PackAction::Unchanged);
    assert_eq!(outcome.state.packs["widgets"].action, PackAction::Install);

    env.run(Command::DeselectPack {
        pack_name: "widgets".to_string(),
        cascade: false,
    })
    .unwrap();
    assert_eq!(env.stored_hash(), clean_hash);
}

#[test]
fn test_cascade_deselect_of_removal_keeps_dependents() {
    let installed = [InstalledPack::new("core", "1.0.0").with_page("Home", "Home")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    env.run(Command::Init).unwrap();
    mark_removed(&env, "core");
    env.select("theme");

    let outcome = env
        .run(Command::DeselectPack {
            pack_name: "core".to_string(),
            cascade: true,
        })
        .unwrap();
    let packs = &outcome.state.packs;
    assert_eq!(packs["core"].action, PackAction::Unchanged);
    assert_eq!(packs["theme"].action, PackAction::Install);
    assert_eq!(packs["widgets"].action, PackAction::Install);
    assert!(packs["widgets"].is_auto());
}

#[test]
fn test_reselect_removed_pack_cancels_removal() {
    let installed = [InstalledPack::new("icons", "2.0.0").with_page("Icons", "Icons")];
    let (env, _rx) = setup(sample_manifest(), &installed);
    let clean_hash = env.run(Command::Init).unwrap().state.hash;
    mark_removed(&env, "icons");

    let outcome = env.select("icons");
    assert_eq!(outcome.state.packs["icons"].action, PackAction::Unchanged);
    assert!(outcome.state.packs["icons"].auto_selected_reason.is_none());
    assert_eq!(outcome.warnings, vec!["Pack icons is already up to date".to_string()]);
    assert!(outcome.state.is_clean());
    assert_eq!(env.stored_hash(), clean_hash);
}

#[test]
fn test_blocked_deselect_keeps_stored_hash() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    env.select("theme");
    let before = env.stored_hash();

    let err = env
        .run(Command::DeselectPack {
            pack_name: "core".to_string(),
            cascade: false,
        })
        .unwrap_err();

    assert_eq!(err.kind(), "dependency_error");
    let details = err.details();
    assert_eq!(details["kind"], "dependents");
    assert_eq!(details["pack"], "core");
    assert_eq!(details["dependents"], json!(["widgets"]));
    assert_eq!(env.stored_hash(), before);
}

#[test]
fn test_cascade_deselect_clears_chain() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    env.select("theme");

    let outcome = env
        .run(Command::DeselectPack {
            pack_name: "core".to_string(),
            cascade: true,
        })
        .unwrap();

    assert!(outcome.state.is_clean());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("widgets"));
}

#[test]
fn test_deselect_manual_pack_prunes_auto_selections() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    let clean_hash = env.stored_hash();
    env.select("theme");
    env.select("icons");

    let outcome = env
        .run(Command::DeselectPack {
            pack_name: "theme".to_string(),
            cascade: false,
        })
        .unwrap();

    let pending: Vec<&String> = outcome.state.pending().map(|(name, _)| name).collect();
    assert_eq!(pending, vec!["icons"]);

    env.run(Command::DeselectPack {
        pack_name: "icons".to_string(),
        cascade: false,
    })
    .unwrap();
    assert_eq!(env.stored_hash(), clean_hash);
}

#[test]
fn test_manual_dependency_survives_prune() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    env.select("core");
    env.select("widgets");

    let outcome = env
        .run(Command::DeselectPack {
            pack_name: "widgets".to_string(),
            cascade: false,
        })
        .unwrap();

    assert_eq!(outcome.state.packs["core"].action, PackAction::Install);
    assert!(outcome.state.packs["core"].is_manual());
}

#[test]
fn test_stored_hash_matches_packs() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    let init = env.run(Command::Init).unwrap();
    let selected = env.select("widgets");

    assert_ne!(init.state.hash, selected.state.hash);

    let stored = env.service.session(USER, REF).unwrap().unwrap();
    assert_eq!(stored.hash, selected.state.hash);
    assert_eq!(compute_hash(&stored), stored.hash);
    assert_eq!(stored.hash.len(), 12);
}

#[test]
fn test_commands_need_a_session() {
    let (env, _rx) = setup(sample_manifest(), &[]);

    let err = env
        .run(Command::SelectPack {
            pack_name: "core".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(env.service.session(USER, REF).unwrap().is_none());
}

#[test]
fn test_prefix_moves_untouched_titles() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    env.select("widgets");

    env.run(Command::RenamePage {
        pack_name: "widgets".to_string(),
        page_name: "Buttons".to_string(),
        title: "Push Buttons".to_string(),
    })
    .unwrap();

    let outcome = env
        .run(Command::SetPackPrefix {
            pack_name: "widgets".to_string(),
            prefix: "UI/".to_string(),
        })
        .unwrap();

    let pages = &outcome.state.packs["widgets"].pages;
    assert_eq!(pages["Gallery"].default_title, "UI/Gallery");
    assert_eq!(pages["Gallery"].final_title, "UI/Gallery");
    assert_eq!(pages["Buttons"].default_title, "UI/Buttons");
    assert_eq!(pages["Buttons"].final_title, "Push Buttons");
}

#[test]
fn test_rename_stores_title_as_given() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();

    let outcome = env
        .run(Command::RenamePage {
            pack_name: "core".to_string(),
            page_name: "Home".to_string(),
            title: "  Start Here ".to_string(),
        })
        .unwrap();
    assert_eq!(outcome.state.packs["core"].pages["Home"].final_title, "  Start Here ");
}

#[test]
fn test_rename_rejects_blank_title() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();

    let err = env
        .run(Command::RenamePage {
            pack_name: "core".to_string(),
            page_name: "Home".to_string(),
            title: "   ".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn test_existing_title_flags_conflict() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.registry.add_content_page(REF, "Home").unwrap();
    env.run(Command::Init).unwrap();

    let outcome = env.select("core");
    let page = &outcome.state.packs["core"].pages["Home"];
    assert!(page.has_conflict);
    assert_eq!(page.conflict_type, Some(ConflictType::ExistingPage));
    assert_eq!(outcome.warnings.len(), 1);

    let outcome = env
        .run(Command::RenamePage {
            pack_name: "core".to_string(),
            page_name: "Home".to_string(),
            title: "Start".to_string(),
        })
        .unwrap();
    assert!(!outcome.state.packs["core"].pages["Home"].has_conflict);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_refresh_keeps_selection_after_install_elsewhere() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.run(Command::Init).unwrap();
    env.select("widgets");
    env.select("icons");

    // Someone else installed core and icons meanwhile
    env.registry
        .record_install(REF, &InstalledPack::new("core", "1.0.0").with_page("Home", "Home"))
        .unwrap();
    env.registry
        .record_install(REF, &InstalledPack::new("icons", "2.0.0"))
        .unwrap();

    let outcome = env.run(Command::Refresh).unwrap();
    let packs = &outcome.state.packs;
    assert_eq!(packs["widgets"].action, PackAction::Install);
    assert_eq!(packs["core"].action, PackAction::Unchanged);
    assert!(packs["core"].installed);
    assert_eq!(packs["icons"].action, PackAction::Unchanged);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("icons"));
}

#[test]
fn test_raw_requests_and_clear() {
    let (env, _rx) = setup(sample_manifest(), &[]);
    env.service
        .execute(USER, REF, CommandRequest::new("init", json!({})))
        .unwrap();

    let response = env
        .service
        .execute(
            USER,
            REF,
            CommandRequest::new("set_pack_action", json!({"pack_name": "icons", "action": "install"})),
        )
        .unwrap();
    assert!(response.persist);
    assert_eq!(response.state.packs["icons"].action, PackAction::Install);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("operation_id").is_none());

    env.service
        .execute(USER, REF, CommandRequest::new("clear", json!(null)))
        .unwrap();
    assert!(env.service.session(USER, REF).unwrap().is_none());
}
