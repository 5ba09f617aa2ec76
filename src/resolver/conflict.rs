// src/resolver/conflict.rs

//! Page title conflict detection
//!
//! Pages about to be written are checked against the content store and
//! against each other. Conflicts annotate the session and produce warnings;
//! they never fail a command.

use crate::error::Result;
use crate::session::{ConflictType, SessionState};
use std::collections::HashMap;
use tracing::warn;

/// Answers whether a page title already exists in a ref's content store
pub trait TitleOracle: Send + Sync {
    fn exists(&self, ref_id: &str, title: &str) -> Result<bool>;
}

/// A title collision found during detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleConflict {
    /// The title is already taken in the content store
    ExistingPage {
        pack: String,
        page: String,
        title: String,
    },
    /// An earlier page in the same selection uses the title
    DuplicateInSelection {
        pack: String,
        page: String,
        title: String,
        first_pack: String,
        first_page: String,
    },
}

impl TitleConflict {
    pub fn conflict_type(&self) -> ConflictType {
        match self {
            TitleConflict::ExistingPage { .. } => ConflictType::ExistingPage,
            TitleConflict::DuplicateInSelection { .. } => ConflictType::DuplicateInSelection,
        }
    }
}

impl std::fmt::Display for TitleConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TitleConflict::ExistingPage { pack, page, title } => write!(
                f,
                "Page '{}' of pack '{}' would overwrite existing page '{}'",
                page, pack, title
            ),
            TitleConflict::DuplicateInSelection {
                pack,
                page,
                title,
                first_pack,
                first_page,
            } => write!(
                f,
                "Page '{}' of pack '{}' has title '{}', already used by page '{}' of pack '{}'",
                page, pack, title, first_page, first_pack
            ),
        }
    }
}

/// Re-flag every page and return the conflicts found
///
/// All page flags are cleared first. Only packs being installed or updated
/// that are not already installed are checked, in pack-then-page order.
/// A page that hits both checks is flagged with the first one.
pub fn detect_conflicts(state: &mut SessionState, oracle: &dyn TitleOracle) -> Vec<TitleConflict> {
    let ref_id = state.ref_id.clone();
    let mut conflicts = Vec::new();
    let mut seen: HashMap<String, (String, String)> = HashMap::new();

    for (pack_name, pack) in state.packs.iter_mut() {
        for page in pack.pages.values_mut() {
            page.clear_conflict();
        }

        if !pack.action.writes_pages() || pack.installed {
            continue;
        }

        for (page_name, page) in pack.pages.iter_mut() {
            if page.final_title.is_empty() {
                continue;
            }
            let title = page.final_title.clone();

            let exists = match oracle.exists(&ref_id, &title) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Title lookup failed for '{}': {}", title, e);
                    false
                }
            };
            if exists {
                conflicts.push(TitleConflict::ExistingPage {
                    pack: pack_name.clone(),
                    page: page_name.clone(),
                    title: title.clone(),
                });
                page.mark_conflict(ConflictType::ExistingPage);
            }

            match seen.get(&title) {
                Some((first_pack, first_page)) => {
                    conflicts.push(TitleConflict::DuplicateInSelection {
                        pack: pack_name.clone(),
                        page: page_name.clone(),
                        title: title.clone(),
                        first_pack: first_pack.clone(),
                        first_page: first_page.clone(),
                    });
                    if !page.has_conflict {
                        page.mark_conflict(ConflictType::DuplicateInSelection);
                    }
                }
                None => {
                    seen.insert(title, (pack_name.clone(), page_name.clone()));
                }
            }
        }
    }

    conflicts
}

/// Human-readable warnings for a set of conflicts
pub fn conflict_warnings(conflicts: &[TitleConflict]) -> Vec<String> {
    conflicts.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::manifest::{Manifest, PackDefinition};
    use crate::registry::StaticRegistry;
    use crate::session::PackAction;

    struct FailingOracle;

    impl TitleOracle for FailingOracle {
        fn exists(&self, _ref_id: &str, _title: &str) -> Result<bool> {
            Err(Error::InvalidState("store offline".to_string()))
        }
    }

    fn manifest() -> Manifest {
        Manifest::new()
            .with_pack("docs", PackDefinition::new("1.0").with_pages(["Intro", "Usage"]).with_prefix("Help:"))
            .with_pack("more", PackDefinition::new("1.0").with_pages(["Intro"]).with_prefix("Help:"))
    }

    fn selected(names: &[&str]) -> SessionState {
        let mut state = SessionState::baseline("u", "main", &manifest(), &[]);
        for name in names {
            state.pack_mut(name).unwrap().set_manual(PackAction::Install);
        }
        state
    }

    #[test]
    fn test_existing_page() {
        let oracle = StaticRegistry::new();
        oracle.add_title("Help:Usage");
        let mut state = selected(&["docs"]);

        let conflicts = detect_conflicts(&mut state, &oracle);
        assert_eq!(conflicts.len(), 1);
        let usage = &state.packs["docs"].pages["Usage"];
        assert!(usage.has_conflict);
        assert_eq!(usage.conflict_type, Some(ConflictType::ExistingPage));
        assert!(!state.packs["docs"].pages["Intro"].has_conflict);
        assert!(conflict_warnings(&conflicts)[0].contains("Help:Usage"));
    }

    #[test]
    fn test_duplicate_in_selection() {
        let oracle = StaticRegistry::new();
        let mut state = selected(&["docs", "more"]);

        let conflicts = detect_conflicts(&mut state, &oracle);
        assert_eq!(
            conflicts,
            vec![TitleConflict::DuplicateInSelection {
                pack: "more".to_string(),
                page: "Intro".to_string(),
                title: "Help:Intro".to_string(),
                first_pack: "docs".to_string(),
                first_page: "Intro".to_string(),
            }]
        );
        assert!(!state.packs["docs"].pages["Intro"].has_conflict);
        assert_eq!(
            state.packs["more"].pages["Intro"].conflict_type,
            Some(ConflictType::DuplicateInSelection)
        );
    }

    #[test]
    fn test_flags_reset_between_passes() {
        let oracle = StaticRegistry::new();
        let mut state = selected(&["docs", "more"]);
        detect_conflicts(&mut state, &oracle);

        state.pack_mut("more").unwrap().reset();
        let conflicts = detect_conflicts(&mut state, &oracle);
        assert!(conflicts.is_empty());
        assert!(!state.packs["more"].pages["Intro"].has_conflict);
        assert_eq!(state.packs["more"].pages["Intro"].conflict_type, None);
    }

    #[test]
    fn test_oracle_errors_are_not_conflicts() {
        let mut state = selected(&["docs"]);
        assert!(detect_conflicts(&mut state, &FailingOracle).is_empty());
    }

    #[test]
    fn test_installed_pack_skipped() {
        let oracle = StaticRegistry::new();
        oracle.add_title("Help:Intro");
        let mut state = selected(&["docs"]);
        state.pack_mut("docs").unwrap().installed = true;
        assert!(detect_conflicts(&mut state, &oracle).is_empty());
    }
}
