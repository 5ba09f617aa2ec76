// src/resolver/mod.rs

//! Dependency resolution and conflict detection
//!
//! Propagation of auto-selected dependencies, dependent lookup, pruning of
//! stale auto-selections, and page title conflict detection.

pub mod conflict;
pub mod graph;

pub use conflict::{TitleConflict, TitleOracle, conflict_warnings, detect_conflicts};
pub use graph::{
    DependencyGraph, dependency_closure, find_dependents, propagate, prune_unneeded_auto_actions,
};
