// src/resolver/graph.rs

//! Pack dependency graph and session propagation
//!
//! Dependencies are expressed by name: forward edges come from each pack's
//! manifest `depends_on`, reverse edges are derived from them. Closures are
//! memoized per node and cycles terminate through visited sets.

use crate::manifest::Manifest;
use crate::session::{PackAction, SessionState};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tracing::debug;

/// Name-keyed adjacency over a manifest
#[derive(Debug)]
pub struct DependencyGraph {
    /// Map from pack name to the packs it depends on
    edges: HashMap<String, Vec<String>>,
    /// Map from pack name to packs that depend on it (reverse edges)
    reverse_edges: HashMap<String, Vec<String>>,
    /// Completed transitive closures, keyed by root
    closures: RefCell<HashMap<String, Rc<BTreeSet<String>>>>,
}

impl DependencyGraph {
    /// Build the graph from every pack the manifest declares
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();

        for (name, def) in &manifest.packs {
            edges.insert(name.clone(), def.depends_on.clone());
            for dep in &def.depends_on {
                reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        Self {
            edges,
            reverse_edges,
            closures: RefCell::new(HashMap::new()),
        }
    }

    /// Direct dependencies of a pack
    pub fn get_dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packs that directly depend on this pack
    pub fn get_dependents(&self, name: &str) -> &[String] {
        self.reverse_edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Everything `root` transitively depends on
    ///
    /// The root itself is only included when it sits on a cycle.
    pub fn closure_of(&self, root: &str) -> Rc<BTreeSet<String>> {
        if let Some(cached) = self.closures.borrow().get(root) {
            return Rc::clone(cached);
        }

        let mut result = BTreeSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.get_dependencies(root).iter().map(String::as_str).collect();

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            result.insert(name.to_string());

            // A finished closure for this node covers its whole subtree
            let cached = self.closures.borrow().get(name).cloned();
            match cached {
                Some(sub) => result.extend(sub.iter().cloned()),
                None => queue.extend(self.get_dependencies(name).iter().map(String::as_str)),
            }
        }

        let result = Rc::new(result);
        self.closures
            .borrow_mut()
            .insert(root.to_string(), Rc::clone(&result));
        result
    }

    /// Order `names` so each pack comes after the packs it depends on
    ///
    /// Only edges between the given names count. Ties fall back to name
    /// order, and a cycle is broken where the walk first re-enters it.
    pub fn dependency_order(&self, names: &[String]) -> Vec<String> {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(wanted.len());
        for name in &wanted {
            self.visit_in_order(name, &wanted, &mut visited, &mut order);
        }
        order
    }

    fn visit_in_order(
        &self,
        name: &str,
        wanted: &BTreeSet<&str>,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }
        for dep in self.get_dependencies(name) {
            if wanted.contains(dep.as_str()) {
                self.visit_in_order(dep, wanted, visited, order);
            }
        }
        order.push(name.to_string());
    }

    /// Union of the closures of every root
    pub fn closure(&self, roots: &[String]) -> BTreeSet<String> {
        let mut all = BTreeSet::new();
        for root in roots {
            all.extend(self.closure_of(root).iter().cloned());
        }
        all
    }
}

/// Transitive dependency closure of a set of packs
pub fn dependency_closure(manifest: &Manifest, roots: &[String]) -> BTreeSet<String> {
    DependencyGraph::from_manifest(manifest).closure(roots)
}

/// Auto-select the dependencies `pack_name` needs
///
/// Each dependency that is unchanged or auto-actioned gets the action that
/// brings it to its manifest version, tagged `Required by {pack_name}`.
/// Manually actioned dependencies are left alone, as are dependencies the
/// session does not know about. Returns the names whose action was set.
pub fn propagate(state: &mut SessionState, manifest: &Manifest, pack_name: &str) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut changed = Vec::new();
    propagate_from(state, manifest, pack_name, &mut visited, &mut changed);
    changed
}

fn propagate_from(
    state: &mut SessionState,
    manifest: &Manifest,
    pack_name: &str,
    visited: &mut HashSet<String>,
    changed: &mut Vec<String>,
) {
    if !visited.insert(pack_name.to_string()) {
        return;
    }

    let deps = manifest.depends_on(pack_name).to_vec();
    for dep in deps {
        let Some(dep_state) = state.packs.get_mut(&dep) else {
            debug!("Dependency {} of {} is not in the session", dep, pack_name);
            continue;
        };
        if dep_state.is_manual() {
            continue;
        }

        let needed = dep_state.needed_action();
        if needed.is_pending() {
            dep_state.set_auto(needed, format!("Required by {}", pack_name));
            debug!("Auto-selected {} ({}) for {}", dep, needed, pack_name);
            changed.push(dep.clone());
        }

        // Installed deps may still have unmet dependencies of their own
        propagate_from(state, manifest, &dep, visited, changed);
    }
}

/// Pending packs whose manifest dependencies include `pack_name`, sorted
///
/// Packs pending removal are not counted; they no longer need anything.
pub fn find_dependents(state: &SessionState, manifest: &Manifest, pack_name: &str) -> Vec<String> {
    let graph = DependencyGraph::from_manifest(manifest);
    let mut dependents: Vec<String> = graph
        .get_dependents(pack_name)
        .iter()
        .filter(|name| {
            state
                .packs
                .get(name.as_str())
                .is_some_and(|pack| pack.action.is_pending() && keeps_pack(pack.action))
        })
        .cloned()
        .collect();
    dependents.sort();
    dependents.dedup();
    dependents
}

/// Reset auto-actioned packs no manual selection still needs
///
/// The closure is taken over manually installed or updated packs only; a
/// manual removal needs nothing. Returns the names that were reset.
pub fn prune_unneeded_auto_actions(state: &mut SessionState, manifest: &Manifest) -> Vec<String> {
    let roots: Vec<String> = state
        .packs
        .iter()
        .filter(|(_, p)| p.is_manual() && p.action.writes_pages())
        .map(|(name, _)| name.clone())
        .collect();
    let needed = dependency_closure(manifest, &roots);

    let mut pruned = Vec::new();
    for (name, pack) in state.packs.iter_mut() {
        if pack.is_auto() && !needed.contains(name) {
            pack.reset();
            pruned.push(name.clone());
        }
    }

    if !pruned.is_empty() {
        debug!("Pruned stale auto-selections: {}", pruned.join(", "));
    }
    pruned
}

/// Whether an action leaves a dependency in place for its dependents
fn keeps_pack(action: PackAction) -> bool {
    action != PackAction::Remove
}
