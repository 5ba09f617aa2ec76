// src/validation/mod.rs

//! Pre-flight checks for a batch of pack operations
//!
//! Each check is independent and reports what it found without failing.
//! [`ValidationReport::into_result`] turns the findings into the error a
//! caller sees, so any finding aborts the batch before a job is queued.

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::operation::PackOperation;
use crate::registry::InstalledPack;
use crate::version::is_major_change;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// Pack name to the names that block it (or that it is missing)
pub type PackNameMap = BTreeMap<String, Vec<String>>;

/// A dependency rule that a command or batch would break
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyViolation {
    /// Packs selected in the session still depend on `pack`
    Dependents { pack: String, dependents: Vec<String> },
    /// Packs to install or update whose dependencies would be missing
    Unmet { missing: PackNameMap },
    /// Packs to remove that installed packs still depend on
    BlockingRemoval { blocked: PackNameMap },
    /// Packs to update whose installed dependents are not updated with them
    BlockingUpdate { blocked: PackNameMap },
}

fn write_map(f: &mut fmt::Formatter<'_>, map: &PackNameMap, verb: &str) -> fmt::Result {
    let parts: Vec<String> = map
        .iter()
        .map(|(pack, names)| format!("{} {} {}", pack, verb, names.join(", ")))
        .collect();
    f.write_str(&parts.join("; "))
}

impl fmt::Display for DependencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyViolation::Dependents { pack, dependents } => write!(
                f,
                "{} is required by selected packs: {}",
                pack,
                dependents.join(", ")
            ),
            DependencyViolation::Unmet { missing } => {
                f.write_str("unmet dependencies: ")?;
                write_map(f, missing, "needs")
            }
            DependencyViolation::BlockingRemoval { blocked } => {
                f.write_str("cannot remove: ")?;
                write_map(f, blocked, "is required by")
            }
            DependencyViolation::BlockingUpdate { blocked } => {
                f.write_str("cannot update: ")?;
                write_map(f, blocked, "has installed dependents")
            }
        }
    }
}

/// A rejected major version change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub pack_name: String,
    pub from: String,
    pub to: String,
}

impl fmt::Display for VersionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cannot move from {} to {} (major version change)",
            self.pack_name, self.from, self.to
        )
    }
}

/// Names in a batch grouped by step kind
#[derive(Debug, Clone, Default)]
pub struct OperationBatch<'a> {
    pub operations: &'a [PackOperation],
    installs: BTreeSet<&'a str>,
    updates: BTreeSet<&'a str>,
    removes: BTreeSet<&'a str>,
}

impl<'a> OperationBatch<'a> {
    pub fn new(operations: &'a [PackOperation]) -> Self {
        let mut batch = Self {
            operations,
            ..Self::default()
        };
        for op in operations {
            let name = op.pack_name();
            match op {
                PackOperation::Install { .. } => batch.installs.insert(name),
                PackOperation::Update { .. } => batch.updates.insert(name),
                PackOperation::Remove { .. } => batch.removes.insert(name),
            };
        }
        batch
    }

    fn is_written(&self, name: &str) -> bool {
        self.installs.contains(name) || self.updates.contains(name)
    }

    fn is_removed(&self, name: &str) -> bool {
        self.removes.contains(name)
    }
}

/// Dependencies of packs being installed or updated that will be missing
///
/// A dependency is satisfied when it is installed or updated in the same
/// batch, or already installed and not being removed.
pub fn unmet_dependencies(
    batch: &OperationBatch<'_>,
    manifest: &Manifest,
    installed: &[InstalledPack],
) -> PackNameMap {
    let installed_names: BTreeSet<&str> = installed.iter().map(|p| p.name.as_str()).collect();
    let mut unmet = PackNameMap::new();

    for op in batch.operations {
        let deps: &[String] = match op {
            PackOperation::Install { depends_on, .. } | PackOperation::Update { depends_on, .. } => {
                if depends_on.is_empty() {
                    manifest.depends_on(op.pack_name())
                } else {
                    depends_on
                }
            }
            PackOperation::Remove { .. } => continue,
        };

        let missing: Vec<String> = deps
            .iter()
            .filter(|dep| {
                let in_batch = batch.is_written(dep);
                let present = installed_names.contains(dep.as_str()) && !batch.is_removed(dep);
                !in_batch && !present
            })
            .cloned()
            .collect();

        if !missing.is_empty() {
            unmet.insert(op.pack_name().to_string(), missing);
        }
    }

    unmet
}

/// Installed dependents that would be left without a removed pack
pub fn blocking_removal(batch: &OperationBatch<'_>, installed: &[InstalledPack]) -> PackNameMap {
    let mut blocked = PackNameMap::new();

    for name in &batch.removes {
        let dependents: Vec<String> = installed
            .iter()
            .filter(|p| p.depends_on.iter().any(|d| d == name))
            .filter(|p| !batch.is_removed(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !dependents.is_empty() {
            blocked.insert(name.to_string(), dependents);
        }
    }

    blocked
}

/// Installed dependents left behind by an update of their dependency
pub fn blocking_update(batch: &OperationBatch<'_>, installed: &[InstalledPack]) -> PackNameMap {
    let mut blocked = PackNameMap::new();

    for name in &batch.updates {
        let dependents: Vec<String> = installed
            .iter()
            .filter(|p| p.depends_on.iter().any(|d| d == name))
            .filter(|p| !batch.updates.contains(p.name.as_str()) && !batch.is_removed(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !dependents.is_empty() {
            blocked.insert(name.to_string(), dependents);
        }
    }

    blocked
}

/// Updates that cross a major version
pub fn version_compatibility(batch: &OperationBatch<'_>) -> Result<Vec<VersionChange>> {
    let mut changes = Vec::new();

    for op in batch.operations {
        if let PackOperation::Update {
            pack_name,
            current_version,
            target_version,
            ..
        } = op
        {
            if is_major_change(current_version, target_version)? {
                changes.push(VersionChange {
                    pack_name: pack_name.clone(),
                    from: current_version.clone(),
                    to: target_version.clone(),
                });
            }
        }
    }

    Ok(changes)
}

/// Findings of every check over one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub unmet: PackNameMap,
    pub blocking_removal: PackNameMap,
    pub blocking_update: PackNameMap,
    pub version_changes: Vec<VersionChange>,
}

impl ValidationReport {
    /// Run every check
    pub fn run(
        operations: &[PackOperation],
        manifest: &Manifest,
        installed: &[InstalledPack],
    ) -> Result<Self> {
        let batch = OperationBatch::new(operations);
        let report = Self {
            unmet: unmet_dependencies(&batch, manifest, installed),
            blocking_removal: blocking_removal(&batch, installed),
            blocking_update: blocking_update(&batch, installed),
            version_changes: version_compatibility(&batch)?,
        };
        debug!(
            "Validated {} operations: {}",
            operations.len(),
            if report.is_clean() { "clean" } else { "rejected" }
        );
        Ok(report)
    }

    pub fn is_clean(&self) -> bool {
        self.unmet.is_empty()
            && self.blocking_removal.is_empty()
            && self.blocking_update.is_empty()
            && self.version_changes.is_empty()
    }

    /// The first failing check as an error; dependency errors come first
    pub fn into_result(self) -> Result<()> {
        for (pack, missing) in &self.unmet {
            warn!("{} has unmet dependencies: {}", pack, missing.join(", "));
        }
        for (pack, dependents) in &self.blocking_removal {
            warn!("Removal of {} blocked by {}", pack, dependents.join(", "));
        }
        for (pack, dependents) in &self.blocking_update {
            warn!("Update of {} blocked by {}", pack, dependents.join(", "));
        }
        for change in &self.version_changes {
            warn!("{}", change);
        }

        if !self.unmet.is_empty() {
            return Err(Error::Dependency(DependencyViolation::Unmet { missing: self.unmet }));
        }
        if !self.blocking_removal.is_empty() {
            return Err(Error::Dependency(DependencyViolation::BlockingRemoval {
                blocked: self.blocking_removal,
            }));
        }
        if !self.blocking_update.is_empty() {
            return Err(Error::Dependency(DependencyViolation::BlockingUpdate {
                blocked: self.blocking_update,
            }));
        }
        if !self.version_changes.is_empty() {
            return Err(Error::VersionCompatibility(self.version_changes));
        }
        Ok(())
    }
}

/// Run every check and fail on the first finding
pub fn validate(
    operations: &[PackOperation],
    manifest: &Manifest,
    installed: &[InstalledPack],
) -> Result<()> {
    ValidationReport::run(operations, manifest, installed)?.into_result()
}
