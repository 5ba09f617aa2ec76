// src/version/mod.rs

//! Version handling for content packs
//!
//! Pack versions are dotted numeric strings, optionally followed by a
//! `-release` suffix and optionally prefixed with `v`. They are normalized to
//! `semver::Version`, whose major component decides whether an update stays
//! within a compatible series.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;

/// A parsed pack version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackVersion {
    /// The version as written in the manifest or registry
    pub raw: String,
    /// Dotted version component (without release)
    pub version: String,
    /// Optional release suffix after the first dash
    pub release: Option<String>,
}

impl PackVersion {
    /// Parse a pack version string
    ///
    /// Format: [v]version[-release]
    /// Examples:
    /// - "1.2.3" → version="1.2.3", release=None
    /// - "v2.0" → version="2.0", release=None
    /// - "1.4.0-beta.1" → version="1.4.0", release=Some("beta.1")
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        let rest = raw.strip_prefix('v').unwrap_or(raw);

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        let parsed = Self {
            raw: raw.to_string(),
            version,
            release,
        };

        // Reject versions whose major component is not numeric
        parsed.major()?;
        Ok(parsed)
    }

    /// Major version component
    pub fn major(&self) -> Result<u64> {
        let first = self.version.split('.').next().unwrap_or_default();
        first.parse::<u64>().map_err(|_| {
            Error::InvalidArgument(format!(
                "Version '{}' has a non-numeric major component",
                self.raw
            ))
        })
    }

    /// Convert to a semver::Version for comparison
    ///
    /// Missing minor/patch components default to zero; non-numeric
    /// components past the major are treated as zero.
    fn to_semver(&self) -> Version {
        if let Ok(v) = Version::parse(&self.version) {
            return v;
        }

        let parts: Vec<&str> = self.version.split('.').collect();
        let major = parts.first().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let minor = parts.get(1).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let patch = parts.get(2).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);

        Version::new(major, minor, patch)
    }
}

impl fmt::Display for PackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Check whether moving from `from` to `to` crosses a major version
///
/// Minor and patch changes (in either direction) are always compatible.
pub fn is_major_change(from: &str, to: &str) -> Result<bool> {
    let from = PackVersion::parse(from)?;
    let to = PackVersion::parse(to)?;
    Ok(from.to_semver().major != to.to_semver().major)
}
