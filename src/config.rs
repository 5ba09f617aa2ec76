// src/config.rs

//! Runtime configuration for packsmith
//!
//! Read from a TOML file; every section and field has a default, so an
//! absent file or a partial one is fine.
//!
//! ```toml
//! [storage]
//! db_path = "/var/lib/packsmith/packsmith.db"
//!
//! [manifest]
//! dir = "/etc/packsmith/manifests"
//!
//! [session]
//! refresh_policy = "revalidate"
//!
//! [worker]
//! enabled = true
//! ```

use crate::command::RefreshPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the database
pub const DEFAULT_DB_PATH: &str = "/var/lib/packsmith/packsmith.db";

/// Default directory holding `<ref>.toml` / `<ref>.json` manifests
pub const DEFAULT_MANIFEST_DIR: &str = "/etc/packsmith/manifests";

/// Default location of the config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/packsmith/packsmith.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub dir: PathBuf,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_MANIFEST_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_policy: RefreshPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run queued jobs in-process
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub manifest: ManifestConfig,
    pub session: SessionConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, or from the default path when none is given
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.session.refresh_policy, RefreshPolicy::Revalidate);
        assert!(config.worker.enabled);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [session]
            refresh_policy = "rebuild"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.refresh_policy, RefreshPolicy::Rebuild);
        assert_eq!(config.manifest.dir, PathBuf::from(DEFAULT_MANIFEST_DIR));
    }

    #[test]
    fn test_invalid_policy() {
        let err = Config::from_toml_str("[session]\nrefresh_policy = \"never\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml");
        assert_eq!(Config::load(Some(&missing)).unwrap(), Config::default());

        let path = dir.path().join("packsmith.toml");
        std::fs::write(&path, "[storage]\ndb_path = \"/tmp/p.db\"\n[worker]\nenabled = false\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/p.db"));
        assert!(!config.worker.enabled);
    }
}
