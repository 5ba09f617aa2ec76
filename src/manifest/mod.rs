// src/manifest/mod.rs

//! Pack manifests
//!
//! A manifest declares every pack available for a ref: its version, the
//! packs it depends on, the pages it ships and an optional title prefix.
//! Manifests are read-only for the lifetime of a session.
//!
//! # Example manifest.toml
//!
//! ```toml
//! [packs.base]
//! version = "1.2.0"
//! pages = ["Main", "Style"]
//! prefix = "Base:"
//!
//! [packs.forms]
//! version = "2.0.1"
//! depends_on = ["base"]
//! pages = ["Form", "Field"]
//! ```

use crate::error::{Error, Result};
use crate::version::PackVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A pack declaration in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackDefinition {
    /// Version offered by the manifest
    pub version: String,

    /// Names of packs this pack requires
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Page names shipped by this pack
    #[serde(default)]
    pub pages: Vec<String>,

    /// Title prefix applied to every page (defaults to none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl PackDefinition {
    /// Create a pack definition with no dependencies and no pages
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            depends_on: Vec::new(),
            pages: Vec::new(),
            prefix: None,
        }
    }

    /// Set the dependency list
    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the page list
    pub fn with_pages<I, S>(mut self, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pages = pages.into_iter().map(Into::into).collect();
        self
    }

    /// Set the title prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// The declarative description of every pack available for a ref
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub packs: BTreeMap<String, PackDefinition>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pack (builder style)
    pub fn with_pack(mut self, name: impl Into<String>, pack: PackDefinition) -> Self {
        self.packs.insert(name.into(), pack);
        self
    }

    /// Parse a TOML manifest
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|e| Error::ManifestParse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a JSON manifest
    pub fn from_json_str(content: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(content).map_err(|e| Error::ManifestParse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest file, choosing the format by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!("Loading manifest from {}", path.display());

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            other => Err(Error::ManifestParse(format!(
                "Unsupported manifest extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Look up a pack definition
    pub fn get(&self, name: &str) -> Option<&PackDefinition> {
        self.packs.get(name)
    }

    /// Check if a pack is declared
    pub fn contains(&self, name: &str) -> bool {
        self.packs.contains_key(name)
    }

    /// Declared dependencies of a pack (empty for unknown packs)
    pub fn depends_on(&self, name: &str) -> &[String] {
        self.packs
            .get(name)
            .map(|p| p.depends_on.as_slice())
            .unwrap_or_default()
    }

    /// Validate versions and dependency references
    ///
    /// Unparseable versions and self-dependencies are errors. Dependencies on
    /// packs the manifest does not declare are only logged: they surface as
    /// unmet dependencies when a batch is validated.
    pub fn validate(&self) -> Result<()> {
        for (name, pack) in &self.packs {
            if name.trim().is_empty() {
                return Err(Error::ManifestParse("Pack with empty name".to_string()));
            }

            PackVersion::parse(&pack.version).map_err(|e| {
                Error::ManifestParse(format!("Pack '{}' has invalid version: {}", name, e))
            })?;

            for dep in &pack.depends_on {
                if dep == name {
                    return Err(Error::ManifestParse(format!(
                        "Pack '{}' depends on itself",
                        name
                    )));
                }
                if !self.packs.contains_key(dep) {
                    warn!("Pack '{}' depends on undeclared pack '{}'", name, dep);
                }
            }
        }
        Ok(())
    }
}

/// Source of manifests, one per ref
pub trait ManifestSource: Send + Sync {
    /// Fetch the manifest for a ref
    fn manifest(&self, ref_id: &str) -> Result<Manifest>;
}

/// Serves the same manifest for every ref
#[derive(Debug, Clone)]
pub struct StaticManifestSource {
    manifest: Manifest,
}

impl StaticManifestSource {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }
}

impl ManifestSource for StaticManifestSource {
    fn manifest(&self, _ref_id: &str) -> Result<Manifest> {
        Ok(self.manifest.clone())
    }
}

/// Reads `<ref>.toml` or `<ref>.json` from a directory
///
/// Slashes in ref names (e.g. `release/2024`) map to underscores.
#[derive(Debug, Clone)]
pub struct FileManifestSource {
    dir: PathBuf,
}

impl FileManifestSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn file_stem(ref_id: &str) -> Result<String> {
        if ref_id.is_empty() || ref_id.contains("..") || ref_id.contains('\\') {
            return Err(Error::InvalidArgument(format!("Invalid ref name '{}'", ref_id)));
        }
        Ok(ref_id.replace('/', "_"))
    }
}

impl ManifestSource for FileManifestSource {
    fn manifest(&self, ref_id: &str) -> Result<Manifest> {
        let stem = Self::file_stem(ref_id)?;

        for ext in ["toml", "json"] {
            let path = self.dir.join(format!("{}.{}", stem, ext));
            if path.exists() {
                return Manifest::load(&path);
            }
        }

        Err(Error::InvalidArgument(format!(
            "No manifest for ref '{}' in {}",
            ref_id,
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[packs.base]
version = "1.2.0"
pages = ["Main", "Style"]
prefix = "Base:"

[packs.forms]
version = "2.0.1"
depends_on = ["base"]
pages = ["Form"]
"#;

    #[test]
    fn test_parse_toml() {
        let manifest = Manifest::from_toml_str(SAMPLE).unwrap();
        assert_eq!(manifest.packs.len(), 2);

        let forms = manifest.get("forms").unwrap();
        assert_eq!(forms.version, "2.0.1");
        assert_eq!(forms.depends_on, vec!["base"]);
        assert_eq!(forms.prefix, None);
        assert_eq!(manifest.depends_on("forms"), ["base".to_string()]);
        assert!(manifest.depends_on("missing").is_empty());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"packs": {"base": {"version": "1.0", "pages": ["A"]}}}"#;
        let manifest = Manifest::from_json_str(json).unwrap();
        assert!(manifest.contains("base"));
        assert!(manifest.get("base").unwrap().depends_on.is_empty());
    }

    #[test]
    fn test_rejects_self_dependency() {
        let manifest = Manifest::new()
            .with_pack("loop", PackDefinition::new("1.0").with_depends_on(["loop"]));
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_version() {
        let toml = "[packs.bad]\nversion = \"latest\"\n";
        assert!(matches!(
            Manifest::from_toml_str(toml),
            Err(Error::ManifestParse(_))
        ));
    }

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("release_2024.toml"), SAMPLE).unwrap();

        let source = FileManifestSource::new(dir.path());
        let manifest = source.manifest("release/2024").unwrap();
        assert!(manifest.contains("base"));

        assert!(source.manifest("missing").is_err());
        assert!(source.manifest("../etc").is_err());
    }
}
