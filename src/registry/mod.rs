// src/registry/mod.rs

//! Installed-pack registry and content-store title lookups
//!
//! The registry answers two questions for a ref: which packs are installed
//! (with their recorded dependencies and page titles), and whether a page
//! title already exists in the content store. `SqliteRegistry` keeps both in
//! the packsmith database; `StaticRegistry` holds them in memory for
//! embedding and tests.

use crate::db;
use crate::error::{Error, Result};
use crate::resolver::TitleOracle;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// A page recorded for an installed pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPage {
    pub name: String,
    pub final_title: String,
}

/// A pack currently installed in a ref
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPack {
    pub name: String,
    pub version: String,
    /// Dependencies recorded at install time
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub pages: Vec<InstalledPage>,
}

impl InstalledPack {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            depends_on: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page(mut self, name: impl Into<String>, final_title: impl Into<String>) -> Self {
        self.pages.push(InstalledPage {
            name: name.into(),
            final_title: final_title.into(),
        });
        self
    }
}

/// Read access to what is installed in a ref
pub trait InstalledRegistry: Send + Sync {
    /// All installed packs for a ref, sorted by name
    fn list_installed(&self, ref_id: &str) -> Result<Vec<InstalledPack>>;

    /// Registry identifier of an installed pack
    fn pack_id_by_name(&self, ref_id: &str, name: &str) -> Result<Option<i64>>;
}

/// Write access used when jobs complete
pub trait RegistryWriter: Send + Sync {
    /// Record (or replace) an installed pack with its pages and dependencies
    fn record_install(&self, ref_id: &str, pack: &InstalledPack) -> Result<i64>;

    /// Forget an installed pack; returns false if it was not installed
    fn record_remove(&self, ref_id: &str, name: &str) -> Result<bool>;
}

/// SQLite-backed registry
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    db_path: PathBuf,
}

impl SqliteRegistry {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Register a title that exists in the content store outside any pack
    pub fn add_content_page(&self, ref_id: &str, title: &str) -> Result<()> {
        let conn = db::open(&self.db_path)?;
        conn.execute(
            "INSERT OR IGNORE INTO content_pages (ref_id, title) VALUES (?1, ?2)",
            params![ref_id, title],
        )?;
        Ok(())
    }
}

impl InstalledRegistry for SqliteRegistry {
    fn list_installed(&self, ref_id: &str) -> Result<Vec<InstalledPack>> {
        let conn = db::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, name, version FROM installed_packs WHERE ref_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([ref_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut deps_stmt = conn.prepare(
            "SELECT depends_on FROM installed_pack_deps WHERE pack_id = ?1 ORDER BY depends_on",
        )?;
        let mut pages_stmt = conn.prepare(
            "SELECT name, final_title FROM installed_pages WHERE pack_id = ?1 ORDER BY name",
        )?;

        let mut packs = Vec::with_capacity(rows.len());
        for (id, name, version) in rows {
            let depends_on = deps_stmt
                .query_map([id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let pages = pages_stmt
                .query_map([id], |row| {
                    Ok(InstalledPage {
                        name: row.get(0)?,
                        final_title: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            packs.push(InstalledPack {
                name,
                version,
                depends_on,
                pages,
            });
        }

        Ok(packs)
    }

    fn pack_id_by_name(&self, ref_id: &str, name: &str) -> Result<Option<i64>> {
        let conn = db::open(&self.db_path)?;
        let id = conn
            .query_row(
                "SELECT id FROM installed_packs WHERE ref_id = ?1 AND name = ?2",
                params![ref_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl RegistryWriter for SqliteRegistry {
    fn record_install(&self, ref_id: &str, pack: &InstalledPack) -> Result<i64> {
        let mut conn = db::open(&self.db_path)?;

        db::transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO installed_packs (ref_id, name, version) VALUES (?1, ?2, ?3)
                 ON CONFLICT(ref_id, name) DO UPDATE SET version = excluded.version,
                 installed_at = CURRENT_TIMESTAMP",
                params![ref_id, &pack.name, &pack.version],
            )?;

            let pack_id: i64 = tx.query_row(
                "SELECT id FROM installed_packs WHERE ref_id = ?1 AND name = ?2",
                params![ref_id, &pack.name],
                |row| row.get(0),
            )?;

            tx.execute("DELETE FROM installed_pack_deps WHERE pack_id = ?1", [pack_id])?;
            tx.execute("DELETE FROM installed_pages WHERE pack_id = ?1", [pack_id])?;

            for dep in &pack.depends_on {
                tx.execute(
                    "INSERT OR IGNORE INTO installed_pack_deps (pack_id, depends_on) VALUES (?1, ?2)",
                    params![pack_id, dep],
                )?;
            }
            for page in &pack.pages {
                tx.execute(
                    "INSERT INTO installed_pages (pack_id, name, final_title) VALUES (?1, ?2, ?3)",
                    params![pack_id, &page.name, &page.final_title],
                )?;
            }

            debug!("Recorded {} {} in ref {}", pack.name, pack.version, ref_id);
            Ok(pack_id)
        })
    }

    fn record_remove(&self, ref_id: &str, name: &str) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let rows = conn.execute(
            "DELETE FROM installed_packs WHERE ref_id = ?1 AND name = ?2",
            params![ref_id, name],
        )?;
        Ok(rows > 0)
    }
}

impl TitleOracle for SqliteRegistry {
    fn exists(&self, ref_id: &str, title: &str) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_pages WHERE ref_id = ?1 AND title = ?2)
                 OR EXISTS(SELECT 1 FROM installed_pages pg
                           JOIN installed_packs pk ON pk.id = pg.pack_id
                           WHERE pk.ref_id = ?1 AND pg.final_title = ?2)",
            params![ref_id, title],
            |row| row.get(0),
        )?;
        Ok(found)
    }
}

/// In-memory registry (single ref view shared by all refs)
///
/// Ids are handed out on first insert and never reused, like row ids.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    packs: RwLock<BTreeMap<String, (i64, InstalledPack)>>,
    titles: RwLock<BTreeSet<String>>,
    last_id: AtomicI64,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of installed packs
    pub fn with_installed(packs: Vec<InstalledPack>) -> Self {
        let registry = Self::new();
        for pack in packs {
            registry.insert(pack);
        }
        registry
    }

    /// Add or replace an installed pack, returning its id
    ///
    /// Replacing a pack keeps the id it was first given.
    pub fn insert(&self, pack: InstalledPack) -> Option<i64> {
        let mut packs = self.packs.write().ok()?;
        let id = match packs.get(&pack.name) {
            Some((id, _)) => *id,
            None => self.last_id.fetch_add(1, Ordering::Relaxed) + 1,
        };
        packs.insert(pack.name.clone(), (id, pack));
        Some(id)
    }

    /// Remove an installed pack
    pub fn remove(&self, name: &str) -> bool {
        self.packs
            .write()
            .map(|mut packs| packs.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Register a title that exists in the content store
    pub fn add_title(&self, title: impl Into<String>) {
        if let Ok(mut titles) = self.titles.write() {
            titles.insert(title.into());
        }
    }
}

impl InstalledRegistry for StaticRegistry {
    fn list_installed(&self, _ref_id: &str) -> Result<Vec<InstalledPack>> {
        Ok(self
            .packs
            .read()
            .map(|packs| packs.values().map(|(_, pack)| pack.clone()).collect())
            .unwrap_or_default())
    }

    fn pack_id_by_name(&self, _ref_id: &str, name: &str) -> Result<Option<i64>> {
        Ok(self
            .packs
            .read()
            .ok()
            .and_then(|packs| packs.get(name).map(|(id, _)| *id)))
    }
}

impl RegistryWriter for StaticRegistry {
    fn record_install(&self, ref_id: &str, pack: &InstalledPack) -> Result<i64> {
        self.insert(pack.clone())
            .ok_or_else(|| Error::InvalidState(format!("Registry for {} is poisoned", ref_id)))
    }

    fn record_remove(&self, _ref_id: &str, name: &str) -> Result<bool> {
        Ok(self.remove(name))
    }
}

impl TitleOracle for StaticRegistry {
    fn exists(&self, _ref_id: &str, title: &str) -> Result<bool> {
        let in_titles = self
            .titles
            .read()
            .map(|titles| titles.contains(title))
            .unwrap_or(false);
        if in_titles {
            return Ok(true);
        }
        Ok(self
            .packs
            .read()
            .map(|packs| {
                packs
                    .values()
                    .flat_map(|(_, p)| p.pages.iter())
                    .any(|page| page.final_title == title)
            })
            .unwrap_or(false))
    }
}
