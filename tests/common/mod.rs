// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use packsmith::manifest::{Manifest, PackDefinition, StaticManifestSource};
use packsmith::operation::{ChannelJobQueue, JobReceiver, OperationPipeline, SqliteOperationRegistry};
use packsmith::registry::{InstalledPack, RegistryWriter, SqliteRegistry};
use packsmith::session::SqliteSessionStore;
use packsmith::{Command, CommandOutcome, PackService, db};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const USER: &str = "alice";
pub const REF: &str = "main";

/// core <- widgets <- theme, plus a standalone icons pack
pub fn sample_manifest() -> Manifest {
    Manifest::new()
        .with_pack("core", PackDefinition::new("1.0.0").with_pages(["Home"]))
        .with_pack(
            "widgets",
            PackDefinition::new("1.0.0")
                .with_depends_on(["core"])
                .with_pages(["Gallery", "Buttons"])
                .with_prefix("Widgets/"),
        )
        .with_pack(
            "theme",
            PackDefinition::new("1.0.0")
                .with_depends_on(["widgets"])
                .with_pages(["Colors"]),
        )
        .with_pack("icons", PackDefinition::new("2.0.0").with_pages(["Icons"]))
}

/// A service over a fresh database with everything but the manifest on disk
pub struct TestEnv {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub registry: Arc<SqliteRegistry>,
    pub service: PackService,
}

impl TestEnv {
    pub fn run(&self, command: Command) -> packsmith::Result<CommandOutcome> {
        self.service.run(USER, REF, command)
    }

    pub fn select(&self, pack: &str) -> CommandOutcome {
        self.run(Command::SelectPack {
            pack_name: pack.to_string(),
        })
        .unwrap()
    }

    pub fn stored_hash(&self) -> String {
        self.service.session(USER, REF).unwrap().unwrap().hash
    }
}

/// Create a test environment with `installed` already recorded.
///
/// Returns the environment and the receiving end of the job queue; keep both
/// alive for as long as jobs should be accepted.
pub fn setup(manifest: Manifest, installed: &[InstalledPack]) -> (TestEnv, JobReceiver) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    db::init(&db_path).unwrap();

    let registry = Arc::new(SqliteRegistry::new(db_path.clone()));
    for pack in installed {
        registry.record_install(REF, pack).unwrap();
    }

    let (queue, rx) = ChannelJobQueue::new();
    let service = PackService::new(
        Arc::new(StaticManifestSource::new(manifest)),
        Arc::new(SqliteSessionStore::new(db_path.clone())),
        registry.clone(),
        registry.clone(),
        OperationPipeline::new(
            Arc::new(SqliteOperationRegistry::new(db_path.clone())),
            Arc::new(queue),
        ),
    );

    (
        TestEnv {
            dir,
            db_path,
            registry,
            service,
        },
        rx,
    )
}
