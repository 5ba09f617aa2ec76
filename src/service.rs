// src/service.rs

//! Load, dispatch, persist
//!
//! `PackService` is the entry point a transport talks to. It loads the
//! manifest and stored session for a (user, ref), runs one command, and
//! writes the result back when the command asks for it. Every collaborator
//! is injected, so independent services (or tests) never share state.

use crate::command::{self, ApplyReceipt, Command, CommandContext, CommandOutcome, CommandRequest, RefreshPolicy};
use crate::config::Config;
use crate::error::Result;
use crate::manifest::{FileManifestSource, ManifestSource};
use crate::operation::{
    JobQueue, Operation, OperationPipeline, OperationRegistry, OperationType, SqliteOperationRegistry,
};
use crate::registry::{InstalledRegistry, SqliteRegistry};
use crate::resolver::TitleOracle;
use crate::session::{PackAction, SessionState, SessionStore, SqliteSessionStore};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Wire response for a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub state: SessionState,
    pub warnings: Vec<String>,
    pub persist: bool,
    #[serde(flatten)]
    pub receipt: Option<ApplyReceipt>,
}

impl From<CommandOutcome> for CommandResponse {
    fn from(outcome: CommandOutcome) -> Self {
        Self {
            state: outcome.state,
            warnings: outcome.warnings,
            persist: outcome.persist,
            receipt: outcome.receipt,
        }
    }
}

/// Session engine wired to its collaborators
pub struct PackService {
    manifests: Arc<dyn ManifestSource>,
    sessions: Arc<dyn SessionStore>,
    installed: Arc<dyn InstalledRegistry>,
    titles: Arc<dyn TitleOracle>,
    pipeline: OperationPipeline,
    refresh_policy: RefreshPolicy,
}

impl PackService {
    pub fn new(
        manifests: Arc<dyn ManifestSource>,
        sessions: Arc<dyn SessionStore>,
        installed: Arc<dyn InstalledRegistry>,
        titles: Arc<dyn TitleOracle>,
        pipeline: OperationPipeline,
    ) -> Self {
        Self {
            manifests,
            sessions,
            installed,
            titles,
            pipeline,
            refresh_policy: RefreshPolicy::default(),
        }
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    /// Build a service over the configured database and manifest directory
    pub fn from_config(config: &Config, jobs: Arc<dyn JobQueue>) -> Result<Self> {
        crate::db::init(&config.storage.db_path)?;

        let db_path = config.storage.db_path.clone();
        let registry = Arc::new(SqliteRegistry::new(db_path.clone()));
        let operations: Arc<dyn OperationRegistry> = Arc::new(SqliteOperationRegistry::new(db_path.clone()));

        Ok(Self::new(
            Arc::new(FileManifestSource::new(config.manifest.dir.clone())),
            Arc::new(SqliteSessionStore::new(db_path)),
            registry.clone(),
            registry,
            OperationPipeline::new(operations, jobs),
        )
        .with_refresh_policy(config.session.refresh_policy))
    }

    /// Parse and run a raw request
    pub fn execute(&self, user_id: &str, ref_id: &str, request: CommandRequest) -> Result<CommandResponse> {
        let command = Command::parse(request)?;
        self.run(user_id, ref_id, command).map(CommandResponse::from)
    }

    /// Run a parsed command
    ///
    /// The stored session is replaced when the outcome asks to persist, and
    /// deleted after `clear` or a successful `apply`. On error nothing is
    /// written.
    pub fn run(&self, user_id: &str, ref_id: &str, command: Command) -> Result<CommandOutcome> {
        let manifest = self.manifests.manifest(ref_id)?;
        let state = self.sessions.load(user_id, ref_id)?;
        let ends_session = matches!(command, Command::Clear | Command::Apply { .. });

        let ctx = CommandContext {
            user_id,
            ref_id,
            installed: self.installed.as_ref(),
            titles: self.titles.as_ref(),
            pipeline: &self.pipeline,
            refresh_policy: self.refresh_policy,
        };
        let outcome = command::dispatch(state, &manifest, &ctx, command)?;

        if outcome.persist {
            self.sessions.save(&outcome.state)?;
        } else if ends_session {
            let existed = self.sessions.clear(user_id, ref_id)?;
            debug!("Cleared session {}/{} (existed: {})", user_id, ref_id, existed);
        }

        Ok(outcome)
    }

    /// The stored session, if any
    pub fn session(&self, user_id: &str, ref_id: &str) -> Result<Option<SessionState>> {
        self.sessions.load(user_id, ref_id)
    }

    /// Poll an operation
    pub fn operation(&self, operation_id: &str) -> Result<Option<Operation>> {
        self.pipeline.registry().get(operation_id)
    }

    /// Recent operations started by a user
    pub fn operations(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Operation>> {
        self.pipeline.registry().list_for_user(user_id, limit)
    }

    /// Install packs directly, bypassing any session
    pub fn install(&self, user_id: &str, ref_id: &str, packs: &[String]) -> Result<Operation> {
        self.direct(user_id, ref_id, PackAction::Install, packs)
    }

    /// Update packs directly, bypassing any session
    pub fn update(&self, user_id: &str, ref_id: &str, packs: &[String]) -> Result<Operation> {
        self.direct(user_id, ref_id, PackAction::Update, packs)
    }

    /// Remove packs directly, bypassing any session
    pub fn remove(&self, user_id: &str, ref_id: &str, packs: &[String]) -> Result<Operation> {
        self.direct(user_id, ref_id, PackAction::Remove, packs)
    }

    fn direct(&self, user_id: &str, ref_id: &str, action: PackAction, packs: &[String]) -> Result<Operation> {
        let op_type = match action {
            PackAction::Install => OperationType::PackInstall,
            PackAction::Update => OperationType::PackUpdate,
            _ => OperationType::PackRemove,
        };

        let manifest = self.manifests.manifest(ref_id)?;
        let installed = self.installed.list_installed(ref_id)?;
        let operations = command::direct_operations(
            action,
            packs,
            &manifest,
            &installed,
            self.installed.as_ref(),
            ref_id,
        )?;
        validation::validate(&operations, &manifest, &installed)?;

        let message = format!("{} {}", action, packs.join(", "));
        let operation = self
            .pipeline
            .submit(op_type, user_id, ref_id, operations, &message)?;
        info!("{} requested by {}: {}", op_type, user_id, operation.operation_id);
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, PackDefinition, StaticManifestSource};
    use crate::operation::{ChannelJobQueue, JobReceiver, OperationStatus};
    use crate::registry::StaticRegistry;
    use crate::session::MemorySessionStore;
    use serde_json::json;

    fn service() -> (tempfile::TempDir, PackService, JobReceiver) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("svc.db");
        crate::db::init(&db_path).unwrap();

        let manifest = Manifest::new()
            .with_pack("a", PackDefinition::new("1.0").with_pages(["Home"]))
            .with_pack("b", PackDefinition::new("1.0").with_depends_on(["a"]));
        let registry = Arc::new(StaticRegistry::new());
        let (queue, rx) = ChannelJobQueue::new();

        let svc = PackService::new(
            Arc::new(StaticManifestSource::new(manifest)),
            Arc::new(MemorySessionStore::new()),
            registry.clone(),
            registry,
            OperationPipeline::new(Arc::new(SqliteOperationRegistry::new(db_path)), Arc::new(queue)),
        );
        (dir, svc, rx)
    }

    #[test]
    fn test_run_persists_and_clears() {
        let (_dir, svc, _rx) = service();
        svc.execute("alice", "main", CommandRequest::new("init", json!({}))).unwrap();
        assert!(svc.session("alice", "main").unwrap().is_some());
        assert!(svc.session("bob", "main").unwrap().is_none());

        let response = svc
            .execute("alice", "main", CommandRequest::new("clear", json!(null)))
            .unwrap();
        assert!(!response.persist);
        assert!(svc.session("alice", "main").unwrap().is_none());
    }

    #[test]
    fn test_failed_command_leaves_store_untouched() {
        let (_dir, svc, _rx) = service();
        svc.run("alice", "main", Command::Init).unwrap();
        svc.run("alice", "main", Command::SelectPack { pack_name: "b".to_string() })
            .unwrap();
        let before = svc.session("alice", "main").unwrap().unwrap();

        let err = svc
            .run(
                "alice",
                "main",
                Command::DeselectPack {
                    pack_name: "a".to_string(),
                    cascade: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "dependency_error");
        assert_eq!(svc.session("alice", "main").unwrap().unwrap(), before);
    }

    #[test]
    fn test_apply_response_shape() {
        let (_dir, svc, mut rx) = service();
        svc.run("alice", "main", Command::Init).unwrap();
        let outcome = svc
            .run("alice", "main", Command::SelectPack { pack_name: "b".to_string() })
            .unwrap();

        let response = svc
            .execute(
                "alice",
                "main",
                CommandRequest::new("apply", json!({"state_hash": outcome.state.hash})),
            )
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["summary"]["installs"], 2);
        assert!(svc.session("alice", "main").unwrap().is_none());

        let job = rx.try_recv().unwrap();
        assert_eq!(job.operations.len(), 2);
        let op = svc.operation(&job.operation_id).unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Queued);
    }

    #[test]
    fn test_direct_install_and_errors() {
        let (_dir, svc, mut rx) = service();
        let op = svc
            .install("alice", "main", &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(op.op_type, OperationType::PackInstall);
        assert_eq!(rx.try_recv().unwrap().operation_id, op.operation_id);

        let err = svc.install("alice", "main", &["b".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "dependency_error");

        let err = svc.remove("alice", "main", &["a".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert_eq!(svc.operations("alice", None).unwrap().len(), 1);
    }
}
