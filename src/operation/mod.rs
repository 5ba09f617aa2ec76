// src/operation/mod.rs

//! Operation records and the apply hand-off
//!
//! An operation is the durable record of an asynchronous pack job. It is
//! created `queued` before the job is handed to the queue, so a caller can
//! poll it immediately, and it moves through `running` to exactly one
//! terminal status.

pub mod queue;
pub mod worker;

pub use queue::{ChannelJobQueue, Job, JobQueue, JobReceiver};
pub use worker::{JobExecutor, RecordingExecutor, process_job, run_worker};

use crate::error::{Error, Result};
use crate::session::PackAction;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Kind of asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    PackInstall,
    PackUpdate,
    PackRemove,
    PackApply,
    RepoAdd,
    RepoSync,
    RepoRemove,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::PackInstall => "pack_install",
            OperationType::PackUpdate => "pack_update",
            OperationType::PackRemove => "pack_remove",
            OperationType::PackApply => "pack_apply",
            OperationType::RepoAdd => "repo_add",
            OperationType::RepoSync => "repo_sync",
            OperationType::RepoRemove => "repo_remove",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pack_install" => Ok(OperationType::PackInstall),
            "pack_update" => Ok(OperationType::PackUpdate),
            "pack_remove" => Ok(OperationType::PackRemove),
            "pack_apply" => Ok(OperationType::PackApply),
            "repo_add" => Ok(OperationType::RepoAdd),
            "repo_sync" => Ok(OperationType::RepoSync),
            "repo_remove" => Ok(OperationType::RepoRemove),
            _ => Err(Error::InvalidArgument(format!("Invalid operation type: {s}"))),
        }
    }
}

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Success | OperationStatus::Failed)
    }

    /// Legal lifecycle moves
    ///
    /// `running -> running` is a progress update. A queued operation may
    /// fail without ever running (e.g. the queue was closed).
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Running) | (Running, Success) | (Running, Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(OperationStatus::Queued),
            "running" => Ok(OperationStatus::Running),
            "success" => Ok(OperationStatus::Success),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(Error::InvalidArgument(format!("Invalid operation status: {s}"))),
        }
    }
}

/// A durable operation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: OperationStatus,
    /// Percent complete, 0..=100
    pub progress: u8,
    pub message: String,
    pub result_data: Option<Value>,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Operation {
    /// A new queued operation with a fresh id
    pub fn new(op_type: OperationType, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            op_type,
            status: OperationStatus::Queued,
            progress: 0,
            message: message.into(),
            result_data: None,
            user_id: user_id.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Move to `status`, enforcing the lifecycle rules
    ///
    /// Failing requires a non-empty message. Success forces progress to 100.
    /// Progress is clamped and never moves backwards. A `None` message or
    /// result keeps the current value.
    pub fn transition(
        &mut self,
        status: OperationStatus,
        message: Option<&str>,
        progress: Option<u8>,
        result_data: Option<Value>,
    ) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidState(format!(
                "Operation {} cannot move from {} to {}",
                self.operation_id, self.status, status
            )));
        }

        if status == OperationStatus::Failed && message.is_none_or(|m| m.trim().is_empty()) {
            return Err(Error::InvalidArgument(format!(
                "Operation {} cannot fail without a message",
                self.operation_id
            )));
        }

        if let Some(message) = message {
            self.message = message.to_string();
        }
        if let Some(progress) = progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if status == OperationStatus::Success {
            self.progress = 100;
        }
        if result_data.is_some() {
            self.result_data = result_data;
        }

        self.status = status;
        self.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(1)?;
        let status_str: String = row.get(2)?;
        let progress: i64 = row.get(3)?;
        let result_json: Option<String> = row.get(5)?;

        let op_type = type_str.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let status = status_str.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            operation_id: row.get(0)?,
            op_type,
            status,
            progress: progress.clamp(0, 100) as u8,
            message: row.get(4)?,
            result_data: result_json.and_then(|s| serde_json::from_str(&s).ok()),
            user_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

/// A page to be written by an install or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    pub name: String,
    pub final_title: String,
}

/// One pack-level step of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PackOperation {
    Install {
        pack_name: String,
        target_version: String,
        #[serde(default)]
        depends_on: Vec<String>,
        pages: Vec<PageSpec>,
    },
    Update {
        pack_name: String,
        current_version: String,
        target_version: String,
        #[serde(default)]
        depends_on: Vec<String>,
        pages: Vec<PageSpec>,
    },
    Remove {
        pack_name: String,
        pack_id: Option<i64>,
    },
}

impl PackOperation {
    pub fn pack_name(&self) -> &str {
        match self {
            PackOperation::Install { pack_name, .. } => pack_name,
            PackOperation::Update { pack_name, .. } => pack_name,
            PackOperation::Remove { pack_name, .. } => pack_name,
        }
    }

    pub fn action(&self) -> PackAction {
        match self {
            PackOperation::Install { .. } => PackAction::Install,
            PackOperation::Update { .. } => PackAction::Update,
            PackOperation::Remove { .. } => PackAction::Remove,
        }
    }
}

/// Counts of each step kind in a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub installs: usize,
    pub updates: usize,
    pub removes: usize,
}

impl ApplySummary {
    pub fn of(operations: &[PackOperation]) -> Self {
        let mut summary = Self::default();
        for op in operations {
            match op.action() {
                PackAction::Install => summary.installs += 1,
                PackAction::Update => summary.updates += 1,
                PackAction::Remove => summary.removes += 1,
                PackAction::Unchanged => {}
            }
        }
        summary
    }
}

/// Durable store of operation records
pub trait OperationRegistry: Send + Sync {
    /// Persist a new record
    fn create(&self, operation: &Operation) -> Result<()>;

    /// Apply a lifecycle transition and return the updated record
    fn update(
        &self,
        operation_id: &str,
        status: OperationStatus,
        message: Option<&str>,
        progress: Option<u8>,
        result_data: Option<Value>,
    ) -> Result<Operation>;

    fn get(&self, operation_id: &str) -> Result<Option<Operation>>;

    /// Most recent first
    fn list_for_user(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Operation>>;
}

/// SQLite-backed operation registry
#[derive(Debug, Clone)]
pub struct SqliteOperationRegistry {
    db_path: PathBuf,
}

const OPERATION_COLUMNS: &str =
    "id, type, status, progress, message, result_json, user_id, created_at, updated_at";

impl SqliteOperationRegistry {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl OperationRegistry for SqliteOperationRegistry {
    fn create(&self, operation: &Operation) -> Result<()> {
        let conn = crate::db::open(&self.db_path)?;
        let result_json = operation
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO operations (id, type, status, progress, message, result_json,
             user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &operation.operation_id,
                operation.op_type.as_str(),
                operation.status.as_str(),
                operation.progress as i64,
                &operation.message,
                result_json,
                &operation.user_id,
                &operation.created_at,
                &operation.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update(
        &self,
        operation_id: &str,
        status: OperationStatus,
        message: Option<&str>,
        progress: Option<u8>,
        result_data: Option<Value>,
    ) -> Result<Operation> {
        let mut conn = crate::db::open(&self.db_path)?;

        crate::db::transaction(&mut conn, |tx| {
            let mut operation = tx
                .query_row(
                    &format!("SELECT {} FROM operations WHERE id = ?1", OPERATION_COLUMNS),
                    [operation_id],
                    Operation::from_row,
                )
                .optional()?
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("Unknown operation: {}", operation_id))
                })?;

            operation.transition(status, message, progress, result_data)?;

            let result_json = operation
                .result_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "UPDATE operations SET status = ?1, progress = ?2, message = ?3,
                 result_json = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    operation.status.as_str(),
                    operation.progress as i64,
                    &operation.message,
                    result_json,
                    &operation.updated_at,
                    operation_id,
                ],
            )?;

            Ok(operation)
        })
    }

    fn get(&self, operation_id: &str) -> Result<Option<Operation>> {
        let conn = crate::db::open(&self.db_path)?;
        let operation = conn
            .query_row(
                &format!("SELECT {} FROM operations WHERE id = ?1", OPERATION_COLUMNS),
                [operation_id],
                Operation::from_row,
            )
            .optional()?;
        Ok(operation)
    }

    fn list_for_user(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Operation>> {
        let conn = crate::db::open(&self.db_path)?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM operations WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            OPERATION_COLUMNS
        ))?;
        let operations = stmt
            .query_map(params![user_id, limit], Operation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(operations)
    }
}

/// Creates operation records and hands jobs to the queue
#[derive(Clone)]
pub struct OperationPipeline {
    operations: Arc<dyn OperationRegistry>,
    jobs: Arc<dyn JobQueue>,
}

impl OperationPipeline {
    pub fn new(operations: Arc<dyn OperationRegistry>, jobs: Arc<dyn JobQueue>) -> Self {
        Self { operations, jobs }
    }

    pub fn registry(&self) -> &Arc<dyn OperationRegistry> {
        &self.operations
    }

    /// Record a queued operation, then enqueue its job
    ///
    /// If the queue refuses the job the record is marked failed and the
    /// queue error is returned.
    pub fn submit(
        &self,
        op_type: OperationType,
        user_id: &str,
        ref_id: &str,
        operations: Vec<PackOperation>,
        message: &str,
    ) -> Result<Operation> {
        let operation = Operation::new(op_type, user_id, message);
        self.operations.create(&operation)?;

        let job = Job {
            kind: op_type,
            operation_id: operation.operation_id.clone(),
            user_id: user_id.to_string(),
            ref_id: ref_id.to_string(),
            operations,
        };

        if let Err(e) = self.jobs.enqueue(job) {
            warn!("Failed to enqueue {}: {}", operation.operation_id, e);
            let failure = serde_json::json!({ "error_kind": e.kind(), "details": e.details() });
            self.operations.update(
                &operation.operation_id,
                OperationStatus::Failed,
                Some(&e.to_string()),
                None,
                Some(failure),
            )?;
            return Err(e);
        }

        info!(
            "Queued {} operation {} for {}",
            op_type, operation.operation_id, user_id
        );
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry() -> (tempfile::TempDir, SqliteOperationRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ops.db");
        crate::db::init(&db_path).unwrap();
        (dir, SqliteOperationRegistry::new(db_path))
    }

    #[test]
    fn test_transitions() {
        use OperationStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Success));
        assert!(!Queued.can_transition_to(Success));
        assert!(!Success.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Success.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_failed_requires_message() {
        let mut op = Operation::new(OperationType::PackApply, "alice", "queued");
        op.transition(OperationStatus::Running, None, Some(10), None).unwrap();
        assert!(op.transition(OperationStatus::Failed, Some("  "), None, None).is_err());
        op.transition(OperationStatus::Failed, Some("boom"), None, None).unwrap();
        assert_eq!(op.message, "boom");
    }

    #[test]
    fn test_success_sets_full_progress() {
        let mut op = Operation::new(OperationType::PackInstall, "alice", "queued");
        op.transition(OperationStatus::Running, None, Some(250), None).unwrap();
        assert_eq!(op.progress, 100);

        let mut op = Operation::new(OperationType::PackInstall, "alice", "queued");
        op.transition(OperationStatus::Running, None, Some(40), None).unwrap();
        op.transition(OperationStatus::Running, None, Some(20), None).unwrap();
        assert_eq!(op.progress, 40);
        op.transition(OperationStatus::Success, Some("done"), None, None).unwrap();
        assert_eq!(op.progress, 100);
    }

    #[test]
    fn test_registry_crud() {
        let (_dir, registry) = create_test_registry();
        let op = Operation::new(OperationType::PackApply, "alice", "Applying 2 changes");
        registry.create(&op).unwrap();

        let loaded = registry.get(&op.operation_id).unwrap().unwrap();
        assert_eq!(loaded, op);

        let running = registry
            .update(&op.operation_id, OperationStatus::Running, None, Some(50), None)
            .unwrap();
        assert_eq!(running.progress, 50);

        let done = registry
            .update(
                &op.operation_id,
                OperationStatus::Success,
                Some("Applied"),
                None,
                Some(serde_json::json!({"installs": 2})),
            )
            .unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(registry.get(&op.operation_id).unwrap().unwrap(), done);

        let err = registry
            .update(&op.operation_id, OperationStatus::Running, None, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_list_for_user() {
        let (_dir, registry) = create_test_registry();
        for _ in 0..3 {
            registry
                .create(&Operation::new(OperationType::PackInstall, "alice", "x"))
                .unwrap();
        }
        registry
            .create(&Operation::new(OperationType::PackRemove, "bob", "y"))
            .unwrap();

        assert_eq!(registry.list_for_user("alice", None).unwrap().len(), 3);
        assert_eq!(registry.list_for_user("alice", Some(2)).unwrap().len(), 2);
        assert_eq!(registry.list_for_user("bob", None).unwrap().len(), 1);
        assert!(registry.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_pack_operation_wire_shape() {
        let op = PackOperation::Remove {
            pack_name: "base".to_string(),
            pack_id: Some(7),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["action"], "remove");
        assert_eq!(json["pack_id"], 7);

        let ops = vec![
            op,
            PackOperation::Install {
                pack_name: "a".to_string(),
                target_version: "1.0".to_string(),
                depends_on: vec![],
                pages: vec![],
            },
        ];
        assert_eq!(
            ApplySummary::of(&ops),
            ApplySummary { installs: 1, updates: 0, removes: 1 }
        );
    }
}
