// src/operation/worker.rs

//! Job execution
//!
//! The worker drains the job channel and drives each operation record from
//! `queued` through `running` to `success` or `failed`. What a job actually
//! does to the content store is up to the [`JobExecutor`].

use super::{ApplySummary, Job, JobReceiver, Operation, OperationRegistry, OperationStatus, PackOperation};
use crate::error::Result;
use crate::registry::{InstalledPack, InstalledPage, RegistryWriter};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Carries out the pack steps of a job
pub trait JobExecutor: Send + Sync {
    /// Run every step, reporting `(percent, message)` along the way
    ///
    /// The returned value becomes the operation's `result_data`.
    fn execute(&self, job: &Job, progress: &mut dyn FnMut(u8, &str)) -> Result<Value>;
}

/// Executor that only updates the installed-pack registry
pub struct RecordingExecutor {
    registry: Arc<dyn RegistryWriter>,
}

impl RecordingExecutor {
    pub fn new(registry: Arc<dyn RegistryWriter>) -> Self {
        Self { registry }
    }
}

impl JobExecutor for RecordingExecutor {
    fn execute(&self, job: &Job, progress: &mut dyn FnMut(u8, &str)) -> Result<Value> {
        let total = job.operations.len().max(1);
        let mut installed = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();

        for (i, op) in job.operations.iter().enumerate() {
            match op {
                PackOperation::Install {
                    pack_name,
                    target_version,
                    depends_on,
                    pages,
                }
                | PackOperation::Update {
                    pack_name,
                    target_version,
                    depends_on,
                    pages,
                    ..
                } => {
                    let record = InstalledPack {
                        name: pack_name.clone(),
                        version: target_version.clone(),
                        depends_on: depends_on.clone(),
                        pages: pages
                            .iter()
                            .map(|p| InstalledPage {
                                name: p.name.clone(),
                                final_title: p.final_title.clone(),
                            })
                            .collect(),
                    };
                    self.registry.record_install(&job.ref_id, &record)?;
                    if matches!(op, PackOperation::Install { .. }) {
                        installed.push(pack_name.clone());
                    } else {
                        updated.push(pack_name.clone());
                    }
                }
                PackOperation::Remove { pack_name, .. } => {
                    if !self.registry.record_remove(&job.ref_id, pack_name)? {
                        warn!("Pack {} was not installed in {}", pack_name, job.ref_id);
                    }
                    removed.push(pack_name.clone());
                }
            }

            let pct = ((i + 1) * 100 / total) as u8;
            progress(pct, &format!("{} {}", op.action(), op.pack_name()));
        }

        Ok(json!({
            "installed": installed,
            "updated": updated,
            "removed": removed,
        }))
    }
}

/// Run one job to a terminal status
pub fn process_job(
    job: &Job,
    operations: &dyn OperationRegistry,
    executor: &dyn JobExecutor,
) -> Result<Operation> {
    let id = job.operation_id.as_str();
    operations.update(id, OperationStatus::Running, Some("Running"), Some(0), None)?;
    debug!("Operation {} running ({} steps)", id, job.operations.len());

    let mut report = |pct: u8, message: &str| {
        if let Err(e) = operations.update(id, OperationStatus::Running, Some(message), Some(pct), None) {
            warn!("Failed to record progress for {}: {}", id, e);
        }
    };

    match executor.execute(job, &mut report) {
        Ok(result) => {
            let summary = ApplySummary::of(&job.operations);
            let message = format!(
                "Completed: {} installed, {} updated, {} removed",
                summary.installs, summary.updates, summary.removes
            );
            info!("Operation {} succeeded", id);
            operations.update(id, OperationStatus::Success, Some(&message), None, Some(result))
        }
        Err(e) => {
            error!("Operation {} failed: {}", id, e);
            let failure = json!({ "error_kind": e.kind(), "details": e.details() });
            operations.update(id, OperationStatus::Failed, Some(&e.to_string()), None, Some(failure))
        }
    }
}

/// Drain the job channel until every sender is dropped
///
/// Returns the number of jobs processed.
pub async fn run_worker(
    mut rx: JobReceiver,
    operations: Arc<dyn OperationRegistry>,
    executor: Arc<dyn JobExecutor>,
) -> usize {
    let mut processed = 0;

    while let Some(job) = rx.recv().await {
        let operations = Arc::clone(&operations);
        let executor = Arc::clone(&executor);
        let id = job.operation_id.clone();

        let result = tokio::task::spawn_blocking(move || {
            process_job(&job, operations.as_ref(), executor.as_ref())
        })
        .await;

        match result {
            Ok(Ok(op)) => debug!("Operation {} finished as {}", op.operation_id, op.status),
            Ok(Err(e)) => error!("Operation {} could not be recorded: {}", id, e),
            Err(e) => error!("Worker task for {} panicked: {}", id, e),
        }
        processed += 1;
    }

    info!("Job channel closed after {} jobs", processed);
    processed
}
