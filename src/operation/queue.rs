// src/operation/queue.rs

//! Job hand-off
//!
//! Enqueueing is synchronous and never waits on the consumer: a job is a
//! message pushed onto an unbounded channel that a worker drains.

use super::{OperationType, PackOperation};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Payload carried to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub kind: OperationType,
    pub operation_id: String,
    pub user_id: String,
    pub ref_id: String,
    pub operations: Vec<PackOperation>,
}

/// Fire-and-forget job submission
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<()>;
}

/// Receiving half handed to the worker
pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

/// Channel-backed queue
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl ChannelJobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobQueue for ChannelJobQueue {
    fn enqueue(&self, job: Job) -> Result<()> {
        let id = job.operation_id.clone();
        self.tx
            .send(job)
            .map_err(|_| Error::QueueClosed(format!("worker is gone, job {} dropped", id)))?;
        debug!("Enqueued job {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job {
            kind: OperationType::PackApply,
            operation_id: id.to_string(),
            user_id: "alice".to_string(),
            ref_id: "main".to_string(),
            operations: vec![],
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_fifo() {
        let (queue, mut rx) = ChannelJobQueue::new();
        queue.enqueue(job("1")).unwrap();
        queue.enqueue(job("2")).unwrap();

        assert_eq!(rx.recv().await.unwrap().operation_id, "1");
        assert_eq!(rx.recv().await.unwrap().operation_id, "2");
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (queue, rx) = ChannelJobQueue::new();
        drop(rx);
        let err = queue.enqueue(job("1")).unwrap_err();
        assert!(matches!(err, Error::QueueClosed(_)));
    }
}
