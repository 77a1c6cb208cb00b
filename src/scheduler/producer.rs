//! Job submission helper.
//!
//! Requests enter the system by creating the job record and then appending
//! its descriptor to the stream. If the append fails the record is marked
//! failed so a requester polling the store never waits on a job no worker
//! will see.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::storage::{JobStore, StoreError};

use super::job::{Job, JobInput, JobKind, JobStatus};
use super::queue::{QueueError, StreamQueue};

/// Errors that can occur while submitting a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to create job record: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}

/// Creates job records and enqueues them.
pub struct Producer {
    queue: Arc<dyn StreamQueue>,
    store: Arc<dyn JobStore>,
}

impl Producer {
    pub fn new(queue: Arc<dyn StreamQueue>, store: Arc<dyn JobStore>) -> Self {
        Self { queue, store }
    }

    /// Submits a new job and returns its record.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Store` if the record cannot be created and
    /// `SubmitError::Queue` if the append fails (the record is then failed).
    pub async fn submit(
        &self,
        user_id: impl Into<String>,
        kind: JobKind,
        input: JobInput,
    ) -> Result<Job, SubmitError> {
        let job = Job::new(user_id, kind, input);
        self.submit_job(job).await
    }

    /// Submits a caller-built job record.
    pub async fn submit_job(&self, job: Job) -> Result<Job, SubmitError> {
        self.store.create(&job).await?;

        match self.queue.enqueue(&job.descriptor()).await {
            Ok(entry_id) => {
                info!(
                    job_id = %job.job_id,
                    entry_id = %entry_id,
                    kind = %job.kind,
                    "Job enqueued"
                );
                Ok(job)
            }
            Err(e) => {
                let message = format!("failed to enqueue job: {}", e);
                if let Err(store_err) = self
                    .store
                    .update_status(&job.job_id, JobStatus::Failed, None, Some(&message))
                    .await
                {
                    error!(
                        job_id = %job.job_id,
                        error = %store_err,
                        "Failed to mark unenqueued job as failed"
                    );
                }
                Err(e.into())
            }
        }
    }
}
