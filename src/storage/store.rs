//! Job store interface.

use async_trait::async_trait;
use thiserror::Error;

use crate::scheduler::job::{Job, JobResult, JobStatus, TokenUsage};

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the backing database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),

    /// A job with this id already exists.
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    /// A stored row could not be mapped back to a job.
    #[error("Invalid job record: {0}")]
    InvalidRecord(String),
}

/// Everything written when a job completes.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub result: JobResult,
    pub usage: TokenUsage,
    pub estimated_cost: f64,
    pub cache_hit: bool,
}

/// Durable record of jobs keyed by job id.
///
/// Status updates are monotonic: an update to a status whose rank is not
/// strictly greater than the current one is rejected with `Ok(false)`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateJob` if the id is taken.
    async fn create(&self, job: &Job) -> Result<String, StoreError>;

    /// Fetches a job by id.
    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Moves a job to `status`, optionally attaching a result or error.
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&JobResult>,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Records token usage, cost and the cache-hit flag.
    async fn update_metrics(
        &self,
        job_id: &str,
        usage: &TokenUsage,
        estimated_cost: f64,
        cache_hit: bool,
    ) -> Result<bool, StoreError>;

    /// Lists a user's jobs, newest first.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Marks a job completed and records its metrics in one step.
    ///
    /// Returns `false` without touching metrics if the job is already
    /// terminal or missing.
    async fn record_completion(
        &self,
        job_id: &str,
        completion: &JobCompletion,
    ) -> Result<bool, StoreError>;
}
