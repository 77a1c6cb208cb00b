//! Job definitions for the scheduler.
//!
//! This module defines the core job types used across the worker:
//!
//! - `Job`: The durable job record kept by the job store
//! - `JobDescriptor`: The serializable subset carried through the queue
//! - `JobInput`: What the requester asked to have analysed
//! - `JobStatus`: Lifecycle state with forward-only transitions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lint::LintReport;

/// Kind of analysis requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Code review of a single file.
    Review,
    /// Root-cause diagnosis from an error log.
    Debug,
    /// Architecture generation for a described system.
    Architecture,
}

impl JobKind {
    /// All job kinds, in declaration order.
    pub const ALL: [JobKind; 3] = [JobKind::Review, JobKind::Debug, JobKind::Architecture];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Review => "review",
            JobKind::Debug => "debug",
            JobKind::Architecture => "architecture",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "review" | "code_review" => Ok(JobKind::Review),
            "debug" => Ok(JobKind::Debug),
            "architecture" => Ok(JobKind::Architecture),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}

/// Lifecycle status of a job.
///
/// Statuses are ordered `pending < processing < {completed, failed}`. A job
/// only ever moves to a strictly higher rank; terminal states absorb every
/// later update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position of the status in the lifecycle order.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Returns whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Input payload of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    /// Programming language of the file (e.g., "python").
    pub language: String,
    /// Path of the file as seen by the requester.
    pub file_path: String,
    /// Full file content to analyse.
    pub file_content: String,
    /// Error output for debug jobs.
    #[serde(default)]
    pub error_log: Option<String>,
    /// Text around the requester's cursor, for focused reviews.
    #[serde(default)]
    pub cursor_context: Option<String>,
    /// Repository the file belongs to, if known.
    #[serde(default)]
    pub repo_id: Option<String>,
}

impl JobInput {
    pub fn new(
        language: impl Into<String>,
        file_path: impl Into<String>,
        file_content: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            file_path: file_path.into(),
            file_content: file_content.into(),
            error_log: None,
            cursor_context: None,
            repo_id: None,
        }
    }

    /// Sets the error log.
    pub fn with_error_log(mut self, log: impl Into<String>) -> Self {
        self.error_log = Some(log.into());
        self
    }

    /// Sets the cursor context.
    pub fn with_cursor_context(mut self, context: impl Into<String>) -> Self {
        self.cursor_context = Some(context.into());
        self
    }

    /// Sets the repository id.
    pub fn with_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }
}

/// Token usage reported by the reasoning service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates usage with the total derived from both parts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Result stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Analysis text produced by the reasoning service.
    pub content: String,
    /// Model that produced the content.
    pub model: String,
    /// Whether the content was served from the response cache.
    pub cached: bool,
    /// Static analysis run before the call, for review and debug jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<LintReport>,
}

/// Serializable subset of a job carried in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub input: JobInput,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub input: JobInput,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: TokenUsage,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new pending job with a fresh UUID.
    pub fn new(user_id: impl Into<String>, kind: JobKind, input: JobInput) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id, kind, input)
    }

    /// Creates a new pending job with a caller-chosen id.
    pub fn with_id(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: JobKind,
        input: JobInput,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            kind,
            input,
            status: JobStatus::Pending,
            result: None,
            error: None,
            tokens_used: TokenUsage::default(),
            estimated_cost: 0.0,
            cache_hit: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Rebuilds a pending record from a queue descriptor.
    ///
    /// Used when an entry arrives for a job whose record was never created.
    pub fn from_descriptor(descriptor: &JobDescriptor) -> Self {
        let mut job = Self::with_id(
            descriptor.job_id.clone(),
            descriptor.user_id.clone(),
            descriptor.kind,
            descriptor.input.clone(),
        );
        job.created_at = descriptor.enqueued_at;
        job
    }

    /// Returns the queue descriptor for this job.
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            job_id: self.job_id.clone(),
            user_id: self.user_id.clone(),
            kind: self.kind,
            input: self.input.clone(),
            enqueued_at: Utc::now(),
        }
    }

    /// Applies a status transition if it moves forward.
    ///
    /// Returns `false` and leaves the record untouched otherwise.
    pub fn transition(
        &mut self,
        status: JobStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }

        let now = Utc::now();
        self.status = status;
        if result.is_some() {
            self.result = result;
        }
        if error.is_some() {
            self.error = error;
        }
        self.updated_at = now;
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> JobInput {
        JobInput::new("python", "src/app.py", "def main():\n    return 1\n")
    }

    #[test]
    fn test_status_order() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_status_display_and_parse() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().expect("status should parse");
            assert_eq!(parsed, status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_kind_parse() {
        assert_eq!("review".parse::<JobKind>(), Ok(JobKind::Review));
        assert_eq!("code_review".parse::<JobKind>(), Ok(JobKind::Review));
        assert_eq!("DEBUG".parse::<JobKind>(), Ok(JobKind::Debug));
        assert!("lint".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_job_new() {
        let job = Job::new("user-1", JobKind::Review, sample_input());

        assert!(Uuid::parse_str(&job.job_id).is_ok());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.cache_hit);
    }

    #[test]
    fn test_job_transition_is_monotonic() {
        let mut job = Job::new("user-1", JobKind::Review, sample_input());

        assert!(job.transition(JobStatus::Processing, None, None));
        assert!(!job.transition(JobStatus::Processing, None, None));
        assert!(job.completed_at.is_none());

        let result = JobResult {
            content: "Looks fine.".to_string(),
            model: "test-model".to_string(),
            cached: false,
            lint: None,
        };
        assert!(job.transition(JobStatus::Completed, Some(result.clone()), None));
        assert!(job.completed_at.is_some());

        assert!(!job.transition(JobStatus::Failed, None, Some("late".to_string())));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(result));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let job = Job::new("user-7", JobKind::Debug, sample_input().with_error_log("boom"));
        let value = serde_json::to_value(job.descriptor()).expect("descriptor should serialize");

        assert_eq!(value["job_id"], job.job_id.as_str());
        assert_eq!(value["user_id"], "user-7");
        assert_eq!(value["type"], "debug");
        assert_eq!(value["input"]["error_log"], "boom");
    }

    #[test]
    fn test_descriptor_accepts_missing_optional_fields() {
        let raw = r#"{
            "job_id": "j-1",
            "user_id": "u-1",
            "type": "review",
            "input": {"language": "rust", "file_path": "lib.rs", "file_content": "fn a() {}"},
            "enqueued_at": "2024-01-01T00:00:00Z"
        }"#;
        let descriptor: JobDescriptor = serde_json::from_str(raw).expect("should parse");

        assert_eq!(descriptor.kind, JobKind::Review);
        assert!(descriptor.input.error_log.is_none());
        assert!(descriptor.input.cursor_context.is_none());

        let job = Job::from_descriptor(&descriptor);
        assert_eq!(job.job_id, "j-1");
        assert_eq!(job.created_at, descriptor.enqueued_at);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }
}
