//! In-memory job store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::scheduler::job::{Job, JobResult, JobStatus, TokenUsage};

use super::store::{JobCompletion, JobStore, StoreError};

/// [`JobStore`] held in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().expect("job store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<String, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::DuplicateJob(job.job_id.clone()));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(job.job_id.clone())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        Ok(jobs.get(job_id).cloned())
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&JobResult>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        Ok(job.transition(status, result.cloned(), error.map(str::to_string)))
    }

    async fn update_metrics(
        &self,
        job_id: &str,
        usage: &TokenUsage,
        estimated_cost: f64,
        cache_hit: bool,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        job.tokens_used = *usage;
        job.estimated_cost = estimated_cost;
        job.cache_hit = cache_hit;
        job.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn record_completion(
        &self,
        job_id: &str,
        completion: &JobCompletion,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if !job.transition(JobStatus::Completed, Some(completion.result.clone()), None) {
            return Ok(false);
        }
        job.tokens_used = completion.usage;
        job.estimated_cost = completion.estimated_cost;
        job.cache_hit = completion.cache_hit;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobInput, JobKind};

    fn job(user: &str) -> Job {
        Job::new(user, JobKind::Review, JobInput::new("go", "main.go", "package main"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let job = job("u1");
        let id = store.create(&job).await.expect("create should work");

        let fetched = store.get(&id).await.expect("get should work");
        assert_eq!(fetched, Some(job.clone()));
        assert!(matches!(
            store.create(&job).await,
            Err(StoreError::DuplicateJob(_))
        ));
        assert!(store.get("missing").await.expect("get should work").is_none());
    }

    #[tokio::test]
    async fn test_update_status_rejects_backwards() {
        let store = MemoryJobStore::new();
        let id = store.create(&job("u1")).await.expect("create should work");

        assert!(store
            .update_status(&id, JobStatus::Processing, None, None)
            .await
            .expect("update should work"));
        assert!(!store
            .update_status(&id, JobStatus::Pending, None, None)
            .await
            .expect("update should work"));
        assert!(store
            .update_status(&id, JobStatus::Failed, None, Some("boom"))
            .await
            .expect("update should work"));
        assert!(!store
            .update_status(&id, JobStatus::Completed, None, None)
            .await
            .expect("update should work"));

        let stored = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_record_completion() {
        let store = MemoryJobStore::new();
        let id = store.create(&job("u1")).await.expect("create should work");
        let completion = JobCompletion {
            result: JobResult {
                content: "All good here.".to_string(),
                model: "m".to_string(),
                cached: true,
                lint: None,
            },
            usage: TokenUsage::new(10, 5),
            estimated_cost: 0.0,
            cache_hit: true,
        };

        assert!(store.record_completion(&id, &completion).await.expect("record"));
        assert!(!store.record_completion(&id, &completion).await.expect("record"));

        let stored = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.cache_hit);
        assert_eq!(stored.tokens_used.total_tokens, 15);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_by_user_newest_first() {
        let store = MemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut j = job("u1");
            j.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            ids.push(store.create(&j).await.expect("create should work"));
        }
        store.create(&job("u2")).await.expect("create should work");
        store
            .update_status(&ids[0], JobStatus::Processing, None, None)
            .await
            .expect("update should work");

        let listed = store.list_by_user("u1", 10, None).await.expect("list");
        let listed_ids: Vec<_> = listed.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(listed_ids, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);

        let limited = store.list_by_user("u1", 2, None).await.expect("list");
        assert_eq!(limited.len(), 2);

        let processing = store
            .list_by_user("u1", 10, Some(JobStatus::Processing))
            .await
            .expect("list");
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].job_id, ids[0]);
    }
}
