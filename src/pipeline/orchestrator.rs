//! Pipeline orchestrator running one job attempt through its stages.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Redelivery checks and the move to `processing`
//! - Preflight content checks
//! - Static analysis of review and debug input
//! - Cache lookup keyed by the rendered prompt
//! - The external call with timeout and exponential backoff
//! - Output validation, cache write and persistence
//! - Status notifications
//!
//! Every attempt ends in an [`AttemptOutcome`] telling the consumer loop
//! whether the queue entry may be acknowledged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cache::{fingerprint, CacheKey, CachedResponse, ResponseCache};
use crate::error::{FailureClass, LlmError};
use crate::lint::{LintReport, Linter};
use crate::llm::{Completion, ReasoningClient};
use crate::metrics::MetricsCollector;
use crate::notify::{JobEvent, NotificationSink};
use crate::safety::ContentSafety;
use crate::scheduler::job::{Job, JobDescriptor, JobKind, JobResult, JobStatus, TokenUsage};
use crate::storage::{JobCompletion, JobStore, StoreError};

use super::config::PipelineConfig;
use super::prompts::{PromptLibrary, RenderedPrompt};
use super::stages::{ExecutionContext, Stage, StageFailure, StageOutcome};

/// Collaborators of the orchestrator.
#[derive(Clone)]
pub struct PipelineServices {
    pub reasoner: Arc<dyn ReasoningClient>,
    pub store: Arc<dyn JobStore>,
    pub cache: Arc<ResponseCache>,
    pub notifier: Arc<dyn NotificationSink>,
    pub safety: Arc<dyn ContentSafety>,
    pub linter: Arc<dyn Linter>,
    pub prompts: Arc<PromptLibrary>,
}

/// How a job attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Result persisted.
    Completed { cache_hit: bool },
    /// Permanent failure recorded on the job.
    Failed(StageFailure),
    /// Infrastructure failure; the entry must stay pending for redelivery.
    ///
    /// Also returned when a failure could not be recorded, so the next
    /// delivery records it.
    Deferred(StageFailure),
    /// The job was already terminal.
    Skipped(JobStatus),
}

impl AttemptOutcome {
    /// Returns whether the queue entry may be acknowledged.
    pub fn should_ack(&self) -> bool {
        !matches!(self, AttemptOutcome::Deferred(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed { .. } => "completed",
            AttemptOutcome::Failed(_) => "failed",
            AttemptOutcome::Deferred(_) => "deferred",
            AttemptOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Statistics about pipeline execution.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total number of attempts run.
    pub total_attempts: u64,
    pub completed: u64,
    pub failed: u64,
    /// Attempts left unacknowledged for redelivery.
    pub deferred: u64,
    /// Redeliveries of already terminal jobs.
    pub skipped: u64,
    pub cache_hits: u64,
    pub external_calls: u64,
    pub retries: u64,
    /// Average attempt duration.
    pub average_duration: Duration,
}

impl PipelineStats {
    /// Creates new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: &AttemptOutcome, ctx: &ExecutionContext) {
        self.total_attempts += 1;
        match outcome {
            AttemptOutcome::Completed { cache_hit } => {
                self.completed += 1;
                if *cache_hit {
                    self.cache_hits += 1;
                }
            }
            AttemptOutcome::Failed(_) => self.failed += 1,
            AttemptOutcome::Deferred(_) => self.deferred += 1,
            AttemptOutcome::Skipped(_) => self.skipped += 1,
        }
        self.external_calls += u64::from(ctx.external_calls);
        self.retries += u64::from(ctx.retries);
        self.update_average_duration(ctx.elapsed());
    }

    /// Updates the running average duration.
    fn update_average_duration(&mut self, duration: Duration) {
        if self.total_attempts == 1 {
            self.average_duration = duration;
        } else {
            // Incremental average: avg = avg + (new - avg) / n
            let n = self.total_attempts as f64;
            let old_avg = self.average_duration.as_secs_f64();
            let new_avg = old_avg + (duration.as_secs_f64() - old_avg) / n;
            self.average_duration = Duration::from_secs_f64(new_avg.max(0.0));
        }
    }
}

/// Keeps the in-progress gauge balanced even if the attempt panics.
struct InProgress(MetricsCollector);

impl InProgress {
    fn enter(metrics: MetricsCollector) -> Self {
        metrics.inc_jobs_in_progress();
        Self(metrics)
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.dec_jobs_in_progress();
    }
}

/// Runs job attempts against injected collaborators.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    services: PipelineServices,
    metrics: MetricsCollector,
    stats: Arc<tokio::sync::RwLock<PipelineStats>>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        Self {
            config,
            services,
            metrics: MetricsCollector::new(),
            stats: Arc::new(tokio::sync::RwLock::new(PipelineStats::new())),
        }
    }

    /// Runs one attempt of a job.
    ///
    /// Never returns an error: every failure is classified into the outcome.
    pub async fn process(&self, descriptor: &JobDescriptor) -> AttemptOutcome {
        let _in_progress = InProgress::enter(self.metrics);
        let mut ctx = ExecutionContext::new(descriptor.clone());

        info!(
            job_id = %descriptor.job_id,
            kind = %descriptor.kind,
            user_id = %descriptor.user_id,
            "Processing job"
        );

        let outcome = self.run_stages(&mut ctx).await;
        self.finish(&ctx, &outcome).await;
        outcome
    }

    /// Marks a job failed without running it.
    ///
    /// Used for entries past the delivery cap and for attempts that panicked.
    pub async fn abandon(&self, descriptor: &JobDescriptor, reason: &str) -> AttemptOutcome {
        let ctx = ExecutionContext::new(descriptor.clone());
        let failure = StageFailure::new(Stage::Dispatch, FailureClass::PermanentContent, reason);
        let outcome = self.fail(descriptor, failure).await;
        self.finish(&ctx, &outcome).await;
        outcome
    }

    /// Gets the current pipeline statistics.
    pub async fn stats(&self) -> PipelineStats {
        self.stats.read().await.clone()
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn finish(&self, ctx: &ExecutionContext, outcome: &AttemptOutcome) {
        let duration = ctx.elapsed();
        self.metrics
            .record_job(ctx.descriptor.kind, outcome.label(), duration.as_secs_f64());
        self.stats.write().await.record(outcome, ctx);

        let job_id = &ctx.descriptor.job_id;
        match outcome {
            AttemptOutcome::Completed { cache_hit } => info!(
                job_id = %job_id,
                cache_hit = cache_hit,
                cache_key = ctx.cache_key.as_ref().map(CacheKey::as_str).unwrap_or_default(),
                external_calls = ctx.external_calls,
                duration_ms = duration.as_millis() as u64,
                "Job completed"
            ),
            AttemptOutcome::Failed(failure) => warn!(
                job_id = %job_id,
                stage = %failure.stage,
                class = %failure.class,
                error = %failure.message,
                duration_ms = duration.as_millis() as u64,
                "Job failed"
            ),
            AttemptOutcome::Deferred(failure) => warn!(
                job_id = %job_id,
                stage = %failure.stage,
                error = %failure.message,
                "Job deferred, entry left pending for redelivery"
            ),
            AttemptOutcome::Skipped(status) => info!(
                job_id = %job_id,
                status = %status,
                "Job already terminal, skipping redelivery"
            ),
        }

        for (stage, elapsed) in &ctx.timings {
            debug!(
                job_id = %job_id,
                stage = %stage,
                elapsed_ms = elapsed.as_millis() as u64,
                "Stage timing"
            );
        }
    }

    async fn run_stages(&self, ctx: &mut ExecutionContext) -> AttemptOutcome {
        let descriptor = ctx.descriptor.clone();

        match self.begin(&descriptor).await {
            StageOutcome::Success(None) => {}
            StageOutcome::Success(Some(status)) => return AttemptOutcome::Skipped(status),
            StageOutcome::Retriable(failure) => return AttemptOutcome::Deferred(failure),
            StageOutcome::Permanent(failure) => return self.fail(&descriptor, failure).await,
        }

        let started = Instant::now();
        let preflight = self.preflight(&descriptor);
        ctx.record_timing(Stage::Preflight, started);
        if let StageOutcome::Permanent(failure) | StageOutcome::Retriable(failure) = preflight {
            return self.fail(&descriptor, failure).await;
        }

        let started = Instant::now();
        let lint = self.lint(&descriptor).await;
        ctx.record_timing(Stage::Lint, started);

        let started = Instant::now();
        let rendered = self.services.prompts.render_with_lint(
            descriptor.kind,
            &descriptor.input,
            lint.as_ref().unwrap_or(&LintReport::default()),
        );
        ctx.lint = lint;
        let prompt = match rendered {
            Ok(prompt) => prompt,
            Err(e) => {
                let failure = StageFailure::new(
                    Stage::CacheCheck,
                    FailureClass::PermanentContent,
                    e.to_string(),
                );
                return self.fail(&descriptor, failure).await;
            }
        };
        let key = fingerprint(&prompt.system_instruction, &prompt.user_input);
        let cached = self.services.cache.get(&key).await;
        ctx.record_timing(Stage::CacheCheck, started);
        ctx.cache_key = Some(key.clone());

        if let Some(hit) = cached {
            return self.complete_from_cache(ctx, hit).await;
        }

        let started = Instant::now();
        let completion = match self.call_with_retry(ctx, &prompt).await {
            StageOutcome::Success(completion) => completion,
            StageOutcome::Retriable(failure) | StageOutcome::Permanent(failure) => {
                ctx.record_timing(Stage::ExternalCall, started);
                return self.fail(&descriptor, failure).await;
            }
        };
        ctx.record_timing(Stage::ExternalCall, started);

        if let StageOutcome::Permanent(failure) = self.validate(&completion) {
            return self.fail(&descriptor, failure).await;
        }

        let started = Instant::now();
        let cost = self.config.pricing.estimate(&completion.usage);
        self.cache_result(&descriptor, &key, &completion, cost).await;

        let record = JobCompletion {
            result: JobResult {
                content: completion.content.clone(),
                model: completion.model.clone(),
                cached: false,
                lint: ctx.lint.clone(),
            },
            usage: completion.usage,
            estimated_cost: cost,
            cache_hit: false,
        };
        match self
            .services
            .store
            .record_completion(&descriptor.job_id, &record)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %descriptor.job_id, "Job already terminal, result not recorded")
            }
            Err(e) => error!(
                job_id = %descriptor.job_id,
                error = %e,
                "Failed to persist result after a successful call, acknowledging anyway"
            ),
        }
        ctx.record_timing(Stage::Persist, started);

        self.notify(
            &descriptor,
            JobStatus::Completed,
            json!({
                "message": "Analysis completed",
                "cached": false,
                "tokens_used": completion.usage.total_tokens,
                "estimated_cost": cost,
                "elapsed_time": ctx.elapsed().as_secs_f64(),
            }),
        );

        AttemptOutcome::Completed { cache_hit: false }
    }

    /// Checks the job record and moves it to `processing`.
    ///
    /// Yields the terminal status of a job that needs no further work.
    async fn begin(&self, descriptor: &JobDescriptor) -> StageOutcome<Option<JobStatus>> {
        let store = &self.services.store;

        let existing = match store.get(&descriptor.job_id).await {
            Ok(existing) => existing,
            Err(e) => return StageOutcome::Retriable(store_unavailable(e)),
        };

        match existing {
            Some(job) if job.status.is_terminal() => {
                return StageOutcome::Success(Some(job.status));
            }
            Some(_) => {}
            None => {
                warn!(
                    job_id = %descriptor.job_id,
                    "Job record missing, recreating from queue entry"
                );
                match store.create(&Job::from_descriptor(descriptor)).await {
                    Ok(_) | Err(StoreError::DuplicateJob(_)) => {}
                    Err(e) => return StageOutcome::Retriable(store_unavailable(e)),
                }
            }
        }

        match store
            .update_status(&descriptor.job_id, JobStatus::Processing, None, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %descriptor.job_id, "Job already processing, resuming"),
            Err(e) => return StageOutcome::Retriable(store_unavailable(e)),
        }

        self.notify(
            descriptor,
            JobStatus::Processing,
            json!({ "message": format!("Starting {} analysis...", descriptor.kind) }),
        );
        StageOutcome::Success(None)
    }

    fn preflight(&self, descriptor: &JobDescriptor) -> StageOutcome<()> {
        let report = self.services.safety.check(&descriptor.input.file_content);

        if report.safe {
            StageOutcome::Success(())
        } else {
            StageOutcome::Permanent(StageFailure::new(
                Stage::Preflight,
                FailureClass::PermanentContent,
                format!("Security check failed: {}", report.issues.join("; ")),
            ))
        }
    }

    /// Lints review and debug input. Linter errors are logged and ignored.
    async fn lint(&self, descriptor: &JobDescriptor) -> Option<LintReport> {
        if descriptor.kind == JobKind::Architecture {
            return None;
        }

        match self.services.linter.lint(&descriptor.input).await {
            Ok(report) => {
                debug!(
                    job_id = %descriptor.job_id,
                    issues = report.issues.len(),
                    skipped = report.skipped,
                    "Lint finished"
                );
                Some(report)
            }
            Err(e) => {
                warn!(
                    job_id = %descriptor.job_id,
                    error = %e,
                    "Lint failed, continuing without it"
                );
                None
            }
        }
    }

    async fn complete_from_cache(
        &self,
        ctx: &mut ExecutionContext,
        hit: CachedResponse,
    ) -> AttemptOutcome {
        let descriptor = &ctx.descriptor;
        let started = Instant::now();

        let record = JobCompletion {
            result: JobResult {
                content: hit.content,
                model: hit.model,
                cached: true,
                lint: ctx.lint.clone(),
            },
            usage: hit.usage,
            estimated_cost: 0.0,
            cache_hit: true,
        };

        match self
            .services
            .store
            .record_completion(&descriptor.job_id, &record)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(
                job_id = %descriptor.job_id,
                "Job already terminal, cached result not recorded"
            ),
            Err(e) => return AttemptOutcome::Deferred(store_unavailable(e)),
        }

        self.notify(
            descriptor,
            JobStatus::Completed,
            json!({
                "message": "Analysis completed",
                "cached": true,
                "tokens_used": hit.usage.total_tokens,
                "estimated_cost": 0.0,
                "elapsed_time": ctx.elapsed().as_secs_f64(),
            }),
        );
        ctx.record_timing(Stage::Persist, started);

        AttemptOutcome::Completed { cache_hit: true }
    }

    async fn call_with_retry(
        &self,
        ctx: &mut ExecutionContext,
        prompt: &RenderedPrompt,
    ) -> StageOutcome<Completion> {
        let request = prompt.request(&self.config.model);
        let policy = self.config.retry;
        let timeout = self.config.call_timeout;

        loop {
            let attempt = ctx.external_calls;
            ctx.external_calls += 1;

            let started = Instant::now();
            let call = self.services.reasoner.invoke(&request);
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(timeout)),
            };
            let latency = started.elapsed().as_secs_f64();

            let err = match result {
                Ok(completion) => {
                    self.metrics
                        .record_llm_request(&completion.model, true, latency, completion.usage);
                    debug!(
                        job_id = %ctx.descriptor.job_id,
                        attempt = attempt + 1,
                        total_tokens = completion.usage.total_tokens,
                        "Reasoning service responded"
                    );
                    return StageOutcome::Success(completion);
                }
                Err(err) => err,
            };

            self.metrics
                .record_llm_request(&self.config.model, false, latency, TokenUsage::default());

            let class = err.class();
            if !class.is_retriable() {
                return StageOutcome::Permanent(StageFailure::new(
                    Stage::ExternalCall,
                    class,
                    err.to_string(),
                ));
            }

            if attempt >= policy.max_retries {
                return StageOutcome::Permanent(StageFailure::new(
                    Stage::ExternalCall,
                    FailureClass::PermanentUpstream,
                    format!("retries exhausted after {} attempts: {}", attempt + 1, err),
                ));
            }

            let delay = policy.delay_for(attempt);
            warn!(
                job_id = %ctx.descriptor.job_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient reasoning service failure, retrying"
            );
            self.metrics.record_retry();
            ctx.retries += 1;
            tokio::time::sleep(delay).await;
        }
    }

    fn validate(&self, completion: &Completion) -> StageOutcome<()> {
        if completion.content.trim().chars().count() < self.config.min_result_chars {
            return StageOutcome::Permanent(StageFailure::new(
                Stage::Validate,
                FailureClass::PermanentContent,
                "reasoning service returned empty or invalid response",
            ));
        }
        StageOutcome::Success(())
    }

    async fn cache_result(
        &self,
        descriptor: &JobDescriptor,
        key: &CacheKey,
        completion: &Completion,
        cost: f64,
    ) {
        let entry = CachedResponse {
            content: completion.content.clone(),
            usage: completion.usage,
            model: completion.model.clone(),
            estimated_cost: cost,
            cached_at: Utc::now(),
        };
        let ttl = self.services.prompts.cache_ttl(descriptor.kind);
        if !self.services.cache.put(key, &entry, ttl).await {
            warn!(job_id = %descriptor.job_id, "Result not cached, continuing");
        }
    }

    /// Records a permanent failure on the job and notifies subscribers.
    ///
    /// Defers the entry when the store cannot record the failure.
    async fn fail(&self, descriptor: &JobDescriptor, failure: StageFailure) -> AttemptOutcome {
        let error = failure.to_string();

        let applied = match self
            .services
            .store
            .update_status(&descriptor.job_id, JobStatus::Failed, None, Some(&error))
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(
                    job_id = %descriptor.job_id,
                    error = %e,
                    failure = %failure,
                    "Failed to record job failure, leaving entry pending"
                );
                return AttemptOutcome::Deferred(store_unavailable(e));
            }
        };

        if applied {
            self.notify(
                descriptor,
                JobStatus::Failed,
                json!({ "message": "Analysis failed", "error": error }),
            );
        }

        AttemptOutcome::Failed(failure)
    }

    fn notify(&self, descriptor: &JobDescriptor, status: JobStatus, data: serde_json::Value) {
        self.services.notifier.publish(JobEvent::new(
            descriptor.job_id.clone(),
            descriptor.user_id.clone(),
            status,
            data,
        ));
    }
}

fn store_unavailable(e: StoreError) -> StageFailure {
    StageFailure::new(
        Stage::Persist,
        FailureClass::TransientInfra,
        format!("job store unavailable: {}", e),
    )
}
