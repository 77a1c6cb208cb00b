//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users and tests never need a registry.

use crate::scheduler::job::{JobKind, TokenUsage};

use super::prometheus::{
    CACHE_LOOKUPS, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, LLM_LATENCY, LLM_REQUESTS_TOTAL,
    LLM_TOKENS_TOTAL, QUEUE_DEPTH, RETRIES_TOTAL,
};

/// Metrics collector for recording worker metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished job attempt.
    ///
    /// # Arguments
    ///
    /// * `kind` - Job kind
    /// * `status` - Attempt outcome (e.g., "completed", "failed", "deferred")
    /// * `duration_secs` - Attempt duration in seconds
    pub fn record_job(&self, kind: JobKind, status: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total
                .with_label_values(&[kind.as_str(), status])
                .inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[kind.as_str()])
                .observe(duration_secs);
        }

        tracing::trace!(
            kind = %kind,
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record a reasoning service request.
    pub fn record_llm_request(
        &self,
        model: &str,
        success: bool,
        latency_secs: f64,
        tokens: TokenUsage,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if success {
            if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
                llm_tokens
                    .with_label_values(&[model, "input"])
                    .inc_by(f64::from(tokens.prompt_tokens));
                llm_tokens
                    .with_label_values(&[model, "output"])
                    .inc_by(f64::from(tokens.completion_tokens));
            }
        }

        tracing::trace!(
            model = model,
            status = status,
            latency_secs = latency_secs,
            prompt_tokens = tokens.prompt_tokens,
            completion_tokens = tokens.completion_tokens,
            "Recorded LLM request metric"
        );
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if let Some(lookups) = CACHE_LOOKUPS.get() {
            lookups
                .with_label_values(&[if hit { "hit" } else { "miss" }])
                .inc();
        }
    }

    pub fn record_retry(&self) {
        if let Some(retries) = RETRIES_TOTAL.get() {
            retries.inc();
        }
    }

    /// Update the stream length gauge.
    pub fn update_queue_depth(&self, stream: &str, depth: u64) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.with_label_values(&[stream]).set(depth as f64);
        }

        tracing::trace!(stream = stream, depth = depth, "Updated queue depth metric");
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}
