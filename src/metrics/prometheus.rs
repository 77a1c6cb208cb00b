//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the worker and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all worker metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of finished job attempts, labeled by kind and outcome.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job attempt duration in seconds, labeled by kind.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of entries in the stream, labeled by stream name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of job attempts currently running.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Response cache lookups, labeled by result (hit/miss).
pub static CACHE_LOOKUPS: OnceLock<CounterVec> = OnceLock::new();

/// Total reasoning service requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Reasoning service latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total retries of the external call.
pub static RETRIES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registration in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("insight_worker_jobs_total", "Total number of finished job attempts"),
        &["kind", "status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "insight_worker_job_duration_seconds",
            "Job attempt duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 180.0]),
        &["kind"],
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("insight_worker_queue_depth", "Number of entries in the stream"),
        &["stream"],
    )?;

    let jobs_in_progress = Gauge::new(
        "insight_worker_jobs_in_progress",
        "Number of job attempts currently running",
    )?;

    // Cache metrics
    let cache_lookups = CounterVec::new(
        Opts::new("insight_worker_cache_lookups_total", "Response cache lookups"),
        &["result"],
    )?;

    // Reasoning service metrics
    let llm_requests_total = CounterVec::new(
        Opts::new(
            "insight_worker_llm_requests_total",
            "Total reasoning service requests",
        ),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "insight_worker_llm_latency_seconds",
            "Reasoning service request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("insight_worker_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let retries_total = Counter::new(
        "insight_worker_retries_total",
        "Total retries of the reasoning service call",
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(cache_lookups.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = CACHE_LOOKUPS.set(cache_lookups);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = RETRIES_TOTAL.set(retries_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
