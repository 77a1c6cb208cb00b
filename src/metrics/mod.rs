//! Metrics module for Prometheus-based monitoring.
//!
//! Covers job attempts, queue depth, cache effectiveness and reasoning
//! service usage.
//!
//! # Example
//!
//! ```ignore
//! use insight_worker::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_job(JobKind::Review, "completed", 4.2);
//!
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    CACHE_LOOKUPS, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, LLM_LATENCY, LLM_REQUESTS_TOTAL,
    LLM_TOKENS_TOTAL, QUEUE_DEPTH, REGISTRY, RETRIES_TOTAL,
};
