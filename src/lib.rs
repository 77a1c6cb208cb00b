//! insight-worker: asynchronous analysis job processing.
//!
//! Accepts code review, debug diagnosis and architecture jobs, runs them
//! against an external reasoning service and records each result exactly
//! once, skipping calls whose answer is already cached.

pub mod cache;
pub mod cli;
pub mod error;
pub mod lint;
pub mod llm;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod safety;
pub mod scheduler;
pub mod storage;

// Re-export commonly used error types
pub use error::{FailureClass, LlmError};
