//! Job pipeline: one attempt of one job, stage by stage.
//!
//! # Architecture
//!
//! - **Orchestrator**: Runs an attempt and classifies how it ended
//! - **Stages**: Explicit stage results (`StageOutcome`) and per-attempt state
//! - **Prompts**: Per-kind instructions and templates, optionally from YAML
//! - **Retry**: Exponential backoff for transient upstream failures
//! - **Config**: Worker and pipeline configuration from the environment
//!
//! # Pipeline Flow
//!
//! 1. **Begin**: Skip jobs already terminal, move the job to `processing`
//! 2. **Preflight**: Reject oversized input or input carrying secrets
//! 3. **Lint**: Run static analysis on review and debug input
//! 4. **Cache check**: Render the prompt with lint findings, fingerprint it,
//!    look it up
//! 5. **External call**: Call the reasoning service under a timeout, retrying
//!    transient failures with backoff
//! 6. **Validate**: Reject empty or trivially short output
//! 7. **Persist**: Cache the result, record it on the job
//! 8. **Notify**: Publish the status change
//!
//! Permanent failures are recorded on the job and the queue entry is
//! acknowledged. Infrastructure failures, including a failure that could not
//! be recorded, leave the entry pending so another delivery can retry it.
//!
//! # Example
//!
//! ```rust,ignore
//! use insight_worker::pipeline::{PipelineOrchestrator, PipelineServices, WorkerConfig};
//!
//! let config = WorkerConfig::from_env()?;
//! let orchestrator = PipelineOrchestrator::new(config.pipeline, services);
//! let outcome = orchestrator.process(&entry.descriptor).await;
//! if outcome.should_ack() {
//!     queue.acknowledge(&entry.id).await?;
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod stages;

// Re-export main types for convenience
pub use config::{ConfigError, PipelineConfig, WorkerConfig};
pub use orchestrator::{AttemptOutcome, PipelineOrchestrator, PipelineServices, PipelineStats};
pub use prompts::{KindPrompt, PromptError, PromptLibrary, RenderedPrompt, StackTraceAnalysis};
pub use retry::RetryPolicy;
pub use stages::{ExecutionContext, Stage, StageFailure, StageOutcome};
