//! Stage results and per-attempt state.

use std::time::{Duration, Instant};

use crate::cache::CacheKey;
use crate::error::FailureClass;
use crate::lint::LintReport;
use crate::scheduler::job::JobDescriptor;

/// Ordered stages of one job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preflight,
    Lint,
    CacheCheck,
    ExternalCall,
    Validate,
    Persist,
    /// Outside any stage: delivery cap, task panic.
    Dispatch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Lint => "lint",
            Stage::CacheCheck => "cache_check",
            Stage::ExternalCall => "external_call",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
            Stage::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified stage failure.
///
/// Its `Display` form, `"<class>: <message>"`, is what gets stored as the
/// job's error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub class: FailureClass,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            stage,
            class,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Success(T),
    Retriable(StageFailure),
    Permanent(StageFailure),
}

/// State of one job attempt. Dropped when the attempt ends.
#[derive(Debug)]
pub struct ExecutionContext {
    pub descriptor: JobDescriptor,
    /// Static analysis findings, stored with the result.
    pub lint: Option<LintReport>,
    /// Fingerprint of the rendered prompt, once computed.
    pub cache_key: Option<CacheKey>,
    /// External calls made, retries included.
    pub external_calls: u32,
    /// External call retries performed so far.
    pub retries: u32,
    pub started_at: Instant,
    pub timings: Vec<(Stage, Duration)>,
}

impl ExecutionContext {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            lint: None,
            cache_key: None,
            external_calls: 0,
            retries: 0,
            started_at: Instant::now(),
            timings: Vec::new(),
        }
    }

    /// Records how long a stage took.
    pub fn record_timing(&mut self, stage: Stage, since: Instant) {
        self.timings.push((stage, since.elapsed()));
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = StageFailure::new(
            Stage::Validate,
            FailureClass::PermanentContent,
            "reasoning service returned empty or invalid response",
        );
        assert_eq!(
            failure.to_string(),
            "permanent_content: reasoning service returned empty or invalid response"
        );
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Lint.to_string(), "lint");
        assert_eq!(Stage::CacheCheck.to_string(), "cache_check");
        assert_eq!(Stage::Dispatch.as_str(), "dispatch");
    }
}
