//! Static analysis run before the external call.
//!
//! Review and debug jobs are linted first; the top issues are appended to
//! the rendered prompt, so they take part in the cache key, and the full
//! report is stored with the job result. Which tools run is up to the
//! [`Linter`] implementation. The default does nothing.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::job::JobInput;

/// Issues rendered into a prompt.
pub const PROMPT_ISSUE_LIMIT: usize = 5;

/// Errors raised by a linter. They never fail the job.
#[derive(Debug, Error)]
pub enum LintError {
    #[error("Linter unavailable: {0}")]
    Unavailable(String),

    #[error("Linter timed out")]
    Timeout,

    #[error("Invalid linter output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LintSeverity::Error => "error",
            LintSeverity::Warning => "warning",
            LintSeverity::Info => "info",
        })
    }
}

/// One issue reported by a linter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub line: u32,
    pub severity: LintSeverity,
    pub message: String,
    /// Rule identifier, e.g. `unused-import`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl LintIssue {
    pub fn new(line: u32, severity: LintSeverity, message: impl Into<String>) -> Self {
        Self {
            line,
            severity,
            message: message.into(),
            rule: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

/// Everything a linter found in one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub issues: Vec<LintIssue>,
    /// Set when no linter applied to the input.
    #[serde(default)]
    pub skipped: bool,
}

impl LintReport {
    pub fn new(issues: Vec<LintIssue>) -> Self {
        Self {
            issues,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            issues: Vec::new(),
            skipped: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, severity: LintSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Prompt section listing the first [`PROMPT_ISSUE_LIMIT`] issues.
    ///
    /// Empty when there are no issues.
    pub fn prompt_section(&self, heading: &str) -> String {
        if self.issues.is_empty() {
            return String::new();
        }
        let mut section = format!("\n\n{}:\nFound {} issues:\n", heading, self.issues.len());
        for issue in self.issues.iter().take(PROMPT_ISSUE_LIMIT) {
            section.push_str(&format!(
                "- Line {}: [{}] {}\n",
                issue.line, issue.severity, issue.message
            ));
        }
        section
    }
}

/// Runs static analysis over submitted code.
#[async_trait]
pub trait Linter: Send + Sync {
    async fn lint(&self, input: &JobInput) -> Result<LintReport, LintError>;
}

/// Linter that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinter;

#[async_trait]
impl Linter for NoopLinter {
    async fn lint(&self, _input: &JobInput) -> Result<LintReport, LintError> {
        Ok(LintReport::skipped())
    }
}
