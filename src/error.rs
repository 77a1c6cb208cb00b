//! Error types shared across the worker.
//!
//! Subsystem errors (queue, cache, store, config) live next to the code that
//! raises them. This module holds the reasoning-service error and the
//! failure taxonomy every pipeline stage reports against.

use std::time::Duration;

use thiserror::Error;

/// Classification of a failed stage, driving retry and acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Queue, cache or job store unreachable. The entry is left unacknowledged.
    TransientInfra,
    /// Connection reset, timeout, 5xx or rate limiting from the reasoning service.
    TransientUpstream,
    /// Input rejected by preflight or output rejected by validation.
    PermanentContent,
    /// Authentication, malformed request or quota rejection.
    PermanentUpstream,
}

impl FailureClass {
    /// Returns whether a failure of this class may succeed if attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FailureClass::TransientInfra | FailureClass::TransientUpstream
        )
    }

    /// Returns the label used in logs, metrics and persisted error strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::TransientInfra => "transient_infra",
            FailureClass::TransientUpstream => "transient_upstream",
            FailureClass::PermanentContent => "permanent_content",
            FailureClass::PermanentUpstream => "permanent_upstream",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while calling the reasoning service.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Maps the error onto the pipeline failure taxonomy.
    ///
    /// Rate limiting is treated as transient and retried with backoff; an
    /// explicit quota rejection (HTTP 402) is permanent.
    pub fn class(&self) -> FailureClass {
        match self {
            LlmError::RequestFailed(_) | LlmError::Timeout(_) | LlmError::RateLimited(_) => {
                FailureClass::TransientUpstream
            }
            LlmError::ApiError { code, .. } if *code >= 500 || *code == 408 || *code == 429 => {
                FailureClass::TransientUpstream
            }
            LlmError::MissingApiKey
            | LlmError::ParseError(_)
            | LlmError::QuotaExceeded(_)
            | LlmError::ApiError { .. } => FailureClass::PermanentUpstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert_eq!(
            LlmError::RequestFailed("connection reset by peer".to_string()).class(),
            FailureClass::TransientUpstream
        );
        assert_eq!(
            LlmError::Timeout(Duration::from_secs(60)).class(),
            FailureClass::TransientUpstream
        );
        assert_eq!(
            LlmError::RateLimited("slow down".to_string()).class(),
            FailureClass::TransientUpstream
        );
        for code in [500, 502, 503, 504, 408, 429] {
            let err = LlmError::ApiError {
                code,
                message: "upstream".to_string(),
            };
            assert!(err.class().is_retriable(), "code {} should retry", code);
        }
    }

    #[test]
    fn test_permanent_errors() {
        for code in [400, 401, 403, 404, 422] {
            let err = LlmError::ApiError {
                code,
                message: "rejected".to_string(),
            };
            assert_eq!(err.class(), FailureClass::PermanentUpstream);
        }
        assert_eq!(
            LlmError::QuotaExceeded("no credits".to_string()).class(),
            FailureClass::PermanentUpstream
        );
        assert_eq!(LlmError::MissingApiKey.class(), FailureClass::PermanentUpstream);
    }

    #[test]
    fn test_failure_class_labels() {
        assert_eq!(FailureClass::TransientInfra.to_string(), "transient_infra");
        assert_eq!(
            FailureClass::PermanentContent.to_string(),
            "permanent_content"
        );
        assert!(FailureClass::TransientInfra.is_retriable());
        assert!(!FailureClass::PermanentUpstream.is_retriable());
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::ApiError {
            code: 401,
            message: "invalid key".to_string(),
        };
        assert_eq!(err.to_string(), "API error (401): invalid key");
        assert!(LlmError::Timeout(Duration::from_secs(5))
            .to_string()
            .contains("5s"));
    }
}
