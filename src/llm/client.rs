//! Reasoning service interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::scheduler::job::TokenUsage;

/// A single message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system" or "user").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One call to the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub system_instruction: String,
    pub user_input: String,
    /// Upper bound on generated tokens.
    pub max_output: u32,
    pub temperature: f64,
    /// Overrides the client's default model.
    pub model: Option<String>,
}

impl ReasoningRequest {
    pub fn new(system_instruction: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            user_input: user_input.into(),
            max_output: 4096,
            temperature: 0.7,
            model: None,
        }
    }

    pub fn with_max_output(mut self, max_output: u32) -> Self {
        self.max_output = max_output;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns the system and user messages of the request.
    pub fn messages(&self) -> Vec<Message> {
        vec![
            Message::system(&self.system_instruction),
            Message::user(&self.user_input),
        ]
    }
}

/// Content returned by the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that produced the content.
    pub model: String,
}

/// Client for the external reasoning service.
///
/// Implementations make exactly one attempt per call; retry, timeout and
/// classification are the caller's concern.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<Completion, LlmError>;

    /// Default model used when a request does not name one.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_and_messages() {
        let request = ReasoningRequest::new("You review code.", "fn main() {}")
            .with_max_output(2048)
            .with_temperature(0.5)
            .with_model("custom/model");

        assert_eq!(request.max_output, 2048);
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.model.as_deref(), Some("custom/model"));

        let messages = request.messages();
        assert_eq!(messages[0], Message::system("You review code."));
        assert_eq!(messages[1].role, "user");
    }
}
