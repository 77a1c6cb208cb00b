//! OpenRouter client for the reasoning service.
//!
//! Speaks the OpenAI-compatible `/chat/completions` API. Each call is a
//! single attempt; HTTP failures are mapped onto [`LlmError`] variants so the
//! pipeline can classify them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::client::{Completion, Message, ReasoningClient, ReasoningRequest};
use crate::scheduler::job::TokenUsage;

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Transport-level ceiling; the pipeline applies its own, shorter deadline.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter implementation of [`ReasoningClient`].
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenRouterClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenRouter API key for authentication
    /// * `base_url` - API base URL, without the `/chat/completions` suffix
    /// * `model` - Default model identifier (e.g., "anthropic/claude-sonnet-4.5")
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiKey` for an empty key and
    /// `LlmError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: model.into(),
        })
    }

    /// Creates a client against the public endpoint with the default model.
    pub fn with_key(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(api_key, OPENROUTER_BASE_URL, DEFAULT_MODEL)
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Maps a non-success HTTP response onto an error variant.
fn status_error(status_code: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status_code {
        429 => LlmError::RateLimited(message),
        402 => LlmError::QuotaExceeded(message),
        code => LlmError::ApiError { code, message },
    }
}

fn parse_response(api_response: ApiResponse, fallback_model: &str) -> Result<Completion, LlmError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ParseError("response contained no choices".to_string()))?;

    let usage = api_response.usage.unwrap_or_default();
    let mut tokens = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
    if usage.total_tokens > 0 {
        tokens.total_tokens = usage.total_tokens;
    }

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        usage: tokens,
        model: api_response
            .model
            .unwrap_or_else(|| fallback_model.to_string()),
    })
}

#[async_trait]
impl ReasoningClient for OpenRouterClient {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<Completion, LlmError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let api_request = ApiRequest {
            model: model.clone(),
            messages: request.messages(),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_output),
        };

        let http_response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://insight-worker.local")
            .header("X-Title", "insight-worker")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(status_error(status.as_u16(), &error_text));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        parse_response(api_response, &model)
    }

    fn model(&self) -> &str {
        &self.default_model
    }
}

/// Internal request structure for the OpenRouter API.
#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    #[test]
    fn test_client_new() {
        let client = OpenRouterClient::new("sk-1234567890abcdef", "https://proxy.local/v1/", "m")
            .expect("client should build");

        assert_eq!(client.base_url(), "https://proxy.local/v1");
        assert_eq!(client.endpoint(), "https://proxy.local/v1/chat/completions");
        assert_eq!(client.model(), "m");
        assert_eq!(client.api_key_masked(), "sk-1...cdef");
    }

    #[test]
    fn test_api_key_masked() {
        let client = OpenRouterClient::with_key("sk-or-v1-abcdef123456").expect("client");
        assert_eq!(client.api_key_masked(), "sk-o...3456");

        let short = OpenRouterClient::with_key("short").expect("client");
        assert_eq!(short.api_key_masked(), "*****");

        let wide = OpenRouterClient::with_key("ключ-доступа-éé").expect("client");
        assert_eq!(wide.api_key_masked(), "ключ...а-éé");
    }

    #[test]
    fn test_client_requires_key() {
        assert!(matches!(
            OpenRouterClient::with_key("  "),
            Err(LlmError::MissingApiKey)
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error": {"message": "slow down"}}"#;
        assert!(matches!(status_error(429, body), LlmError::RateLimited(m) if m == "slow down"));
        assert!(matches!(status_error(402, body), LlmError::QuotaExceeded(_)));

        let err = status_error(503, "upstream unavailable");
        assert_eq!(err.class(), FailureClass::TransientUpstream);
        assert!(err.to_string().contains("upstream unavailable"));

        assert_eq!(status_error(401, body).class(), FailureClass::PermanentUpstream);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "id": "gen-1",
            "model": "anthropic/claude-sonnet-4.5",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Looks good."}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }"#;
        let api_response: ApiResponse = serde_json::from_str(raw).expect("should parse");
        let completion = parse_response(api_response, "fallback").expect("should convert");

        assert_eq!(completion.content, "Looks good.");
        assert_eq!(completion.usage, TokenUsage::new(120, 30));
        assert_eq!(completion.model, "anthropic/claude-sonnet-4.5");
    }

    #[test]
    fn test_parse_response_null_content_and_no_choices() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let api_response: ApiResponse = serde_json::from_str(raw).expect("should parse");
        let completion = parse_response(api_response, "fallback").expect("should convert");
        assert_eq!(completion.content, "");
        assert_eq!(completion.model, "fallback");

        let empty: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).expect("should parse");
        assert!(matches!(
            parse_response(empty, "m"),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn test_api_request_serialization() {
        let request = ApiRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("Hello")],
            temperature: Some(0.7),
            max_tokens: Some(1000),
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"test-model\""));
        assert!(json.contains("\"max_tokens\":1000"));
    }

    #[tokio::test]
    async fn test_invoke_connection_error_is_transient() {
        let client = OpenRouterClient::new("test-key", "http://127.0.0.1:9", "test-model")
            .expect("client should build");

        let err = client
            .invoke(&ReasoningRequest::new("sys", "user"))
            .await
            .expect_err("nothing listens on the discard port");
        assert_eq!(err.class(), FailureClass::TransientUpstream);
    }
}
