//! Integration tests for the reasoning service client.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use insight_worker::llm::{OpenRouterClient, ReasoningClient, ReasoningRequest};
use insight_worker::pipeline::PromptLibrary;
use insight_worker::scheduler::{JobInput, JobKind};
use insight_worker::{FailureClass, LlmError};

fn get_test_api_key() -> String {
    std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests")
}

fn create_test_client() -> OpenRouterClient {
    OpenRouterClient::with_key(get_test_api_key()).expect("client should build")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = ReasoningRequest::new(
        "You are a helpful assistant. Reply concisely.",
        "What is 2 + 2? Reply with just the number.",
    )
    .with_max_output(10)
    .with_temperature(0.0);

    let completion = client.invoke(&request).await;
    assert!(completion.is_ok(), "Invocation failed: {:?}", completion.err());

    let completion = completion.expect("Should have completion");
    assert!(
        completion.content.contains('4'),
        "Response should contain '4', got: {}",
        completion.content
    );
    assert!(completion.usage.total_tokens > 0, "Should have token usage");
    assert!(!completion.model.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_rendered_review_prompt() {
    let client = create_test_client();
    let library = PromptLibrary::default();

    let input = JobInput::new(
        "python",
        "divide.py",
        "def divide(a, b):\n    return a / b\n",
    );
    let prompt = library
        .render(JobKind::Review, &input)
        .expect("default prompt should render");

    let completion = client
        .invoke(&prompt.request(client.model()).with_max_output(300))
        .await
        .expect("review should succeed");

    assert!(
        completion.content.trim().len() > 10,
        "Review should not be trivially short: {}",
        completion.content
    );
}

#[tokio::test]
#[ignore]
async fn test_invalid_key_is_permanent() {
    let client =
        OpenRouterClient::with_key("sk-or-invalid-key-for-tests").expect("client should build");
    let request = ReasoningRequest::new("Reply with OK.", "ping").with_max_output(5);

    let err = client
        .invoke(&request)
        .await
        .expect_err("an invalid key should be rejected");

    assert!(
        matches!(err, LlmError::ApiError { code: 401, .. } | LlmError::ApiError { code: 403, .. }),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(err.class(), FailureClass::PermanentUpstream);
}

#[test]
fn test_empty_key_is_rejected() {
    assert!(matches!(
        OpenRouterClient::with_key("  "),
        Err(LlmError::MissingApiKey)
    ));
}
