//! Reasoning service integration.
//!
//! - [`ReasoningClient`]: single-attempt interface the pipeline calls
//! - [`OpenRouterClient`]: OpenAI-compatible HTTP implementation
//! - [`ModelPricing`]: dollar cost estimation from token usage
//!
//! ```ignore
//! use insight_worker::llm::{OpenRouterClient, ReasoningClient, ReasoningRequest};
//!
//! let client = OpenRouterClient::with_key(std::env::var("OPENROUTER_API_KEY")?)?;
//! let completion = client
//!     .invoke(&ReasoningRequest::new("You review code.", source).with_max_output(2048))
//!     .await?;
//! ```

pub mod client;
pub mod cost;
pub mod providers;

pub use client::{Completion, Message, ReasoningClient, ReasoningRequest};
pub use cost::ModelPricing;
pub use providers::openrouter::{DEFAULT_MODEL, OPENROUTER_BASE_URL};
pub use providers::OpenRouterClient;
