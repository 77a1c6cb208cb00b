//! Reasoning service providers.

pub mod openrouter;

pub use openrouter::OpenRouterClient;
