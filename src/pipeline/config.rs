//! Configuration for the worker and its pipeline.
//!
//! Values come from environment variables with sensible defaults. CLI flags
//! override individual fields through the `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{ModelPricing, DEFAULT_MODEL, OPENROUTER_BASE_URL};
use crate::scheduler::queue::StreamSettings;
use crate::scheduler::worker_pool::WorkerPoolConfig;

use super::retry::RetryPolicy;

/// Errors that can occur during configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Settings of a single job attempt.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard timeout of one external call.
    pub call_timeout: Duration,
    /// Backoff schedule for transient upstream failures.
    pub retry: RetryPolicy,
    /// Shortest acceptable result, in trimmed characters.
    pub min_result_chars: usize,
    /// Model requested from the reasoning service.
    pub model: String,
    /// Pricing used for cost estimates.
    pub pricing: ModelPricing,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            min_result_chars: 10,
            model: DEFAULT_MODEL.to_string(),
            pricing: ModelPricing::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "call_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::ValidationFailed(
                "retry max_delay cannot be shorter than base_delay".to_string(),
            ));
        }

        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if self.pricing.input_per_1k < 0.0 || self.pricing.output_per_1k < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "pricing cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the external call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method to set the minimum result length.
    pub fn with_min_result_chars(mut self, chars: usize) -> Self {
        self.min_result_chars = chars;
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set pricing.
    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Everything the `worker` process needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Job store URL. Without one the worker cannot run.
    pub database_url: Option<String>,
    pub queue: StreamSettings,
    pub pool: WorkerPoolConfig,
    pub pipeline: PipelineConfig,
    pub api_key: Option<String>,
    pub api_base: String,
    /// YAML prompt library overriding the built-in one.
    pub prompts_file: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: None,
            queue: StreamSettings::default(),
            pool: WorkerPoolConfig::default(),
            pipeline: PipelineConfig::default(),
            api_key: None,
            api_base: OPENROUTER_BASE_URL.to_string(),
            prompts_file: None,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `INSIGHT_STREAM`: Stream key (default: review_jobs)
    /// - `INSIGHT_GROUP`: Consumer group (default: review_workers)
    /// - `INSIGHT_CONSUMER`: Consumer name (default: worker_1)
    /// - `INSIGHT_CONCURRENCY`: Concurrent attempts (default: 5)
    /// - `INSIGHT_BLOCK_MS`: Blocking claim timeout in ms (default: 5000)
    /// - `INSIGHT_LIVENESS_SECS`: Idle time before reclaim (default: 300)
    /// - `INSIGHT_MAX_DELIVERIES`: Deliveries before dead-lettering (default: 5)
    /// - `INSIGHT_CALL_TIMEOUT_SECS`: External call timeout (default: 60)
    /// - `INSIGHT_MAX_RETRIES`: Retries after the first call (default: 3)
    /// - `INSIGHT_RETRY_BASE_MS`: First backoff delay (default: 1000)
    /// - `INSIGHT_RETRY_MAX_MS`: Backoff ceiling (default: 30000)
    /// - `INSIGHT_MIN_RESULT_CHARS`: Shortest accepted result (default: 10)
    /// - `INSIGHT_MODEL`: Model name (default: anthropic/claude-sonnet-4.5)
    /// - `OPENROUTER_API_KEY`: Reasoning service API key
    /// - `OPENROUTER_URL`: Reasoning service base URL
    /// - `INSIGHT_PROMPTS_FILE`: YAML prompt library
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable values and
    /// `ConfigError::ValidationFailed` if the result is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }
        config.database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());

        // Stream settings
        if let Some(val) = lookup("INSIGHT_STREAM") {
            config.queue.stream = val;
        }
        if let Some(val) = lookup("INSIGHT_GROUP") {
            config.queue.group = val;
        }
        if let Some(val) = lookup("INSIGHT_CONSUMER") {
            config.queue.consumer = val;
        }
        if let Some(val) = lookup("INSIGHT_LIVENESS_SECS") {
            let secs: u64 = parse_env_value(&val, "INSIGHT_LIVENESS_SECS")?;
            config.queue.liveness_timeout = Duration::from_secs(secs);
        }

        // Pool settings
        if let Some(val) = lookup("INSIGHT_CONCURRENCY") {
            config.pool.concurrency = parse_env_value(&val, "INSIGHT_CONCURRENCY")?;
        }
        if let Some(val) = lookup("INSIGHT_BLOCK_MS") {
            let ms: u64 = parse_env_value(&val, "INSIGHT_BLOCK_MS")?;
            config.pool.block_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("INSIGHT_MAX_DELIVERIES") {
            config.pool.max_deliveries = parse_env_value(&val, "INSIGHT_MAX_DELIVERIES")?;
        }

        // Pipeline settings
        if let Some(val) = lookup("INSIGHT_CALL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "INSIGHT_CALL_TIMEOUT_SECS")?;
            config.pipeline.call_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("INSIGHT_MAX_RETRIES") {
            config.pipeline.retry.max_retries = parse_env_value(&val, "INSIGHT_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("INSIGHT_RETRY_BASE_MS") {
            let ms: u64 = parse_env_value(&val, "INSIGHT_RETRY_BASE_MS")?;
            config.pipeline.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("INSIGHT_RETRY_MAX_MS") {
            let ms: u64 = parse_env_value(&val, "INSIGHT_RETRY_MAX_MS")?;
            config.pipeline.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("INSIGHT_MIN_RESULT_CHARS") {
            config.pipeline.min_result_chars = parse_env_value(&val, "INSIGHT_MIN_RESULT_CHARS")?;
        }
        if let Some(val) = lookup("INSIGHT_MODEL") {
            config.pipeline.model = val;
        }

        // Reasoning service
        config.api_key = lookup("OPENROUTER_API_KEY").filter(|v| !v.is_empty());
        if let Some(val) = lookup("OPENROUTER_URL") {
            config.api_base = val;
        }

        config.prompts_file = lookup("INSIGHT_PROMPTS_FILE").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.queue.stream.is_empty() || self.queue.group.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "stream and group names cannot be empty".to_string(),
            ));
        }

        if self.queue.consumer.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "consumer name cannot be empty".to_string(),
            ));
        }

        if self.pool.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.pool.max_deliveries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_deliveries must be greater than 0".to_string(),
            ));
        }

        if self.queue.liveness_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "liveness timeout must be greater than 0".to_string(),
            ));
        }

        self.pipeline.validate()
    }

    /// Returns the database URL or the error to report when it is missing.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set the consumer name.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.queue.consumer = consumer.into();
        self
    }

    /// Builder method to set concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool.concurrency = concurrency;
        self
    }

    /// Builder method to set the pipeline configuration.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Builder method to set the prompt library file.
    pub fn with_prompts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompts_file = Some(path.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert!(config.database_url.is_none());
        assert_eq!(config.queue.stream, "review_jobs");
        assert_eq!(config.queue.group, "review_workers");
        assert_eq!(config.queue.consumer, "worker_1");
        assert_eq!(config.pool.concurrency, 5);
        assert_eq!(config.pipeline.call_timeout, Duration::from_secs(60));
        assert_eq!(config.pipeline.retry.max_retries, 3);
        assert_eq!(config.pipeline.min_result_chars, 10);
        assert_eq!(config.pipeline.model, "anthropic/claude-sonnet-4.5");
        assert_eq!(config.api_base, "https://openrouter.ai/api/v1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache:6380"),
            ("DATABASE_URL", "postgres://db/insight"),
            ("INSIGHT_STREAM", "jobs"),
            ("INSIGHT_CONSUMER", "worker_7"),
            ("INSIGHT_CONCURRENCY", "12"),
            ("INSIGHT_BLOCK_MS", "250"),
            ("INSIGHT_LIVENESS_SECS", "30"),
            ("INSIGHT_MAX_DELIVERIES", "2"),
            ("INSIGHT_CALL_TIMEOUT_SECS", "15"),
            ("INSIGHT_MAX_RETRIES", "1"),
            ("INSIGHT_RETRY_BASE_MS", "10"),
            ("INSIGHT_RETRY_MAX_MS", "100"),
            ("INSIGHT_MIN_RESULT_CHARS", "3"),
            ("INSIGHT_MODEL", "openai/gpt-4o"),
            ("OPENROUTER_API_KEY", "sk-test"),
            ("INSIGHT_PROMPTS_FILE", "/etc/insight/prompts.yaml"),
        ]))
        .expect("config should load");

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/insight"));
        assert_eq!(config.queue.stream, "jobs");
        assert_eq!(config.queue.group, "review_workers");
        assert_eq!(config.queue.consumer, "worker_7");
        assert_eq!(config.queue.liveness_timeout, Duration::from_secs(30));
        assert_eq!(config.pool.concurrency, 12);
        assert_eq!(config.pool.block_timeout, Duration::from_millis(250));
        assert_eq!(config.pool.max_deliveries, 2);
        assert_eq!(config.pipeline.call_timeout, Duration::from_secs(15));
        assert_eq!(config.pipeline.retry.max_retries, 1);
        assert_eq!(config.pipeline.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.pipeline.retry.max_delay, Duration::from_millis(100));
        assert_eq!(config.pipeline.min_result_chars, 3);
        assert_eq!(config.pipeline.model, "openai/gpt-4o");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.prompts_file,
            Some(PathBuf::from("/etc/insight/prompts.yaml"))
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = WorkerConfig::from_lookup(lookup_from(&[("INSIGHT_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("INSIGHT_CONCURRENCY"));
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn test_from_lookup_validates() {
        let err = WorkerConfig::from_lookup(lookup_from(&[("INSIGHT_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let config = WorkerConfig::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "")]))
            .expect("config should load");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_require_database_url() {
        let config = WorkerConfig::default();
        let err = config.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = config.with_database_url("postgres://localhost/insight");
        assert_eq!(
            config.require_database_url().expect("url should be set"),
            "postgres://localhost/insight"
        );
    }

    #[test]
    fn test_pipeline_validation() {
        assert!(PipelineConfig::default().validate().is_ok());

        let err = PipelineConfig::default()
            .with_call_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("call_timeout"));

        let err = PipelineConfig::default().with_model("").validate().unwrap_err();
        assert!(err.to_string().contains("model"));

        let err = PipelineConfig::default()
            .with_retry(RetryPolicy::new(
                3,
                Duration::from_secs(10),
                Duration::from_secs(1),
            ))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_delay"));

        let err = PipelineConfig::default()
            .with_pricing(ModelPricing::new(-1.0, 0.0))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("pricing"));
    }

    #[test]
    fn test_builders() {
        let config = WorkerConfig::new()
            .with_redis_url("redis://other")
            .with_consumer("worker_9")
            .with_concurrency(2)
            .with_pipeline(PipelineConfig::new().with_min_result_chars(1))
            .with_prompts_file("prompts.yaml");

        assert_eq!(config.redis_url, "redis://other");
        assert_eq!(config.queue.consumer, "worker_9");
        assert_eq!(config.pool.concurrency, 2);
        assert_eq!(config.pipeline.min_result_chars, 1);
        assert_eq!(config.prompts_file, Some(PathBuf::from("prompts.yaml")));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert!(err.to_string().contains("TEST_VAR"));

        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));
    }
}
