//! Cost estimation for reasoning service usage.

use serde::{Deserialize, Serialize};

use crate::scheduler::job::TokenUsage;

/// Per-1K-token pricing in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        }
    }
}

impl ModelPricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Estimated dollar cost of a call.
    ///
    /// # Example
    ///
    /// ```
    /// use insight_worker::llm::ModelPricing;
    /// use insight_worker::scheduler::TokenUsage;
    ///
    /// let cost = ModelPricing::default().estimate(&TokenUsage::new(1000, 1000));
    /// assert!((cost - 0.018).abs() < 1e-9);
    /// ```
    pub fn estimate(&self, usage: &TokenUsage) -> f64 {
        let input = f64::from(usage.prompt_tokens) / 1000.0 * self.input_per_1k;
        let output = f64::from(usage.completion_tokens) / 1000.0 * self.output_per_1k;
        input + output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_default_pricing() {
        let pricing = ModelPricing::default();
        let cost = pricing.estimate(&TokenUsage::new(2000, 500));
        assert!((cost - (0.006 + 0.0075)).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_zero_usage() {
        assert_eq!(ModelPricing::default().estimate(&TokenUsage::default()), 0.0);
    }
}
