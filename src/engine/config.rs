//! Speculative decoding configuration.
//!
//! All fields have safe defaults. Configuration is validated before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::InferenceError;

/// Canary text used to check that draft and target tokenizers agree.
pub const DEFAULT_CANARY: &str = "Alan Turing was a";

/// Configuration for speculative decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Number of draft tokens proposed per iteration (K). Must be >= 1.
    pub draft_tokens: usize,
    /// Total sequence length budget (N), prompt included.
    pub max_length: usize,
    /// Enable speculative decoding; when false only the target model runs.
    pub enabled: bool,
    /// Stop after the first generated end-of-sequence token.
    pub stop_at_eos: bool,
    /// Canary text for the tokenizer compatibility check.
    pub canary: String,
    /// Wall-clock budget in milliseconds, checked between iterations.
    pub time_budget_ms: Option<u64>,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            draft_tokens: 4,
            max_length: 128,
            enabled: true,
            stop_at_eos: true,
            canary: DEFAULT_CANARY.to_string(),
            time_budget_ms: None,
        }
    }
}

impl SpeculativeConfig {
    /// Set the number of speculative tokens.
    pub fn draft_tokens(mut self, k: usize) -> Self {
        self.draft_tokens = k;
        self
    }

    /// Set the total sequence length budget.
    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = n;
        self
    }

    /// Validate configuration values. Returns error on invalid values.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.draft_tokens == 0 {
            return Err(InferenceError::InputValidation(
                "draft_tokens (K) must be >= 1".into(),
            ));
        }
        if self.max_length == 0 {
            return Err(InferenceError::InputValidation(
                "max_length must be > 0".into(),
            ));
        }
        if self.canary.is_empty() {
            return Err(InferenceError::InputValidation(
                "canary cannot be empty".into(),
            ));
        }
        if self.time_budget_ms == Some(0) {
            return Err(InferenceError::InputValidation(
                "time_budget_ms must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }
}
