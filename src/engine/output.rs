//! Generation output types.

use serde::Serialize;

use super::stats::SpeculativeStats;

/// Reason why text generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Model emitted stop token naturally.
    Stop,
    /// Sequence reached the length budget.
    MaxTokens,
    /// Wall-clock time budget ran out between iterations.
    Timeout,
    /// Caller asked to stop between iterations.
    Cancelled,
}

impl FinishReason {
    /// True if the loop ended because of an external budget or request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }
}

/// Token-level result of a decoding run.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeOutput {
    /// Prompt followed by every generated token.
    pub tokens: Vec<u32>,
    /// Number of leading prompt tokens in `tokens`.
    pub prompt_len: usize,
    /// Reason generation stopped.
    pub finish_reason: FinishReason,
    /// Counters collected during the run.
    pub stats: SpeculativeStats,
}

impl DecodeOutput {
    /// Generated tokens only.
    pub fn generated(&self) -> &[u32] {
        &self.tokens[self.prompt_len.min(self.tokens.len())..]
    }
}

/// Result of text generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    /// Generated text output (prompt excluded).
    pub text: String,
    /// Number of tokens generated.
    pub tokens_generated: u32,
    /// Reason generation stopped.
    pub finish_reason: FinishReason,
    pub stats: SpeculativeStats,
}
