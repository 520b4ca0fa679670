//! Inference error types for speculative decoding.
//!
//! All errors are fail-closed: a failed forward pass or a cache that does not
//! line up with the sequence ends the generation, nothing is patched up.

use thiserror::Error;

use super::tokenizer::TokenizerError;
use crate::memory::KvCacheError;

/// Errors that can occur while running draft/verifier inference.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Input validation failed: {0}")]
    InputValidation(String),

    #[error(
        "Tokenizer mismatch on canary {canary:?}: draft fingerprint {draft}, target fingerprint {target}"
    )]
    TokenizerMismatch {
        canary: String,
        draft: String,
        target: String,
    },

    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("KV cache error: {0}")]
    Cache(#[from] KvCacheError),

    #[error("KV cache desync for {model} model: expected {expected} positions, found {actual}")]
    CacheDesync {
        model: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl InferenceError {
    /// Returns true if this error was raised before any decoding started.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(
            self,
            Self::TokenizerMismatch { .. } | Self::InputValidation(_)
        )
    }

    /// Returns true if this error should be logged as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::InputValidation(_))
    }
}
