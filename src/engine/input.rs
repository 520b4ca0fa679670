//! Forward-pass input construction.
//!
//! The attention mask and position ids are rebuilt from the number of
//! positions already cached on every call; nothing about them is carried
//! between calls.

use super::error::InferenceError;

/// Maximum positions a single forward pass may cover (cache + new tokens).
pub const MAX_POSITIONS: usize = 1 << 20;

/// Input for one forward pass of a causal model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardInput {
    /// New token ids fed in this pass.
    pub input_ids: Vec<u32>,
    /// Attention mask over cached + new positions (1 = attend).
    pub attention_mask: Vec<u32>,
    /// Position id for each new token.
    pub position_ids: Vec<u32>,
}

impl ForwardInput {
    /// Build the input for `ids` continuing after `past_len` cached positions.
    ///
    /// The mask is all ones over `past_len + ids.len()` positions and the
    /// position ids run `past_len..past_len + ids.len()`.
    pub fn continuing(ids: &[u32], past_len: usize) -> Result<Self, InferenceError> {
        if ids.is_empty() {
            return Err(InferenceError::InputValidation(
                "forward input cannot be empty".into(),
            ));
        }
        let total = past_len + ids.len();
        if total > MAX_POSITIONS {
            return Err(InferenceError::InputValidation(format!(
                "{} positions exceeds limit of {}",
                total, MAX_POSITIONS
            )));
        }

        Ok(Self {
            input_ids: ids.to_vec(),
            attention_mask: vec![1; total],
            position_ids: (past_len..total).map(|p| p as u32).collect(),
        })
    }

    /// Number of new tokens.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Positions the input claims are already cached.
    pub fn past_len(&self) -> usize {
        self.attention_mask.len().saturating_sub(self.input_ids.len())
    }

    /// Check internal consistency against the cache the model was handed.
    pub fn validate(&self, cached: usize) -> Result<(), InferenceError> {
        if self.input_ids.is_empty() {
            return Err(InferenceError::InputValidation(
                "forward input cannot be empty".into(),
            ));
        }
        if self.position_ids.len() != self.input_ids.len() {
            return Err(InferenceError::InputValidation(format!(
                "{} position ids for {} tokens",
                self.position_ids.len(),
                self.input_ids.len()
            )));
        }
        if self.attention_mask.len() != cached + self.input_ids.len() {
            return Err(InferenceError::InputValidation(format!(
                "attention mask covers {} positions, cache + input is {}",
                self.attention_mask.len(),
                cached + self.input_ids.len()
            )));
        }
        Ok(())
    }
}
