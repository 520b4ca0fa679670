//! Model inference interface.
//!
//! A model is an opaque forward-pass service. Its KV cache is passed in by
//! value and the grown cache is handed back, so the decoding loop always
//! owns both caches between calls.

use std::sync::Arc;

use candle_core::Tensor;

use super::error::InferenceError;
use super::input::ForwardInput;
use crate::memory::KvCache;

/// Result of one forward pass.
#[derive(Debug)]
pub struct ForwardOutput {
    /// Logits for every input position, shape `[input_len, vocab]`.
    pub logits: Tensor,
    /// Cache after the pass, grown by `input_len` positions.
    pub cache: KvCache,
}

/// Autoregressive model usable as either draft or verifier.
pub trait CausalModel {
    /// Model identifier used in logs.
    fn model_id(&self) -> &str;

    /// Vocabulary size of the output logits.
    fn vocab_size(&self) -> usize;

    /// Fresh, empty cache shaped for this model.
    fn new_cache(&self) -> KvCache;

    /// End-of-sequence token, if the model has one.
    fn eos_token(&self) -> Option<u32> {
        None
    }

    /// Run the model over `input` on top of `cache`.
    fn forward(&self, input: &ForwardInput, cache: KvCache)
        -> Result<ForwardOutput, InferenceError>;
}

impl<M: CausalModel + ?Sized> CausalModel for &M {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn new_cache(&self) -> KvCache {
        (**self).new_cache()
    }

    fn eos_token(&self) -> Option<u32> {
        (**self).eos_token()
    }

    fn forward(
        &self,
        input: &ForwardInput,
        cache: KvCache,
    ) -> Result<ForwardOutput, InferenceError> {
        (**self).forward(input, cache)
    }
}

impl<M: CausalModel + ?Sized> CausalModel for Arc<M> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn new_cache(&self) -> KvCache {
        (**self).new_cache()
    }

    fn eos_token(&self) -> Option<u32> {
        (**self).eos_token()
    }

    fn forward(
        &self,
        input: &ForwardInput,
        cache: KvCache,
    ) -> Result<ForwardOutput, InferenceError> {
        (**self).forward(input, cache)
    }
}

impl<M: CausalModel + ?Sized> CausalModel for Box<M> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn new_cache(&self) -> KvCache {
        (**self).new_cache()
    }

    fn eos_token(&self) -> Option<u32> {
        (**self).eos_token()
    }

    fn forward(
        &self,
        input: &ForwardInput,
        cache: KvCache,
    ) -> Result<ForwardOutput, InferenceError> {
        (**self).forward(input, cache)
    }
}
