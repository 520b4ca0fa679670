//! Naive greedy decoding with the target model only.
//!
//! Generates tokens sequentially, one forward pass per token. This is the
//! reference the speculative loop must reproduce exactly, and the path taken
//! when speculation is disabled.

use std::time::Instant;

use super::error::InferenceError;
use super::input::ForwardInput;
use super::model::CausalModel;
use super::output::{DecodeOutput, FinishReason};
use super::sampling::greedy_last;
use super::stats::SpeculativeStats;
use crate::memory::KvCache;

/// Result from a single decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeStepResult {
    /// Generated token (None if no output this step).
    pub token: Option<u32>,
    /// Whether generation is finished.
    pub finished: bool,
    /// Reason for finishing (if applicable).
    pub finish_reason: Option<FinishReason>,
}

impl DecodeStepResult {
    fn finished(token: Option<u32>, reason: FinishReason) -> Self {
        Self {
            token,
            finished: true,
            finish_reason: Some(reason),
        }
    }
}

/// Configuration for decode execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Total sequence length budget, prompt included.
    pub max_length: usize,
    /// Stop after generating this token.
    pub eos_token: Option<u32>,
}

/// Greedy decode executor over one model and one sequence.
pub struct DecodeExecutor<'m, M: ?Sized> {
    model: &'m M,
    config: DecodeConfig,
    tokens: Vec<u32>,
    prompt_len: usize,
    cache: KvCache,
    primed: bool,
    finish_reason: Option<FinishReason>,
    stats: SpeculativeStats,
}

impl<'m, M: CausalModel + ?Sized> DecodeExecutor<'m, M> {
    /// Create an executor for `prompt`. Nothing runs until the first `step`.
    pub fn new(model: &'m M, prompt: &[u32], config: DecodeConfig) -> Result<Self, InferenceError> {
        if prompt.is_empty() {
            return Err(InferenceError::InputValidation(
                "prompt cannot be empty".into(),
            ));
        }
        if config.max_length == 0 {
            return Err(InferenceError::InputValidation(
                "max_length must be > 0".into(),
            ));
        }
        Ok(Self {
            model,
            config,
            tokens: prompt.to_vec(),
            prompt_len: prompt.len(),
            cache: model.new_cache(),
            primed: false,
            finish_reason: None,
            stats: SpeculativeStats::default(),
        })
    }

    /// Generate a single token.
    ///
    /// The first call runs the whole prompt; later calls feed only the
    /// previously generated token.
    pub fn step(&mut self) -> Result<DecodeStepResult, InferenceError> {
        if let Some(reason) = self.finish_reason {
            return Ok(DecodeStepResult::finished(None, reason));
        }
        if self.tokens.len() >= self.config.max_length {
            self.finish_reason = Some(FinishReason::MaxTokens);
            return Ok(DecodeStepResult::finished(None, FinishReason::MaxTokens));
        }

        let input = if self.primed {
            let last = self.tokens[self.tokens.len() - 1];
            ForwardInput::continuing(&[last], self.tokens.len() - 1)?
        } else {
            ForwardInput::continuing(&self.tokens, 0)?
        };

        let cache = std::mem::take(&mut self.cache);
        let out = self.model.forward(&input, cache)?;
        self.cache = out.cache;
        self.primed = true;
        self.stats.target_forward_passes += 1;

        let token = greedy_last(&out.logits)?;
        self.tokens.push(token);
        self.stats.total_accepted += 1;

        if self.config.eos_token == Some(token) {
            self.finish_reason = Some(FinishReason::Stop);
            return Ok(DecodeStepResult::finished(Some(token), FinishReason::Stop));
        }
        if self.tokens.len() >= self.config.max_length {
            self.finish_reason = Some(FinishReason::MaxTokens);
            return Ok(DecodeStepResult::finished(Some(token), FinishReason::MaxTokens));
        }

        Ok(DecodeStepResult {
            token: Some(token),
            finished: false,
            finish_reason: None,
        })
    }

    /// Stop early; used for cancellation and time budgets.
    pub fn interrupt(&mut self, reason: FinishReason) {
        self.finish_reason.get_or_insert(reason);
    }

    /// Positions currently held in the model's cache.
    pub fn cached_len(&self) -> usize {
        self.cache.layer_lens().into_iter().max().unwrap_or(0)
    }

    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    pub fn tokens_generated(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    pub fn into_output(self) -> DecodeOutput {
        DecodeOutput {
            tokens: self.tokens,
            prompt_len: self.prompt_len,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::MaxTokens),
            stats: self.stats,
        }
    }
}

/// Target-only greedy generator.
pub struct GreedyDecoder<M> {
    model: M,
    config: DecodeConfig,
}

impl<M: CausalModel> GreedyDecoder<M> {
    pub fn new(model: M, config: DecodeConfig) -> Self {
        Self { model, config }
    }

    pub fn generate(&self, prompt: &[u32]) -> Result<DecodeOutput, InferenceError> {
        greedy_generate(&self.model, prompt, self.config.clone())
    }

    pub fn generate_cancellable(
        &self,
        prompt: &[u32],
        is_cancelled: Option<&(dyn Fn() -> bool + Send + Sync)>,
        deadline: Option<Instant>,
    ) -> Result<DecodeOutput, InferenceError> {
        greedy_generate_cancellable(&self.model, prompt, self.config.clone(), is_cancelled, deadline)
    }

    /// Step-wise executor over this decoder's model.
    pub fn executor(&self, prompt: &[u32]) -> Result<DecodeExecutor<'_, M>, InferenceError> {
        DecodeExecutor::new(&self.model, prompt, self.config.clone())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }
}

/// Run greedy decoding to completion.
pub fn greedy_generate<M: CausalModel + ?Sized>(
    model: &M,
    prompt: &[u32],
    config: DecodeConfig,
) -> Result<DecodeOutput, InferenceError> {
    greedy_generate_cancellable(model, prompt, config, None, None)
}

/// Run greedy decoding, checking `is_cancelled` and `deadline` between tokens.
pub fn greedy_generate_cancellable<M: CausalModel + ?Sized>(
    model: &M,
    prompt: &[u32],
    config: DecodeConfig,
    is_cancelled: Option<&(dyn Fn() -> bool + Send + Sync)>,
    deadline: Option<Instant>,
) -> Result<DecodeOutput, InferenceError> {
    let mut executor = DecodeExecutor::new(model, prompt, config)?;
    loop {
        if executor.step()?.finished {
            break;
        }
        if is_cancelled.map_or(false, |f| f()) {
            executor.interrupt(FinishReason::Cancelled);
            break;
        }
        if deadline.map_or(false, |d| Instant::now() >= d) {
            executor.interrupt(FinishReason::Timeout);
            break;
        }
    }
    let output = executor.into_output();
    tracing::debug!(
        model = model.model_id(),
        generated = output.generated().len(),
        passes = output.stats.target_forward_passes,
        "greedy decode finished"
    );
    Ok(output)
}
