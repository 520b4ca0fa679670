//! Speculative decoding for accelerated text generation.
//!
//! A small draft model proposes `K` tokens one at a time, then the target
//! model scores all of them in a single forward pass. The longest prefix the
//! target agrees with is kept, plus the target's own token at the first
//! disagreement, so every round appends between 1 and `K` tokens and the
//! output is identical to greedy decoding with the target alone.
//!
//! Sequence bookkeeping: the last token of the sequence is always *pending*,
//! accepted but not yet fed to either model. Both caches therefore hold
//! `seq.len() - 1` positions whenever a round starts.

use std::time::Instant;

use super::acceptance::Acceptance;
use super::cache_controller::{ensure_len, reconcile_pair, CacheRole};
use super::config::SpeculativeConfig;
use super::decode::{greedy_generate_cancellable, DecodeConfig};
use super::error::InferenceError;
use super::input::ForwardInput;
use super::model::CausalModel;
use super::output::{DecodeOutput, FinishReason};
use super::sampling::{greedy_last, greedy_rows};
use super::stats::SpeculativeStats;
use crate::memory::KvCache;
use crate::telemetry;

/// Cancellation predicate polled between iterations.
pub type CancelFn<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Draft tokens proposed in one round, starting at cache position `base`.
#[derive(Debug)]
struct Proposal {
    base: usize,
    tokens: Vec<u32>,
}

/// Decoding loop state.
#[derive(Debug)]
enum Phase {
    Prime,
    Draft,
    Verify(Proposal),
    Trim { base: usize, acceptance: Acceptance },
    Done(FinishReason),
}

/// Prompt plus accepted tokens.
#[derive(Debug)]
struct TokenSequence {
    tokens: Vec<u32>,
    prompt_len: usize,
}

impl TokenSequence {
    fn new(prompt: &[u32]) -> Self {
        Self {
            tokens: prompt.to_vec(),
            prompt_len: prompt.len(),
        }
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Accepted token not yet fed to either model.
    fn pending(&self) -> u32 {
        self.tokens[self.tokens.len() - 1]
    }

    /// Positions both caches should hold at the start of a round.
    fn cached_len(&self) -> usize {
        self.tokens.len() - 1
    }

    /// Append `accepted` and apply the stop conditions to the new tokens.
    fn extend(&mut self, accepted: &[u32], max_length: usize, eos: Option<u32>) -> Option<FinishReason> {
        let start = self.tokens.len();
        self.tokens.extend_from_slice(accepted);
        self.tokens.truncate(max_length);

        if let Some(eos) = eos {
            if let Some(offset) = self.tokens[start..].iter().position(|&t| t == eos) {
                self.tokens.truncate(start + offset + 1);
                return Some(FinishReason::Stop);
            }
        }
        if self.tokens.len() >= max_length {
            return Some(FinishReason::MaxTokens);
        }
        None
    }

    fn into_output(self, finish_reason: FinishReason, stats: SpeculativeStats) -> DecodeOutput {
        DecodeOutput {
            tokens: self.tokens,
            prompt_len: self.prompt_len,
            finish_reason,
            stats,
        }
    }
}

/// Speculative decoding executor.
pub struct SpeculativeDecoder<D, T> {
    draft_model: D,
    target_model: T,
    config: SpeculativeConfig,
}

impl<D, T> SpeculativeDecoder<D, T>
where
    D: CausalModel,
    T: CausalModel,
{
    /// Create a new speculative decoder. Fails if `config` is invalid.
    pub fn new(draft_model: D, target_model: T, config: SpeculativeConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        if draft_model.vocab_size() != target_model.vocab_size() {
            tracing::warn!(
                draft = draft_model.model_id(),
                target = target_model.model_id(),
                draft_vocab = draft_model.vocab_size(),
                target_vocab = target_model.vocab_size(),
                "draft and target vocab sizes differ"
            );
        }
        Ok(Self {
            draft_model,
            target_model,
            config,
        })
    }

    /// Generate until the sequence reaches `max_length` tokens or a stop token.
    pub fn generate(&self, prompt: &[u32]) -> Result<DecodeOutput, InferenceError> {
        self.generate_cancellable(prompt, None)
    }

    /// Like [`generate`](Self::generate), polling `is_cancelled` between iterations.
    pub fn generate_cancellable(
        &self,
        prompt: &[u32],
        is_cancelled: Option<CancelFn<'_>>,
    ) -> Result<DecodeOutput, InferenceError> {
        if prompt.is_empty() {
            return Err(InferenceError::InputValidation(
                "prompt cannot be empty".into(),
            ));
        }
        let deadline = self.config.time_budget().map(|b| Instant::now() + b);

        if !self.config.enabled {
            let output = greedy_generate_cancellable(
                &self.target_model,
                prompt,
                self.decode_config(),
                is_cancelled,
                deadline,
            )?;
            telemetry::record_generation(&output.stats);
            return Ok(output);
        }

        let mut run = Run {
            draft_model: &self.draft_model,
            target_model: &self.target_model,
            config: &self.config,
            eos: self.eos_token(),
            seq: TokenSequence::new(prompt),
            draft_cache: self.draft_model.new_cache(),
            target_cache: self.target_model.new_cache(),
            stats: SpeculativeStats::default(),
            is_cancelled,
            deadline,
        };

        let mut phase = Phase::Prime;
        let reason = loop {
            phase = match phase {
                Phase::Prime => run.prime()?,
                Phase::Draft => match run.interrupted() {
                    Some(reason) => Phase::Done(reason),
                    None => run.draft()?,
                },
                Phase::Verify(proposal) => run.verify(proposal)?,
                Phase::Trim { base, acceptance } => run.trim(base, acceptance)?,
                Phase::Done(reason) => break reason,
            };
        };

        let output = run.seq.into_output(reason, run.stats);
        telemetry::record_generation(&output.stats);
        tracing::debug!(
            draft = self.draft_model.model_id(),
            target = self.target_model.model_id(),
            generated = output.generated().len(),
            iterations = output.stats.iterations,
            acceptance_rate = output.stats.acceptance_rate(),
            finish_reason = ?output.finish_reason,
            "speculative decode finished"
        );
        Ok(output)
    }

    /// Greedy decoding with the target model only.
    pub fn generate_naive(&self, prompt: &[u32]) -> Result<DecodeOutput, InferenceError> {
        greedy_generate_cancellable(&self.target_model, prompt, self.decode_config(), None, None)
    }

    fn decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            max_length: self.config.max_length,
            eos_token: self.eos_token(),
        }
    }

    fn eos_token(&self) -> Option<u32> {
        if self.config.stop_at_eos {
            self.target_model.eos_token()
        } else {
            None
        }
    }

    /// Get current configuration.
    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }

    pub fn draft_model(&self) -> &D {
        &self.draft_model
    }

    pub fn target_model(&self) -> &T {
        &self.target_model
    }
}

/// State of one generation call.
struct Run<'a, D, T> {
    draft_model: &'a D,
    target_model: &'a T,
    config: &'a SpeculativeConfig,
    eos: Option<u32>,
    seq: TokenSequence,
    draft_cache: KvCache,
    target_cache: KvCache,
    stats: SpeculativeStats,
    is_cancelled: Option<CancelFn<'a>>,
    deadline: Option<Instant>,
}

impl<'a, D: CausalModel, T: CausalModel> Run<'a, D, T> {
    /// Feed the prompt to both models and take the target's first token.
    fn prime(&mut self) -> Result<Phase, InferenceError> {
        if self.seq.len() >= self.config.max_length {
            return Ok(Phase::Done(FinishReason::MaxTokens));
        }
        let prompt_len = self.seq.len();
        let input = ForwardInput::continuing(&self.seq.tokens, 0)?;

        let draft_out = self
            .draft_model
            .forward(&input, std::mem::take(&mut self.draft_cache))?;
        self.draft_cache = draft_out.cache;
        self.stats.draft_forward_passes += 1;

        let target_out = self
            .target_model
            .forward(&input, std::mem::take(&mut self.target_cache))?;
        self.target_cache = target_out.cache;
        self.stats.target_forward_passes += 1;

        ensure_len(CacheRole::Draft, &self.draft_cache, prompt_len)?;
        ensure_len(CacheRole::Target, &self.target_cache, prompt_len)?;

        let first = greedy_last(&target_out.logits)?;
        self.stats.total_accepted += 1;
        tracing::debug!(prompt_len, token = first, "primed");

        Ok(match self.seq.extend(&[first], self.config.max_length, self.eos) {
            Some(reason) => Phase::Done(reason),
            None => Phase::Draft,
        })
    }

    fn interrupted(&self) -> Option<FinishReason> {
        if self.is_cancelled.map_or(false, |f| f()) {
            tracing::info!(generated = self.seq.len() - self.seq.prompt_len, "generation cancelled");
            return Some(FinishReason::Cancelled);
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            tracing::warn!(
                budget_ms = self.config.time_budget_ms,
                generated = self.seq.len() - self.seq.prompt_len,
                "generation time budget exhausted"
            );
            return Some(FinishReason::Timeout);
        }
        None
    }

    /// Run the draft model up to K times, feeding back each of its own predictions.
    ///
    /// The round never proposes past N, so no model sees a position beyond
    /// `N - 2`, the same bound as naive decoding.
    fn draft(&mut self) -> Result<Phase, InferenceError> {
        let base = self.seq.cached_len();
        ensure_len(CacheRole::Draft, &self.draft_cache, base)?;
        ensure_len(CacheRole::Target, &self.target_cache, base)?;

        let remaining = self.config.max_length.saturating_sub(self.seq.len());
        let k = self.config.draft_tokens.min(remaining);
        if k == 0 {
            return Ok(Phase::Done(FinishReason::MaxTokens));
        }
        let started = Instant::now();
        let mut tokens = Vec::with_capacity(k);
        let mut next = self.seq.pending();

        for i in 0..k {
            let input = ForwardInput::continuing(&[next], base + i)?;
            let out = self
                .draft_model
                .forward(&input, std::mem::take(&mut self.draft_cache))?;
            self.draft_cache = out.cache;
            next = greedy_last(&out.logits)?;
            tokens.push(next);
        }

        self.stats.draft_forward_passes += k as u64;
        self.stats.total_draft_tokens += k as u64;
        self.stats.add_draft_time(started.elapsed());

        Ok(Phase::Verify(Proposal { base, tokens }))
    }

    /// Score the proposal with one target pass over `[pending, d0..d(k-2)]`.
    fn verify(&mut self, proposal: Proposal) -> Result<Phase, InferenceError> {
        let started = Instant::now();
        let k = proposal.tokens.len();

        let mut inputs = Vec::with_capacity(k);
        inputs.push(self.seq.pending());
        inputs.extend_from_slice(&proposal.tokens[..k - 1]);

        let input = ForwardInput::continuing(&inputs, proposal.base)?;
        let out = self
            .target_model
            .forward(&input, std::mem::take(&mut self.target_cache))?;
        self.target_cache = out.cache;
        self.stats.target_forward_passes += 1;

        let verified = greedy_rows(&out.logits)?;
        let acceptance = Acceptance::evaluate(&proposal.tokens, &verified)?;
        self.stats.add_verify_time(started.elapsed());

        Ok(Phase::Trim {
            base: proposal.base,
            acceptance,
        })
    }

    /// Append the accepted tokens and cut both caches back to the confirmed prefix.
    fn trim(&mut self, base: usize, acceptance: Acceptance) -> Result<Phase, InferenceError> {
        let confirmed = base + acceptance.disagree_idx() + 1;
        let report = reconcile_pair(&mut self.draft_cache, &mut self.target_cache, confirmed)?;

        self.stats.iterations += 1;
        self.stats.total_matched += acceptance.matched() as u64;
        self.stats.total_rejected += acceptance.rejected() as u64;
        self.stats.total_accepted += acceptance.accepted_len() as u64;
        self.stats.draft_positions_trimmed += report.draft.positions_discarded as u64;
        self.stats.target_positions_trimmed += report.target.positions_discarded as u64;
        telemetry::record_speculative_cycle(
            acceptance.proposed(),
            acceptance.matched(),
            acceptance.accepted_len(),
        );

        tracing::debug!(
            iteration = self.stats.iterations,
            base,
            matched = acceptance.matched(),
            accepted = acceptance.accepted_len(),
            correction = ?acceptance.correction(),
            "speculative round"
        );

        let finished = self
            .seq
            .extend(acceptance.tokens(), self.config.max_length, self.eos);
        debug_assert!(finished.is_some() || self.seq.cached_len() == confirmed);

        Ok(match finished {
            Some(reason) => Phase::Done(reason),
            None => Phase::Draft,
        })
    }
}
