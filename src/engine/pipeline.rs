//! Text-in, text-out speculative generation.
//!
//! Bundles a decoder with the tokenizers of both models. The tokenizers are
//! checked against each other once, at construction.

use std::time::Instant;

use super::config::SpeculativeConfig;
use super::error::InferenceError;
use super::model::CausalModel;
use super::output::{DecodeOutput, GenerationResult};
use super::speculative::{CancelFn, SpeculativeDecoder};
use super::tokenizer::{ensure_compatible, Tokenizer};
use crate::telemetry::{GenerationSpan, SpanExt};

/// Which decoding path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Speculative,
    Naive,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speculative => "speculative",
            Self::Naive => "naive",
        }
    }
}

/// Speculative decoder plus the tokenizers of its two models.
pub struct SpeculativePipeline<D, T, DT, TT> {
    decoder: SpeculativeDecoder<D, T>,
    draft_tokenizer: DT,
    target_tokenizer: TT,
    fingerprint: String,
}

impl<D, T, DT, TT> SpeculativePipeline<D, T, DT, TT>
where
    D: CausalModel,
    T: CausalModel,
    DT: Tokenizer,
    TT: Tokenizer,
{
    /// Build a pipeline. Fails with `TokenizerMismatch` if the tokenizers
    /// encode `config.canary` differently.
    pub fn new(
        draft_model: D,
        target_model: T,
        draft_tokenizer: DT,
        target_tokenizer: TT,
        config: SpeculativeConfig,
    ) -> Result<Self, InferenceError> {
        config.validate()?;
        let fingerprint = ensure_compatible(&draft_tokenizer, &target_tokenizer, &config.canary)?;
        let decoder = SpeculativeDecoder::new(draft_model, target_model, config)?;
        Ok(Self {
            decoder,
            draft_tokenizer,
            target_tokenizer,
            fingerprint,
        })
    }

    /// Generate a continuation of `prompt` with speculative decoding.
    pub fn generate(&self, prompt: &str) -> Result<GenerationResult, InferenceError> {
        self.generate_cancellable(prompt, None)
    }

    pub fn generate_cancellable(
        &self,
        prompt: &str,
        is_cancelled: Option<CancelFn<'_>>,
    ) -> Result<GenerationResult, InferenceError> {
        self.run(prompt, GenerationMode::Speculative, |ids| {
            self.decoder.generate_cancellable(ids, is_cancelled)
        })
    }

    /// Generate with the target model alone, for comparison.
    pub fn generate_naive(&self, prompt: &str) -> Result<GenerationResult, InferenceError> {
        self.run(prompt, GenerationMode::Naive, |ids| {
            self.decoder.generate_naive(ids)
        })
    }

    fn run<F>(
        &self,
        prompt: &str,
        mode: GenerationMode,
        decode: F,
    ) -> Result<GenerationResult, InferenceError>
    where
        F: FnOnce(&[u32]) -> Result<DecodeOutput, InferenceError>,
    {
        let request_id = uuid::Uuid::new_v4().to_string();
        let config = self.decoder.config();
        let speculating = mode == GenerationMode::Speculative && config.enabled;
        let span = GenerationSpan {
            request_id: &request_id,
            mode: mode.as_str(),
            draft_model: self.decoder.draft_model().model_id(),
            target_model: self.decoder.target_model().model_id(),
            draft_tokens: if speculating { config.draft_tokens } else { 0 },
            max_length: config.max_length,
        }
        .span();
        let _guard = span.enter();
        let start = Instant::now();

        let result = self.encode(prompt).and_then(|ids| decode(&ids)).and_then(|out| {
            let text = self.target_tokenizer.decode(out.generated())?;
            Ok(GenerationResult {
                text,
                tokens_generated: out.generated().len() as u32,
                finish_reason: out.finish_reason,
                stats: out.stats,
            })
        });

        span.record_result(&result);
        span.record("latency_ms", start.elapsed().as_millis() as u64);
        match &result {
            Ok(r) => {
                span.record("tokens_generated", r.tokens_generated);
                span.record_stats(&r.stats);
                tracing::info!(
                    finish_reason = ?r.finish_reason,
                    iterations = r.stats.iterations,
                    target_passes = r.stats.target_forward_passes,
                    "generation complete"
                );
            }
            Err(e) if e.is_warning() => tracing::warn!(error = %e, "generation rejected"),
            Err(e) => tracing::error!(error = %e, "generation failed"),
        }
        result
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u32>, InferenceError> {
        let ids = self.target_tokenizer.encode(prompt)?;
        if ids.is_empty() {
            return Err(InferenceError::InputValidation(
                "prompt encodes to zero tokens".into(),
            ));
        }
        Ok(ids)
    }

    /// Hex fingerprint of the canary encoding both tokenizers agreed on.
    pub fn tokenizer_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn decoder(&self) -> &SpeculativeDecoder<D, T> {
        &self.decoder
    }

    pub fn draft_tokenizer(&self) -> &DT {
        &self.draft_tokenizer
    }

    pub fn target_tokenizer(&self) -> &TT {
        &self.target_tokenizer
    }
}
