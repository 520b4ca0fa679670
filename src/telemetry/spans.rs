//! Generation spans.
//!
//! One `generation` span per pipeline request, carrying the round size, the
//! model pair and, once the request finishes, its outcome and decoding
//! statistics.

use tracing::{info_span, Span};

use crate::engine::SpeculativeStats;

/// Recording helpers for generation spans.
pub trait SpanExt {
    /// Record `status`, plus `error.message` on failure.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record the counters of a finished generation.
    fn record_stats(&self, stats: &SpeculativeStats);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_stats(&self, stats: &SpeculativeStats) {
        self.record("iterations", stats.iterations);
        self.record("target_passes", stats.target_forward_passes);
        if stats.total_draft_tokens > 0 {
            self.record("acceptance_rate", stats.acceptance_rate());
        }
    }
}

/// Identity of one generation request.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSpan<'a> {
    pub request_id: &'a str,
    /// `speculative` or `naive`.
    pub mode: &'a str,
    pub draft_model: &'a str,
    pub target_model: &'a str,
    /// K; zero when the draft model is not consulted.
    pub draft_tokens: usize,
    pub max_length: usize,
}

impl GenerationSpan<'_> {
    /// Open the span. `status`, `error.message`, `latency_ms`,
    /// `tokens_generated`, `iterations`, `target_passes` and `acceptance_rate`
    /// start empty and are filled in when the request completes.
    pub fn span(&self) -> Span {
        info_span!(
            "generation",
            request_id = %self.request_id,
            mode = %self.mode,
            draft_model = %self.draft_model,
            target_model = %self.target_model,
            k = self.draft_tokens,
            max_length = self.max_length,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            tokens_generated = tracing::field::Empty,
            iterations = tracing::field::Empty,
            target_passes = tracing::field::Empty,
            acceptance_rate = tracing::field::Empty,
        )
    }
}
