//! Integration tests for the speculative decoding loop.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{exact_draft, flaky_draft, target, wrong_draft, Call, HistoryModel, VOCAB};
use speculate_core::engine::{
    ByteTokenizer, CausalModel, DecodeOutput, FinishReason, ForwardInput, ForwardOutput,
    InferenceError, SpeculativeConfig, SpeculativeDecoder, SpeculativePipeline, SyntheticConfig,
    SyntheticModel,
};
use speculate_core::KvCache;

const PROMPT: &[u32] = &[1, 2, 3];

fn config(k: usize, n: usize) -> SpeculativeConfig {
    SpeculativeConfig::default().draft_tokens(k).max_length(n)
}

fn naive(n: usize) -> DecodeOutput {
    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(1, n)).unwrap();
    decoder.generate_naive(PROMPT).unwrap()
}

#[test]
fn test_equivalence_across_drafts_and_k() {
    let expected = naive(40);
    assert_eq!(expected.tokens.len(), 40);

    for k in 1..=6 {
        for draft in [exact_draft(), wrong_draft(), flaky_draft(3), flaky_draft(2)] {
            let id = draft.model_id().to_string();
            let decoder = SpeculativeDecoder::new(draft, target(), config(k, 40)).unwrap();
            let out = decoder.generate(PROMPT).unwrap();
            assert_eq!(out.tokens, expected.tokens, "draft {} K={}", id, k);
            assert_eq!(out.finish_reason, FinishReason::MaxTokens);
        }
    }
}

#[test]
fn test_identical_draft_accepts_everything() {
    let (k, n) = (4, 40);
    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(k, n)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    let after_primer = n - PROMPT.len() - 1;
    let expected_iterations = (after_primer + k - 1) / k;
    assert_eq!(out.stats.acceptance_rate(), 1.0);
    assert_eq!(out.stats.total_rejected, 0);
    assert_eq!(out.stats.iterations as usize, expected_iterations);
    assert_eq!(out.stats.target_forward_passes as usize, expected_iterations + 1);
}

#[test]
fn test_wrong_draft_still_progresses_one_token_per_round() {
    let (k, n) = (5, 30);
    let decoder = SpeculativeDecoder::new(wrong_draft(), target(), config(k, n)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    let generated = n - PROMPT.len();
    assert_eq!(out.tokens, naive(n).tokens);
    assert_eq!(out.stats.total_matched, 0);
    assert_eq!(out.stats.iterations as usize, generated - 1);
    // Naive decoding needs exactly one target pass per generated token.
    assert_eq!(out.stats.target_forward_passes as usize, generated);
}

#[test]
fn test_progress_bounds_per_iteration() {
    let k = 4;
    let decoder = SpeculativeDecoder::new(flaky_draft(3), target(), config(k, 60)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    let speculative = out.generated().len() as u64 - 1;
    let iterations = out.stats.iterations;
    assert!(speculative >= iterations);
    assert!(speculative <= iterations * k as u64);
    assert!(out.stats.total_matched > 0);
    assert!(out.stats.total_rejected > 0);
}

#[test]
fn test_forward_calls_follow_cache_positions() {
    let k = 3;
    let decoder = SpeculativeDecoder::new(flaky_draft(4), target(), config(k, 30)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    let target_calls = decoder.target_model().calls();
    let draft_calls = decoder.draft_model().calls();

    // Prime: the whole prompt, nothing cached.
    let prime = Call { past_len: 0, input_len: PROMPT.len() };
    assert_eq!(target_calls[0], prime);
    assert_eq!(draft_calls[0], prime);

    // Every verification scores K inputs, fewer only in a round clamped by N;
    // every draft step feeds one.
    let (last, full) = target_calls[1..].split_last().unwrap();
    assert!(full.iter().all(|c| c.input_len == k));
    assert!(last.input_len >= 1 && last.input_len <= k);
    assert!(last.past_len + last.input_len <= 30 - 1);
    assert!(draft_calls[1..].iter().all(|c| c.input_len == 1));
    assert_eq!(target_calls.len() as u64, out.stats.target_forward_passes);
    assert_eq!(draft_calls.len() as u64, out.stats.draft_forward_passes);

    // Each round starts where the previous one confirmed, and always moves forward.
    let bases: Vec<usize> = target_calls[1..].iter().map(|c| c.past_len).collect();
    assert_eq!(bases[0], PROMPT.len());
    assert!(bases.windows(2).all(|w| w[1] > w[0] && w[1] - w[0] <= k));
    for (round, base) in bases.iter().enumerate() {
        let first_draft = draft_calls[1 + round * k];
        assert_eq!(first_draft.past_len, *base);
    }
}

#[test]
fn test_eos_stops_both_paths_identically() {
    let reference = naive(40);
    let eos = reference.generated()[5];
    let first = reference.generated().iter().position(|&t| t == eos).unwrap();

    let decoder =
        SpeculativeDecoder::new(flaky_draft(3), target().with_eos(eos), config(4, 40)).unwrap();
    let fast = decoder.generate(PROMPT).unwrap();
    let slow = decoder.generate_naive(PROMPT).unwrap();

    assert_eq!(fast.tokens, slow.tokens);
    assert_eq!(fast.finish_reason, FinishReason::Stop);
    assert_eq!(fast.generated().len(), first + 1);
    assert_eq!(fast.tokens.last(), Some(&eos));
}

#[test]
fn test_eos_ignored_when_disabled() {
    let reference = naive(40);
    let eos = reference.generated()[2];
    let mut cfg = config(4, 40);
    cfg.stop_at_eos = false;

    let decoder = SpeculativeDecoder::new(exact_draft(), target().with_eos(eos), cfg).unwrap();
    let out = decoder.generate(PROMPT).unwrap();
    assert_eq!(out.tokens, reference.tokens);
    assert_eq!(out.finish_reason, FinishReason::MaxTokens);
}

#[test]
fn test_disabled_uses_target_only() {
    let mut cfg = config(4, 25);
    cfg.enabled = false;
    let decoder = SpeculativeDecoder::new(wrong_draft(), target(), cfg).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    assert_eq!(out.tokens, naive(25).tokens);
    assert_eq!(out.stats.iterations, 0);
    assert!(decoder.draft_model().calls().is_empty());
}

#[test]
fn test_budget_edges() {
    // One token of room: the primer only.
    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(4, 4)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();
    assert_eq!(out.generated().len(), 1);
    assert_eq!(out.stats.iterations, 0);

    // Prompt already over budget: returned unchanged.
    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(4, 2)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();
    assert_eq!(out.tokens, PROMPT);
    assert_eq!(out.stats.target_forward_passes, 0);
}

#[test]
fn test_invalid_requests_rejected() {
    assert!(matches!(
        SpeculativeDecoder::new(exact_draft(), target(), config(0, 10)),
        Err(InferenceError::InputValidation(_))
    ));

    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(2, 10)).unwrap();
    assert!(matches!(
        decoder.generate(&[]),
        Err(InferenceError::InputValidation(_))
    ));
}

#[test]
fn test_cancellation_between_iterations() {
    let decoder = SpeculativeDecoder::new(flaky_draft(3), target(), config(3, 60)).unwrap();
    let polls = AtomicUsize::new(0);
    let cancel = || polls.fetch_add(1, Ordering::SeqCst) >= 2;

    let out = decoder.generate_cancellable(PROMPT, Some(&cancel)).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Cancelled);
    assert_eq!(out.stats.iterations, 2);
    // Whatever was produced is a prefix of the greedy output.
    let reference = naive(60);
    assert_eq!(out.tokens[..], reference.tokens[..out.tokens.len()]);
}

/// Wraps a model and sleeps before every forward pass.
struct SlowModel {
    inner: HistoryModel,
    delay: Duration,
}

impl CausalModel for SlowModel {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn new_cache(&self) -> KvCache {
        self.inner.new_cache()
    }

    fn forward(&self, input: &ForwardInput, cache: KvCache) -> Result<ForwardOutput, InferenceError> {
        std::thread::sleep(self.delay);
        self.inner.forward(input, cache)
    }
}

#[test]
fn test_time_budget_ends_with_timeout() {
    let target = SlowModel {
        inner: target(),
        delay: Duration::from_millis(5),
    };
    let mut cfg = config(4, 60);
    cfg.time_budget_ms = Some(1);

    let decoder = SpeculativeDecoder::new(exact_draft(), target, cfg).unwrap();
    let out = decoder.generate(PROMPT).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Timeout);
    assert_eq!(out.stats.iterations, 0);
    assert_eq!(out.generated().len(), 1);
}

#[test]
fn test_alan_turing_synthetic_scenario() {
    let prompt = "Alan Turing was a";
    let target = SyntheticModel::new("target", SyntheticConfig::default().with_seed(2024)).unwrap();
    let draft = SyntheticModel::perturbed(&target, "draft", 7, 0.25).unwrap();

    let pipeline = SpeculativePipeline::new(
        draft,
        target,
        ByteTokenizer::with_eos(),
        ByteTokenizer::with_eos(),
        config(5, 100),
    )
    .unwrap();

    let fast = pipeline.generate(prompt).unwrap();
    let slow = pipeline.generate_naive(prompt).unwrap();

    assert_eq!(fast.text, slow.text);
    assert_eq!(fast.tokens_generated as usize, 100 - prompt.len());
    assert_eq!(slow.stats.target_forward_passes as usize, 100 - prompt.len());
    assert!(fast.stats.target_forward_passes <= slow.stats.target_forward_passes);
}

#[test]
fn test_equivalence_with_context_window_equal_to_budget() {
    let n = 32;
    let bounded = SyntheticConfig {
        vocab_size: 64,
        max_position: n,
        ..SyntheticConfig::default()
    };
    let target = SyntheticModel::new("target", bounded.with_seed(11)).unwrap();
    let draft = SyntheticModel::perturbed(&target, "draft", 12, 0.3).unwrap();

    let reference = SpeculativeDecoder::new(draft.clone(), target.clone(), config(1, n))
        .unwrap()
        .generate_naive(PROMPT)
        .unwrap();
    assert_eq!(reference.tokens.len(), n);

    for k in 1..=6 {
        let decoder = SpeculativeDecoder::new(draft.clone(), target.clone(), config(k, n)).unwrap();
        let out = decoder.generate(PROMPT).unwrap();
        assert_eq!(out.tokens, reference.tokens, "K={}", k);
        assert_eq!(out.finish_reason, FinishReason::MaxTokens);
        assert!(out.stats.total_draft_tokens <= out.stats.iterations * k as u64);
    }
}

#[test]
fn test_final_round_never_drafts_past_budget() {
    let (k, n) = (5, 12);
    let decoder = SpeculativeDecoder::new(exact_draft(), target(), config(k, n)).unwrap();
    let out = decoder.generate(PROMPT).unwrap();

    // 8 tokens after the primer: one round of 5, then a round of 3.
    assert_eq!(out.tokens.len(), n);
    assert_eq!(out.stats.iterations, 2);
    assert_eq!(out.stats.total_draft_tokens, 8);
    let furthest = decoder
        .draft_model()
        .calls()
        .iter()
        .chain(decoder.target_model().calls().iter())
        .map(|c| c.past_len + c.input_len)
        .max()
        .unwrap();
    assert_eq!(furthest, n - 1);
}

#[test]
fn test_synthetic_identical_draft_full_acceptance() {
    let target = SyntheticModel::new("target", SyntheticConfig::default().with_seed(1)).unwrap();
    let draft = SyntheticModel::new("draft", SyntheticConfig::default().with_seed(1)).unwrap();
    let decoder = SpeculativeDecoder::new(draft, target, config(5, 100)).unwrap();

    let ids: Vec<u32> = "Alan Turing was a".bytes().map(u32::from).collect();
    let out = decoder.generate(&ids).unwrap();

    let after_primer = 100 - ids.len() - 1;
    assert_eq!(out.stats.acceptance_rate(), 1.0);
    assert_eq!(out.stats.iterations as usize, (after_primer + 4) / 5);
    assert_eq!(out.tokens, decoder.generate_naive(&ids).unwrap().tokens);
}

#[test]
fn test_vocab_constant_is_shared() {
    assert_eq!(target().vocab_size(), VOCAB);
}
