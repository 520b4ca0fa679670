//! Shared test models.
//!
//! `HistoryModel` stores the token ids it has seen in its KV cache and
//! predicts the next token from that history with a plain function, so tests
//! can script exactly where a draft agrees with its target.

#![allow(dead_code)]

use std::sync::Mutex;

use candle_core::{Device, Tensor};
use speculate_core::engine::{CausalModel, ForwardInput, ForwardOutput, InferenceError};
use speculate_core::KvCache;

pub type Rule = Box<dyn Fn(&[u32]) -> u32 + Send + Sync>;

/// One recorded forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub past_len: usize,
    pub input_len: usize,
}

pub struct HistoryModel {
    id: String,
    vocab: usize,
    rule: Rule,
    eos: Option<u32>,
    calls: Mutex<Vec<Call>>,
}

impl HistoryModel {
    pub fn new(id: &str, vocab: usize, rule: Rule) -> Self {
        Self {
            id: id.to_string(),
            vocab,
            rule,
            eos: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_eos(mut self, eos: u32) -> Self {
        self.eos = Some(eos);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn history(cache: &KvCache) -> Result<Vec<u32>, InferenceError> {
        match cache.layer(0) {
            None => Ok(Vec::new()),
            Some(layer) => {
                let ids: Vec<f32> = layer.keys().flatten_all()?.to_vec1()?;
                Ok(ids.into_iter().map(|t| t as u32).collect())
            }
        }
    }
}

impl CausalModel for HistoryModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn new_cache(&self) -> KvCache {
        KvCache::new(1)
    }

    fn eos_token(&self) -> Option<u32> {
        self.eos
    }

    fn forward(&self, input: &ForwardInput, mut cache: KvCache) -> Result<ForwardOutput, InferenceError> {
        let cached = cache.len()?;
        input.validate(cached)?;
        assert_eq!(input.past_len(), cached, "{}: input does not continue the cache", self.id);
        assert_eq!(
            input.position_ids.first().copied(),
            Some(cached as u32),
            "{}: positions must start at the cache length",
            self.id
        );
        self.calls.lock().unwrap().push(Call {
            past_len: cached,
            input_len: input.len(),
        });

        let mut history = Self::history(&cache)?;
        let n = input.len();
        let mut logits = vec![0f32; n * self.vocab];
        for (row, &id) in input.input_ids.iter().enumerate() {
            history.push(id);
            let next = (self.rule)(&history) as usize % self.vocab;
            logits[row * self.vocab + next] = 1.0;
        }

        let ids: Vec<f32> = input.input_ids.iter().map(|&t| t as f32).collect();
        let kv = Tensor::from_vec(ids, (1, 1, n, 1), &Device::Cpu)?;
        cache.append(0, &kv, &kv)?;

        Ok(ForwardOutput {
            logits: Tensor::from_vec(logits, (n, self.vocab), &Device::Cpu)?,
            cache,
        })
    }
}

pub const VOCAB: usize = 64;

/// Deterministic next token as a function of the whole history.
pub fn target_rule(history: &[u32]) -> u32 {
    let sum: u64 = history.iter().map(|&t| t as u64).sum();
    ((sum * 7 + history.len() as u64 * 3) % VOCAB as u64) as u32
}

pub fn target() -> HistoryModel {
    HistoryModel::new("target", VOCAB, Box::new(target_rule))
}

/// Draft that agrees with the target everywhere.
pub fn exact_draft() -> HistoryModel {
    HistoryModel::new("draft-exact", VOCAB, Box::new(target_rule))
}

/// Draft that never agrees with the target.
pub fn wrong_draft() -> HistoryModel {
    HistoryModel::new(
        "draft-wrong",
        VOCAB,
        Box::new(|h| (target_rule(h) + 1) % VOCAB as u32),
    )
}

/// Draft that disagrees whenever the history length is a multiple of `every`.
pub fn flaky_draft(every: usize) -> HistoryModel {
    HistoryModel::new(
        "draft-flaky",
        VOCAB,
        Box::new(move |h| {
            if h.len() % every == 0 {
                (target_rule(h) + 1) % VOCAB as u32
            } else {
                target_rule(h)
            }
        }),
    )
}
