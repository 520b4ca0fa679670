//! Deterministic synthetic causal model.
//!
//! A small candle model whose per-layer keys and values depend on token and
//! position ids, and whose prediction at each position depends on the whole
//! cached history through a masked prefix sum. It stands in for a real
//! transformer in tests, benches and the CLI demo: a cache that keeps a
//! rejected position, or a wrong position id, changes its predictions.
//!
//! Weights are small integers, so every f32 sum stays exact and a batched
//! pass produces exactly the logits of one-token-at-a-time passes.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::InferenceError;
use super::input::ForwardInput;
use super::model::{CausalModel, ForwardOutput};
use crate::memory::KvCache;

const WEIGHT_RANGE: i32 = 2;

/// Shape and seed of a synthetic model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub vocab_size: usize,
    pub num_layers: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub max_position: usize,
    pub seed: u64,
    pub eos_token: Option<u32>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            vocab_size: 257,
            num_layers: 2,
            num_kv_heads: 2,
            head_dim: 8,
            max_position: 4096,
            seed: 0,
            eos_token: None,
        }
    }
}

impl SyntheticConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn hidden(&self) -> usize {
        self.num_kv_heads * self.head_dim
    }

    fn validate(&self) -> Result<(), InferenceError> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("num_layers", self.num_layers),
            ("num_kv_heads", self.num_kv_heads),
            ("head_dim", self.head_dim),
            ("max_position", self.max_position),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(InferenceError::InputValidation(format!(
                "synthetic model {} must be > 0",
                name
            )));
        }
        if let Some(eos) = self.eos_token {
            if eos as usize >= self.vocab_size {
                return Err(InferenceError::InputValidation(format!(
                    "eos token {} outside vocab of {}",
                    eos, self.vocab_size
                )));
            }
        }
        Ok(())
    }
}

/// Synthetic causal model with a real KV cache.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    model_id: String,
    config: SyntheticConfig,
    device: Device,
    input_embed: Tensor,
    output_proj: Tensor,
    position_table: Tensor,
    layer_keys: Vec<Tensor>,
    layer_values: Vec<Tensor>,
}

impl SyntheticModel {
    /// Build a model with weights drawn from `config.seed`.
    pub fn new(model_id: impl Into<String>, config: SyntheticConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (vocab, hidden) = (config.vocab_size, config.hidden());

        let input_embed = random_table(&mut rng, vocab, hidden, &device)?;
        let output_proj = random_table(&mut rng, vocab, hidden, &device)?;
        let position_table = random_table(&mut rng, config.max_position, hidden, &device)?;
        let mut layer_keys = Vec::with_capacity(config.num_layers);
        let mut layer_values = Vec::with_capacity(config.num_layers);
        for _ in 0..config.num_layers {
            layer_keys.push(random_table(&mut rng, vocab, hidden, &device)?);
            layer_values.push(random_table(&mut rng, vocab, hidden, &device)?);
        }

        Ok(Self {
            model_id: model_id.into(),
            config,
            device,
            input_embed,
            output_proj,
            position_table,
            layer_keys,
            layer_values,
        })
    }

    /// Copy of `base` with the output rows of roughly `fraction` of the vocab redrawn.
    ///
    /// Gives a draft that agrees with `base` most of the time without being identical.
    pub fn perturbed(
        base: &SyntheticModel,
        model_id: impl Into<String>,
        seed: u64,
        fraction: f64,
    ) -> Result<Self, InferenceError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(InferenceError::InputValidation(format!(
                "perturbation fraction {} outside [0, 1]",
                fraction
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows: Vec<Vec<f32>> = base.output_proj.to_vec2()?;
        for row in rows.iter_mut() {
            if rng.gen_bool(fraction) {
                row.iter_mut().for_each(|w| *w = draw(&mut rng));
            }
        }
        let hidden = base.config.hidden();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let output_proj = Tensor::from_vec(flat, (base.config.vocab_size, hidden), &base.device)?;

        Ok(Self {
            model_id: model_id.into(),
            output_proj,
            ..base.clone()
        })
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn check_ids(&self, input: &ForwardInput) -> Result<(), InferenceError> {
        if let Some(&bad) = input
            .input_ids
            .iter()
            .find(|&&t| t as usize >= self.config.vocab_size)
        {
            return Err(InferenceError::InputValidation(format!(
                "token {} outside vocab of {}",
                bad, self.config.vocab_size
            )));
        }
        if let Some(&bad) = input
            .position_ids
            .iter()
            .find(|&&p| p as usize >= self.config.max_position)
        {
            return Err(InferenceError::InputValidation(format!(
                "position {} beyond max_position {}",
                bad, self.config.max_position
            )));
        }
        Ok(())
    }

    /// `[n, hidden]` rows laid out as `[1, heads, n, head_dim]`.
    fn to_heads(&self, rows: &Tensor, n: usize) -> Result<Tensor, InferenceError> {
        let (h, d) = (self.config.num_kv_heads, self.config.head_dim);
        Ok(rows.reshape((1, n, h, d))?.transpose(1, 2)?.contiguous()?)
    }

    fn from_heads(&self, t: &Tensor, n: usize) -> Result<Tensor, InferenceError> {
        Ok(t.transpose(1, 2)?.contiguous()?.reshape((n, self.config.hidden()))?)
    }
}

impl CausalModel for SyntheticModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn new_cache(&self) -> KvCache {
        KvCache::new(self.config.num_layers)
    }

    fn eos_token(&self) -> Option<u32> {
        self.config.eos_token
    }

    fn forward(
        &self,
        input: &ForwardInput,
        mut cache: KvCache,
    ) -> Result<ForwardOutput, InferenceError> {
        if cache.num_layers() != self.config.num_layers {
            return Err(InferenceError::ModelError(format!(
                "cache has {} layers, model {} has {}",
                cache.num_layers(),
                self.model_id,
                self.config.num_layers
            )));
        }
        let cached = cache.len()?;
        input.validate(cached)?;
        self.check_ids(input)?;

        let n = input.len();
        let total = cached + n;
        let ids = Tensor::new(input.input_ids.as_slice(), &self.device)?;
        let positions = Tensor::new(input.position_ids.as_slice(), &self.device)?;
        let mask: Vec<f32> = input.attention_mask.iter().map(|&m| m as f32).collect();
        let mask = Tensor::from_vec(mask, (total, 1), &self.device)?;

        let pos_rows = self.position_table.index_select(&positions, 0)?;
        let mut hidden = self.input_embed.index_select(&ids, 0)?;

        for layer in 0..self.config.num_layers {
            let keys = self.layer_keys[layer].index_select(&ids, 0)?.add(&pos_rows)?;
            let values = self.layer_values[layer].index_select(&ids, 0)?;
            cache.append(layer, &self.to_heads(&keys, n)?, &self.to_heads(&values, n)?)?;

            let entry = cache.layer(layer).ok_or_else(|| {
                InferenceError::ModelError(format!("layer {} empty after append", layer))
            })?;
            let history = entry.keys().add(entry.values())?;
            let history = self.from_heads(&history, total)?.broadcast_mul(&mask)?;
            let running = history.cumsum(0)?.narrow(0, cached, n)?;
            hidden = hidden.add(&running)?;
        }

        let logits = hidden.matmul(&self.output_proj.t()?)?;
        Ok(ForwardOutput { logits, cache })
    }
}

fn draw(rng: &mut StdRng) -> f32 {
    rng.gen_range(-WEIGHT_RANGE..=WEIGHT_RANGE) as f32
}

fn random_table(
    rng: &mut StdRng,
    rows: usize,
    cols: usize,
    device: &Device,
) -> Result<Tensor, InferenceError> {
    let data: Vec<f32> = (0..rows * cols).map(|_| draw(rng)).collect();
    Ok(Tensor::from_vec(data, (rows, cols), device)?)
}
