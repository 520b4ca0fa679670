//! Per-model KV cache with sequence-axis trimming.
//!
//! Every layer keeps one key tensor and one value tensor shaped
//! `[batch, kv_heads, seq, head_dim]`. The cache is plain data: a model's
//! forward pass takes it by value and hands back the grown cache, and the
//! decoding loop trims it back to the confirmed sequence length after each
//! verification round.

use candle_core::Tensor;

/// Axis holding sequence positions in every cached tensor.
pub const SEQ_DIM: usize = 2;

const CACHE_RANK: usize = 4;

/// Cached keys and values for a single transformer layer.
#[derive(Debug, Clone)]
pub struct LayerKv {
    keys: Tensor,
    values: Tensor,
}

impl LayerKv {
    /// Create a layer entry from key/value tensors of identical shape.
    pub fn new(keys: Tensor, values: Tensor) -> Result<Self, KvCacheError> {
        check_pair(&keys, &values)?;
        Ok(Self { keys, values })
    }

    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Number of cached positions.
    pub fn len(&self) -> usize {
        self.keys.dims()[SEQ_DIM]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, keys: &Tensor, values: &Tensor) -> Result<(), KvCacheError> {
        check_pair(keys, values)?;
        let (old, new) = (self.keys.dims(), keys.dims());
        let compatible = (0..CACHE_RANK).all(|d| d == SEQ_DIM || old[d] == new[d]);
        if !compatible {
            return Err(KvCacheError::ShapeMismatch(format!(
                "cannot append {:?} to cached {:?}",
                new, old
            )));
        }
        self.keys = Tensor::cat(&[&self.keys, keys], SEQ_DIM)?;
        self.values = Tensor::cat(&[&self.values, values], SEQ_DIM)?;
        Ok(())
    }

    fn truncate(&mut self, len: usize) -> Result<(), KvCacheError> {
        self.keys = self.keys.narrow(SEQ_DIM, 0, len)?;
        self.values = self.values.narrow(SEQ_DIM, 0, len)?;
        Ok(())
    }

    fn size_in_bytes(&self) -> usize {
        let elem = self.keys.dtype().size_in_bytes();
        (self.keys.elem_count() + self.values.elem_count()) * elem
    }
}

fn check_pair(keys: &Tensor, values: &Tensor) -> Result<(), KvCacheError> {
    if keys.rank() != CACHE_RANK {
        return Err(KvCacheError::ShapeMismatch(format!(
            "expected rank {} [batch, heads, seq, head_dim], got {:?}",
            CACHE_RANK,
            keys.dims()
        )));
    }
    if keys.dims() != values.dims() {
        return Err(KvCacheError::ShapeMismatch(format!(
            "keys {:?} and values {:?} differ",
            keys.dims(),
            values.dims()
        )));
    }
    Ok(())
}

/// Outcome of a trim operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Layers that were longer than the target and got truncated.
    pub layers_trimmed: usize,
    /// Positions dropped from the longest layer.
    pub positions_discarded: usize,
}

impl TrimOutcome {
    pub fn is_noop(&self) -> bool {
        self.layers_trimmed == 0
    }
}

/// KV cache for all layers of one model.
///
/// Layers start empty and are filled by the model's forward pass.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    layers: Vec<Option<LayerKv>>,
}

impl KvCache {
    /// Create an empty cache with `num_layers` layers.
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![None; num_layers],
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Cached entry for a layer, `None` if the layer holds no positions yet.
    pub fn layer(&self, idx: usize) -> Option<&LayerKv> {
        self.layers.get(idx).and_then(Option::as_ref)
    }

    /// Number of positions cached by one layer.
    pub fn layer_len(&self, idx: usize) -> Result<usize, KvCacheError> {
        let slot = self.layers.get(idx).ok_or(KvCacheError::LayerOutOfRange {
            layer: idx,
            num_layers: self.layers.len(),
        })?;
        Ok(slot.as_ref().map_or(0, LayerKv::len))
    }

    /// Per-layer lengths, in layer order.
    pub fn layer_lens(&self) -> Vec<usize> {
        self.layers
            .iter()
            .map(|l| l.as_ref().map_or(0, LayerKv::len))
            .collect()
    }

    /// Logical length of the cache.
    ///
    /// Fails if layers disagree; mid-forward states are not valid lengths.
    pub fn len(&self) -> Result<usize, KvCacheError> {
        let lens = self.layer_lens();
        match lens.split_first() {
            None => Ok(0),
            Some((&first, rest)) => match rest.iter().position(|&l| l != first) {
                None => Ok(first),
                Some(i) => Err(KvCacheError::LayerLengthMismatch {
                    layer: i + 1,
                    len: rest[i],
                    expected: first,
                }),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(Option::is_none)
    }

    /// Append new key/value positions to a layer and return its new length.
    pub fn append(
        &mut self,
        layer: usize,
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<usize, KvCacheError> {
        let num_layers = self.layers.len();
        let slot = self
            .layers
            .get_mut(layer)
            .ok_or(KvCacheError::LayerOutOfRange { layer, num_layers })?;

        match slot {
            Some(entry) => entry.append(keys, values)?,
            None => *slot = Some(LayerKv::new(keys.clone(), values.clone())?),
        }
        Ok(slot.as_ref().map_or(0, LayerKv::len))
    }

    /// Truncate every layer longer than `target_len` down to `target_len`.
    ///
    /// Layers already at or below the target are left untouched, so trimming
    /// twice with the same target does nothing the second time.
    pub fn trim(&mut self, target_len: usize) -> Result<TrimOutcome, KvCacheError> {
        let mut outcome = TrimOutcome::default();
        for slot in self.layers.iter_mut() {
            let Some(entry) = slot else { continue };
            let len = entry.len();
            if len <= target_len {
                continue;
            }
            if target_len == 0 {
                *slot = None;
            } else {
                entry.truncate(target_len)?;
            }
            outcome.layers_trimmed += 1;
            outcome.positions_discarded = outcome.positions_discarded.max(len - target_len);
        }
        Ok(outcome)
    }

    /// Drop all cached positions, keeping the layer count.
    pub fn clear(&mut self) {
        self.layers.iter_mut().for_each(|l| *l = None);
    }

    /// Memory held by cached tensors, in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .flatten()
            .map(LayerKv::size_in_bytes)
            .sum()
    }
}

/// Errors for KV cache operations.
#[derive(Debug, thiserror::Error)]
pub enum KvCacheError {
    #[error("Layer {layer} out of range for cache with {num_layers} layers")]
    LayerOutOfRange { layer: usize, num_layers: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Layer {layer} holds {len} positions, expected {expected}")]
    LayerLengthMismatch {
        layer: usize,
        len: usize,
        expected: usize,
    },

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
