//! Tests for per-layer KV cache storage and trimming.
//!
//! Tests cover:
//! - Appending positions layer by layer
//! - Trimming to a target length (including zero)
//! - Shape and length mismatch detection
//! - Draft/target reconciliation

use candle_core::{DType, Device, Tensor};
use speculate_core::engine::{reconcile, reconcile_pair, CacheRole, InferenceError};
use speculate_core::memory::{KvCache, KvCacheError, SEQ_DIM};

/// `[1, heads, n, head_dim]` tensor whose entry at position p equals p + offset.
fn positions(n: usize, offset: usize) -> Tensor {
    let data: Vec<f32> = (0..n).map(|p| (p + offset) as f32).collect();
    Tensor::from_vec(data, (1, 1, n, 1), &Device::Cpu)
        .unwrap()
        .broadcast_as((1, 2, n, 4))
        .unwrap()
        .contiguous()
        .unwrap()
}

fn filled(num_layers: usize, len: usize) -> KvCache {
    let mut cache = KvCache::new(num_layers);
    for layer in 0..num_layers {
        cache.append(layer, &positions(len, 0), &positions(len, 0)).unwrap();
    }
    cache
}

#[test]
fn test_new_cache_is_empty() {
    let cache = KvCache::new(3);
    assert_eq!(cache.num_layers(), 3);
    assert!(cache.is_empty());
    assert_eq!(cache.len().unwrap(), 0);
    assert_eq!(cache.memory_bytes(), 0);
}

#[test]
fn test_incremental_append_keeps_order() {
    let mut cache = KvCache::new(1);
    cache.append(0, &positions(3, 0), &positions(3, 0)).unwrap();
    let len = cache.append(0, &positions(2, 3), &positions(2, 3)).unwrap();
    assert_eq!(len, 5);

    let keys = cache.layer(0).unwrap().keys();
    assert_eq!(keys.dims()[SEQ_DIM], 5);
    let first_col: Vec<f32> = keys
        .narrow(1, 0, 1)
        .unwrap()
        .narrow(3, 0, 1)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert_eq!(first_col, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_trim_keeps_prefix() {
    let mut cache = filled(2, 10);
    let outcome = cache.trim(4).unwrap();
    assert_eq!(outcome.layers_trimmed, 2);
    assert_eq!(outcome.positions_discarded, 6);
    assert_eq!(cache.len().unwrap(), 4);

    let values: Vec<f32> = cache
        .layer(1)
        .unwrap()
        .values()
        .narrow(1, 0, 1)
        .unwrap()
        .narrow(3, 0, 1)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_trim_to_zero_empties_layers() {
    let mut cache = filled(2, 5);
    cache.trim(0).unwrap();
    assert!(cache.is_empty());
    assert!(cache.layer(0).is_none());
    // The cache remains usable after being emptied.
    cache.append(0, &positions(1, 0), &positions(1, 0)).unwrap();
    assert_eq!(cache.layer_len(0).unwrap(), 1);
}

#[test]
fn test_trim_longer_than_cache_is_noop() {
    let mut cache = filled(2, 5);
    assert!(cache.trim(9).unwrap().is_noop());
    assert_eq!(cache.len().unwrap(), 5);
}

#[test]
fn test_layer_length_mismatch_detected() {
    let mut cache = KvCache::new(2);
    cache.append(0, &positions(4, 0), &positions(4, 0)).unwrap();
    cache.append(1, &positions(3, 0), &positions(3, 0)).unwrap();
    assert!(matches!(
        cache.len(),
        Err(KvCacheError::LayerLengthMismatch { layer: 1, len: 3, expected: 4 })
    ));
}

#[test]
fn test_append_rejects_bad_shapes() {
    let mut cache = KvCache::new(1);
    let rank3 = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
    assert!(matches!(
        cache.append(0, &rank3, &rank3),
        Err(KvCacheError::ShapeMismatch(_))
    ));

    cache.append(0, &positions(2, 0), &positions(2, 0)).unwrap();
    let other_heads = Tensor::zeros((1, 3, 1, 4), DType::F32, &Device::Cpu).unwrap();
    assert!(matches!(
        cache.append(0, &other_heads, &other_heads),
        Err(KvCacheError::ShapeMismatch(_))
    ));
}

#[test]
fn test_append_out_of_range_layer() {
    let mut cache = KvCache::new(1);
    assert!(matches!(
        cache.append(4, &positions(1, 0), &positions(1, 0)),
        Err(KvCacheError::LayerOutOfRange { layer: 4, num_layers: 1 })
    ));
}

#[test]
fn test_memory_bytes_shrink_after_trim() {
    let mut cache = filled(2, 8);
    let before = cache.memory_bytes();
    cache.trim(2).unwrap();
    assert_eq!(cache.memory_bytes() * 4, before);
}

#[test]
fn test_reconcile_pair_with_different_depths() {
    let mut draft = filled(1, 12);
    let mut target = filled(4, 12);
    let report = reconcile_pair(&mut draft, &mut target, 9).unwrap();
    assert_eq!(report.draft.layers_trimmed, 1);
    assert_eq!(report.target.layers_trimmed, 4);
    assert_eq!(draft.len().unwrap(), 9);
    assert_eq!(target.len().unwrap(), 9);
}

#[test]
fn test_reconcile_detects_short_cache() {
    let mut cache = filled(2, 3);
    assert!(matches!(
        reconcile(CacheRole::Draft, &mut cache, 4),
        Err(InferenceError::CacheDesync { model: "draft", expected: 4, actual: 3 })
    ));
}
