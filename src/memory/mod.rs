//! Memory management for speculative decoding.
//!
//! Provides the per-model KV cache and its sequence-axis trimming.

mod kv_cache;

pub use kv_cache::{KvCache, KvCacheError, LayerKv, TrimOutcome, SEQ_DIM};
