//! Speculate Core
//!
//! Greedy speculative decoding: a small draft model proposes tokens, a large
//! target model verifies them in one batched pass, and both KV caches are cut
//! back to the confirmed prefix after every round. The output is token for
//! token identical to greedy decoding with the target model alone.
//!
//! # Layout
//!
//! - [`engine`]: models, decoding loops, acceptance, tokenizers
//! - [`memory`]: per-layer KV cache storage and trimming
//! - [`telemetry`]: logging, spans, metrics
//! - [`config`]: TOML + environment configuration
//! - [`cli`]: `speculate-cli` subcommands

pub mod cli;
pub mod config;
pub mod engine;
pub mod memory;
pub mod telemetry;

pub use engine::{
    CausalModel, DecodeOutput, FinishReason, GenerationResult, InferenceError, SpeculativeConfig,
    SpeculativeDecoder, SpeculativePipeline, SpeculativeStats,
};
pub use memory::KvCache;
