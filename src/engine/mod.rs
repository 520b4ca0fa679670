//! Inference engine for speculative decoding.
//!
//! Handles model forward passes, greedy token selection, draft acceptance,
//! and cache alignment between a draft and a target model.

pub mod acceptance;
pub mod cache_controller;
pub mod config;
pub mod decode;
pub mod error;
pub mod input;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod sampling;
pub mod speculative;
pub mod stats;
pub mod synthetic;
pub mod tokenizer;

pub use acceptance::{Acceptance, Agreement};
pub use cache_controller::{reconcile, reconcile_pair, CacheRole, TrimReport};
pub use config::{SpeculativeConfig, DEFAULT_CANARY};
pub use decode::{greedy_generate, DecodeConfig, DecodeExecutor, DecodeStepResult, GreedyDecoder};
pub use error::InferenceError;
pub use input::{ForwardInput, MAX_POSITIONS};
pub use model::{CausalModel, ForwardOutput};
pub use output::{DecodeOutput, FinishReason, GenerationResult};
pub use pipeline::{GenerationMode, SpeculativePipeline};
pub use speculative::{CancelFn, SpeculativeDecoder};
pub use stats::SpeculativeStats;
pub use synthetic::{SyntheticConfig, SyntheticModel};
pub use tokenizer::{ensure_compatible, fingerprint, ByteTokenizer, Tokenizer, TokenizerError};

#[cfg(feature = "hf-tokenizers")]
pub use tokenizer::HfTokenizer;
