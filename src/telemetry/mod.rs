//! Telemetry for speculative generation.
//!
//! Provides structured logging, generation spans, and metrics collection.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_generation, record_speculative_cycle};
pub use spans::{GenerationSpan, SpanExt};
