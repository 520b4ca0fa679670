//! Metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder; without one every
//! call below is a no-op.

use metrics::{counter, gauge, histogram};

use crate::engine::SpeculativeStats;

/// Record one draft → verify → trim round.
pub fn record_speculative_cycle(proposed: usize, matched: usize, accepted: usize) {
    counter!("speculate_iterations_total").increment(1);
    counter!("speculate_draft_tokens_total").increment(proposed as u64);
    counter!("speculate_matched_tokens_total").increment(matched as u64);
    histogram!("speculate_accepted_per_iteration").record(accepted as f64);
}

/// Record totals for a finished generation.
pub fn record_generation(stats: &SpeculativeStats) {
    counter!("speculate_accepted_tokens_total").increment(stats.total_accepted);
    counter!("speculate_target_passes_total").increment(stats.target_forward_passes);
    if stats.total_draft_tokens > 0 {
        gauge!("speculate_acceptance_rate").set(stats.acceptance_rate());
    }
}
