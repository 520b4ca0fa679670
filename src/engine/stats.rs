//! Statistics for speculative decoding performance.

use std::time::Duration;

use serde::Serialize;

/// Counters for one decoding run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SpeculativeStats {
    /// Draft → verify → trim rounds completed.
    pub iterations: u64,
    /// Draft tokens proposed.
    pub total_draft_tokens: u64,
    /// Draft tokens that matched the verifier.
    pub total_matched: u64,
    /// Draft tokens discarded after a disagreement.
    pub total_rejected: u64,
    /// Tokens appended to the sequence, primer included.
    pub total_accepted: u64,
    /// Forward passes of the target model (prime + one per iteration).
    pub target_forward_passes: u64,
    /// Forward passes of the draft model.
    pub draft_forward_passes: u64,
    /// Positions dropped from the draft cache.
    pub draft_positions_trimmed: u64,
    /// Positions dropped from the target cache.
    pub target_positions_trimmed: u64,
    /// Time spent in draft generation.
    pub draft_time_ns: u64,
    /// Time spent in verification.
    pub verify_time_ns: u64,
}

impl SpeculativeStats {
    /// Fraction of proposed draft tokens the verifier agreed with.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_draft_tokens == 0 {
            return 0.0;
        }
        self.total_matched as f64 / self.total_draft_tokens as f64
    }

    /// Average tokens appended per verification round.
    pub fn avg_tokens_per_iteration(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        let speculative = self.total_accepted.saturating_sub(1);
        speculative as f64 / self.iterations as f64
    }

    /// Tokens produced per target forward pass (naive decoding gives 1.0).
    pub fn estimated_speedup(&self) -> f64 {
        if self.target_forward_passes == 0 {
            return 1.0;
        }
        self.total_accepted as f64 / self.target_forward_passes as f64
    }

    pub(crate) fn add_draft_time(&mut self, elapsed: Duration) {
        self.draft_time_ns += duration_ns(elapsed);
    }

    pub(crate) fn add_verify_time(&mut self, elapsed: Duration) {
        self.verify_time_ns += duration_ns(elapsed);
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speculative_stats() {
        let stats = SpeculativeStats {
            iterations: 25,
            total_draft_tokens: 100,
            total_matched: 75,
            total_accepted: 101,
            target_forward_passes: 26,
            ..Default::default()
        };

        assert!((stats.acceptance_rate() - 0.75).abs() < 0.01);
        assert!((stats.avg_tokens_per_iteration() - 4.0).abs() < 0.01);
        assert!(stats.estimated_speedup() > 3.8);
    }

    #[test]
    fn test_empty_stats() {
        let stats = SpeculativeStats::default();
        assert_eq!(stats.acceptance_rate(), 0.0);
        assert_eq!(stats.avg_tokens_per_iteration(), 0.0);
        assert_eq!(stats.estimated_speedup(), 1.0);
    }
}
