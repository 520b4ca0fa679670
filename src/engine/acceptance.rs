//! Acceptance of draft proposals against verifier predictions.
//!
//! `draft[i]` and `verify[i]` are both predictions for the same position:
//! the draft's guess and the verifier's greedy choice after seeing the same
//! prefix. Everything up to the first disagreement is confirmed; at the
//! disagreement the verifier's own token replaces the draft's guess.

use super::error::InferenceError;

/// How the draft compared with the verifier over one proposal batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// Every proposed token matched.
    Full,
    /// First mismatch at this index.
    DivergedAt(usize),
}

/// Outcome of checking one proposal batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    agreement: Agreement,
    proposed: usize,
    tokens: Vec<u32>,
}

impl Acceptance {
    /// Compare `draft` with `verified`, which must have the same non-zero length.
    pub fn evaluate(draft: &[u32], verified: &[u32]) -> Result<Self, InferenceError> {
        if draft.is_empty() {
            return Err(InferenceError::InputValidation(
                "cannot accept an empty proposal".into(),
            ));
        }
        if draft.len() != verified.len() {
            return Err(InferenceError::ModelError(format!(
                "verifier returned {} predictions for {} proposed tokens",
                verified.len(),
                draft.len()
            )));
        }

        let mismatch = draft.iter().zip(verified).position(|(d, v)| d != v);
        let (agreement, disagree_idx) = match mismatch {
            Some(idx) => (Agreement::DivergedAt(idx), idx),
            None => (Agreement::Full, draft.len() - 1),
        };

        Ok(Self {
            agreement,
            proposed: draft.len(),
            tokens: verified[..=disagree_idx].to_vec(),
        })
    }

    pub fn agreement(&self) -> Agreement {
        self.agreement
    }

    /// Index of the last accepted position (K-1 on full agreement).
    pub fn disagree_idx(&self) -> usize {
        match self.agreement {
            Agreement::Full => self.proposed - 1,
            Agreement::DivergedAt(idx) => idx,
        }
    }

    /// Number of draft tokens in the proposal.
    pub fn proposed(&self) -> usize {
        self.proposed
    }

    /// Tokens to append to the sequence: `verify[0..=disagree_idx]`.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Number of tokens appended; always between 1 and K.
    pub fn accepted_len(&self) -> usize {
        self.tokens.len()
    }

    /// Draft tokens the verifier agreed with.
    pub fn matched(&self) -> usize {
        match self.agreement {
            Agreement::Full => self.proposed,
            Agreement::DivergedAt(idx) => idx,
        }
    }

    /// Draft tokens thrown away.
    pub fn rejected(&self) -> usize {
        self.proposed - self.matched()
    }

    /// The verifier's replacement for a rejected draft token, if any.
    pub fn correction(&self) -> Option<u32> {
        match self.agreement {
            Agreement::Full => None,
            Agreement::DivergedAt(_) => self.tokens.last().copied(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.agreement == Agreement::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_agreement() {
        let acc = Acceptance::evaluate(&[1, 2, 3, 4], &[1, 2, 3, 4]).unwrap();
        assert!(acc.is_full());
        assert_eq!(acc.disagree_idx(), 3);
        assert_eq!(acc.tokens(), &[1, 2, 3, 4]);
        assert_eq!(acc.matched(), 4);
        assert_eq!(acc.rejected(), 0);
        assert_eq!(acc.correction(), None);
    }

    #[test]
    fn test_diverge_midway_takes_verifier_token() {
        let acc = Acceptance::evaluate(&[1, 2, 3, 4], &[1, 2, 9, 4]).unwrap();
        assert_eq!(acc.agreement(), Agreement::DivergedAt(2));
        assert_eq!(acc.tokens(), &[1, 2, 9]);
        assert_eq!(acc.matched(), 2);
        assert_eq!(acc.rejected(), 2);
        assert_eq!(acc.correction(), Some(9));
    }

    #[test]
    fn test_diverge_at_zero_accepts_one() {
        let acc = Acceptance::evaluate(&[5, 6], &[7, 6]).unwrap();
        assert_eq!(acc.accepted_len(), 1);
        assert_eq!(acc.tokens(), &[7]);
        assert_eq!(acc.matched(), 0);
    }

    #[test]
    fn test_later_matches_after_mismatch_ignored() {
        // Position 1 disagrees; the agreement at positions 2..4 cannot count
        // because those verifier predictions saw the wrong prefix.
        let acc = Acceptance::evaluate(&[1, 2, 3, 4], &[1, 8, 3, 4]).unwrap();
        assert_eq!(acc.tokens(), &[1, 8]);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(Acceptance::evaluate(&[1, 2], &[1]).is_err());
        assert!(Acceptance::evaluate(&[], &[]).is_err());
    }
}
