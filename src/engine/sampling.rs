//! Greedy token selection.
//!
//! Only argmax is supported; ties resolve to the lowest token id so the
//! draft, the verifier and the naive decoder always agree on equal logits.

use candle_core::{DType, Tensor};

use super::error::InferenceError;

/// Index of the largest logit, lowest index on ties.
pub fn argmax(row: &[f32]) -> Result<u32, InferenceError> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            return Err(InferenceError::ModelError(format!(
                "NaN logit at vocab index {}",
                i
            )));
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i as u32)
        .ok_or_else(|| InferenceError::ModelError("empty logits row".into()))
}

/// Greedy prediction for every row of a `[n, vocab]` logits tensor.
pub fn greedy_rows(logits: &Tensor) -> Result<Vec<u32>, InferenceError> {
    if logits.rank() != 2 {
        return Err(InferenceError::ModelError(format!(
            "expected [positions, vocab] logits, got {:?}",
            logits.dims()
        )));
    }
    let rows: Vec<Vec<f32>> = logits.to_dtype(DType::F32)?.to_vec2()?;
    rows.iter().map(|row| argmax(row)).collect()
}

/// Greedy prediction at the final position.
pub fn greedy_last(logits: &Tensor) -> Result<u32, InferenceError> {
    greedy_rows(logits)?
        .last()
        .copied()
        .ok_or_else(|| InferenceError::ModelError("logits have no positions".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_argmax_picks_first_max() {
        assert_eq!(argmax(&[0.1, 3.0, 3.0, -1.0]).unwrap(), 1);
        assert_eq!(argmax(&[-5.0]).unwrap(), 0);
    }

    #[test]
    fn test_argmax_rejects_nan_and_empty() {
        assert!(argmax(&[1.0, f32::NAN]).is_err());
        assert!(argmax(&[]).is_err());
    }

    #[test]
    fn test_greedy_rows() {
        let logits = Tensor::new(&[[0.0f32, 1.0, 0.5], [2.0, 1.0, 0.0]], &Device::Cpu).unwrap();
        assert_eq!(greedy_rows(&logits).unwrap(), vec![1, 0]);
        assert_eq!(greedy_last(&logits).unwrap(), 0);
    }

    #[test]
    fn test_greedy_rows_requires_rank_two() {
        let logits = Tensor::new(&[0.0f32, 1.0], &Device::Cpu).unwrap();
        assert!(greedy_rows(&logits).is_err());
    }
}
