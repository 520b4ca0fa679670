//! Cache alignment between draft and target models.
//!
//! After a verification round both caches hold `cached_len + K` positions.
//! Only the positions whose inputs were confirmed may stay; everything past
//! the confirmed length is dropped before the next round starts.

use super::error::InferenceError;
use crate::memory::{KvCache, TrimOutcome};

/// Which model a cache belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRole {
    Draft,
    Target,
}

impl CacheRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Target => "target",
        }
    }
}

/// Positions dropped from each cache in one trim step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub draft: TrimOutcome,
    pub target: TrimOutcome,
}

/// Trim `cache` to `target_len` and confirm every layer ended up there.
pub fn reconcile(
    role: CacheRole,
    cache: &mut KvCache,
    target_len: usize,
) -> Result<TrimOutcome, InferenceError> {
    let outcome = cache.trim(target_len)?;
    ensure_len(role, cache, target_len)?;
    Ok(outcome)
}

/// Trim both caches to the confirmed sequence length.
pub fn reconcile_pair(
    draft: &mut KvCache,
    target: &mut KvCache,
    target_len: usize,
) -> Result<TrimReport, InferenceError> {
    let draft_outcome = reconcile(CacheRole::Draft, draft, target_len)?;
    let target_outcome = reconcile(CacheRole::Target, target, target_len)?;
    Ok(TrimReport {
        draft: draft_outcome,
        target: target_outcome,
    })
}

/// Fail with `CacheDesync` unless every layer of `cache` holds `expected` positions.
pub fn ensure_len(
    role: CacheRole,
    cache: &KvCache,
    expected: usize,
) -> Result<(), InferenceError> {
    if let Some(&actual) = cache.layer_lens().iter().find(|&&l| l != expected) {
        return Err(InferenceError::CacheDesync {
            model: role.as_str(),
            expected,
            actual,
        });
    }
    Ok(())
}
