//! Tokenization for draft/verifier pairs.
//!
//! Both models must map text to the same token ids, otherwise comparing
//! their greedy predictions position by position means nothing. The pair is
//! checked once, on a canary string, before any generation starts.

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::error::InferenceError;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Tokenizer load failed: {0}")]
    Load(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid token ID: {0}")]
    InvalidToken(u32),
}

/// Text <-> token id mapping shared by a draft/verifier pair.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError>;

    fn vocab_size(&self) -> u32;

    fn eos_token(&self) -> Option<u32> {
        None
    }

    /// Check if token is end-of-sequence.
    fn is_eos(&self, token: u32) -> bool {
        self.eos_token() == Some(token)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        (**self).encode(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        (**self).decode(tokens)
    }

    fn vocab_size(&self) -> u32 {
        (**self).vocab_size()
    }

    fn eos_token(&self) -> Option<u32> {
        (**self).eos_token()
    }
}

/// Byte-level tokenizer: one token per UTF-8 byte, optional EOS at id 256.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer {
    eos: bool,
}

impl ByteTokenizer {
    pub const EOS: u32 = 256;

    pub fn new() -> Self {
        Self { eos: false }
    }

    /// Byte tokenizer with an end-of-sequence token after the 256 byte ids.
    pub fn with_eos() -> Self {
        Self { eos: true }
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let mut bytes = Vec::with_capacity(tokens.len());
        for &token in tokens {
            match u8::try_from(token) {
                Ok(b) => bytes.push(b),
                Err(_) if self.is_eos(token) => {}
                Err(_) => return Err(TokenizerError::InvalidToken(token)),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> u32 {
        if self.eos {
            Self::EOS + 1
        } else {
            Self::EOS
        }
    }

    fn eos_token(&self) -> Option<u32> {
        self.eos.then_some(Self::EOS)
    }
}

/// HuggingFace `tokenizer.json` tokenizer.
#[cfg(feature = "hf-tokenizers")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos: Option<u32>,
}

#[cfg(feature = "hf-tokenizers")]
impl HfTokenizer {
    /// Load from a `tokenizer.json`, resolving `eos_token` if given.
    pub fn from_file(
        path: &std::path::Path,
        eos_token: Option<&str>,
    ) -> Result<Self, TokenizerError> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| TokenizerError::Load(e.to_string()))?;
        let eos = eos_token.and_then(|t| inner.token_to_id(t));
        Ok(Self { inner, eos })
    }
}

#[cfg(feature = "hf-tokenizers")]
impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        self.inner
            .encode(text, false)
            .map(|enc| enc.get_ids().to_vec())
            .map_err(|e| TokenizerError::EncodingFailed(e.to_string()))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        self.inner
            .decode(tokens, true)
            .map_err(|e| TokenizerError::DecodingFailed(e.to_string()))
    }

    fn vocab_size(&self) -> u32 {
        u32::try_from(self.inner.get_vocab_size(true)).unwrap_or(u32::MAX)
    }

    fn eos_token(&self) -> Option<u32> {
        self.eos
    }
}

/// SHA-256 over the little-endian token ids, hex encoded.
pub fn fingerprint(tokens: &[u32]) -> String {
    let mut hasher = Sha256::new();
    for t in tokens {
        hasher.update(t.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Verify that draft and target tokenizers agree on `canary`.
///
/// Returns the shared fingerprint of the canary encoding.
pub fn ensure_compatible<D, T>(draft: &D, target: &T, canary: &str) -> Result<String, InferenceError>
where
    D: Tokenizer + ?Sized,
    T: Tokenizer + ?Sized,
{
    if canary.is_empty() {
        return Err(InferenceError::InputValidation(
            "tokenizer canary cannot be empty".into(),
        ));
    }

    let draft_ids = draft.encode(canary)?;
    let target_ids = target.encode(canary)?;
    let draft_fp = fingerprint(&draft_ids);
    let target_fp = fingerprint(&target_ids);

    if draft_ids != target_ids || draft.eos_token() != target.eos_token() {
        tracing::error!(
            canary,
            draft = %draft_fp,
            target = %target_fp,
            "draft and target tokenizers disagree"
        );
        return Err(InferenceError::TokenizerMismatch {
            canary: canary.to_string(),
            draft: draft_fp,
            target: target_fp,
        });
    }

    tracing::debug!(canary, fingerprint = %target_fp, tokens = target_ids.len(), "tokenizers compatible");
    Ok(target_fp)
}
