//! Thin wrapper around `tiktoken-rs` with an approximate fallback.
//!
//! Exact token counts require a BPE encoding that matches the target
//! model. Callers that cannot resolve one (unknown model, failed ranks
//! download at build time, ...) should fall back to [`approx_count`],
//! which over- rather than under-estimates for typical English text.

use tiktoken_rs::CoreBPE;

/// Average bytes per token assumed by the approximate counter.
const APPROX_BYTES_PER_TOKEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("failed to load encoding: {0}")]
    Load(#[from] anyhow::Error),
}

/// The BPE encodings this wrapper knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingId {
    O200kBase,
    Cl100kBase,
}

impl EncodingId {
    pub fn from_name(name: &str) -> Result<Self, TokenizerError> {
        match name {
            "o200k_base" => Ok(EncodingId::O200kBase),
            "cl100k_base" => Ok(EncodingId::Cl100kBase),
            other => Err(TokenizerError::UnknownEncoding(other.to_string())),
        }
    }
}

pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    pub fn new(encoding: EncodingId) -> Result<Self, TokenizerError> {
        let bpe = match encoding {
            EncodingId::O200kBase => tiktoken_rs::o200k_base()?,
            EncodingId::Cl100kBase => tiktoken_rs::cl100k_base()?,
        };
        Ok(Self { bpe })
    }

    pub fn for_name(name: &str) -> Result<Self, TokenizerError> {
        Self::new(EncodingId::from_name(name)?)
    }

    /// Number of tokens in `text`, treating special-token strings as
    /// ordinary text.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

/// Heuristic token count for when no exact encoding is available.
pub fn approx_count(text: &str) -> usize {
    text.len().div_ceil(APPROX_BYTES_PER_TOKEN)
}
