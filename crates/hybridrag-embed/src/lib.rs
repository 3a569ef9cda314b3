//! Embedding backends behind [`hybridrag_core::traits::Embedder`].
//!
//! Only a deterministic feature-hashing embedder ships here. It needs no model
//! files, which makes it the default for the CLI and for tests; real models
//! plug in by implementing the same trait.
use std::hash::Hasher;

use anyhow::{bail, Result};
use tracing::debug;
use twox_hash::XxHash64;

pub use hybridrag_core::traits::Embedder;

pub const DEFAULT_DIM: usize = 256;

/// Signed feature hashing over lower-cased alphanumeric tokens, L2-normalized.
///
/// Texts sharing tokens get positive cosine similarity; unrelated texts land
/// near zero. Text without any token embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder { dim: usize, seed: u64 }

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 { bail!("embedding dimension must be > 0"); }
        Ok(Self { dim, seed: 0 })
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self { self.seed = seed; self }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(self.seed);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { for x in &mut v { *x /= norm; } }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(count = texts.len(), dim = self.dim, "hashing embed batch");
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Embedder used when no model is configured; `dim == 0` falls back to [`DEFAULT_DIM`].
pub fn get_default_embedder(dim: usize) -> Result<Box<dyn Embedder>> {
    let dim = if dim == 0 { DEFAULT_DIM } else { dim };
    Ok(Box::new(HashingEmbedder::new(dim)?))
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_case_insensitive() {
        let e = HashingEmbedder::new(64).unwrap();
        assert_eq!(e.embed_text("Fire, WATER"), e.embed_text("fire water"));
    }

    #[test]
    fn zero_dim_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
        assert_eq!(get_default_embedder(0).unwrap().dim(), DEFAULT_DIM);
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let e = HashingEmbedder::new(16).unwrap();
        assert!(e.embed_text("  ,;  ").iter().all(|x| *x == 0.0));
    }
}
