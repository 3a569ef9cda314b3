//! Second-stage reordering of post-filtered candidates.
//!
//! A [`Reranker`] sees the query and the text of every candidate that survived
//! fusion and the access post-filter, and returns the ones worth keeping in its
//! own order. Fusion scores and provenance stay on each hit; the reranker's
//! score is recorded next to them in [`SearchResult::rerank_score`].
//!
//! [`SearchResult::rerank_score`]: hybridrag_core::types::SearchResult::rerank_score

use tracing::debug;

use hybridrag_core::error::Result;
use hybridrag_core::types::Hit;

/// Relevance a [`Reranker`] assigned to one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    /// Position of the candidate in the `documents` slice passed to `rerank`.
    pub index: usize,
    pub score: f32,
}

/// Reorders candidate passages for a query, typically with a cross-encoder.
///
/// Returns at most `top_k` scores, best first. Out-of-range or repeated
/// indices and non-finite scores are ignored by the retriever.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, documents: &[&str], top_k: usize) -> Result<Vec<RerankScore>>;
}

/// Run `reranker` over `candidates` and keep at most `top_k` of them in the
/// reranker's order.
pub(crate) fn apply(reranker: &dyn Reranker, query: &str, candidates: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let scores = {
        let documents: Vec<&str> = candidates.iter().map(|h| h.chunk.text.as_str()).collect();
        reranker.rerank(query, &documents, top_k)?
    };
    let mut slots: Vec<Option<Hit>> = candidates.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(top_k.min(slots.len()));
    for RerankScore { index, score } in scores {
        if out.len() == top_k {
            break;
        }
        if !score.is_finite() {
            debug!(index, "ignoring non-finite rerank score");
            continue;
        }
        let Some(mut hit) = slots.get_mut(index).and_then(Option::take) else {
            debug!(index, "ignoring unknown or repeated rerank index");
            continue;
        };
        hit.result.rerank_score = Some(score);
        out.push(hit);
    }
    Ok(out)
}
