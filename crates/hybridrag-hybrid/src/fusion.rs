//! Rank fusion.
//!
//! [`FusionEngine::fuse`] merges per-source [`RankedList`]s into one ranking,
//! deduplicating by chunk id and recording which sources contributed. Lists are
//! processed in [`SourceKind`] order, so the output does not depend on the
//! order in which sources finished.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use hybridrag_core::config::{FusionKind, FusionSettings};
use hybridrag_core::error::{Error, Result};
use hybridrag_core::types::{compare_entries, ChunkId, RankedList, SearchResult, SourceKind};

pub const DEFAULT_RRF_K: f32 = 60.0;
const WEIGHT_SUM_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum FusionStrategy {
    /// Reciprocal rank fusion: `Σ 1 / (k + rank)`, rank 1-based.
    Rrf { k: f32 },
    /// Min-max normalize each list, then `Σ weight(source) * score`.
    /// Empty weights split evenly across the lists being fused.
    Weighted { weights: BTreeMap<SourceKind, f32> },
}

impl Default for FusionStrategy {
    fn default() -> Self { Self::Rrf { k: DEFAULT_RRF_K } }
}

impl FusionStrategy {
    pub fn rrf(k: f32) -> Result<Self> {
        let s = Self::Rrf { k };
        s.validate()?;
        Ok(s)
    }

    pub fn weighted(weights: BTreeMap<SourceKind, f32>) -> Result<Self> {
        let s = Self::Weighted { weights };
        s.validate()?;
        Ok(s)
    }

    /// `alpha` on the vector list, `1 - alpha` on the keyword list.
    pub fn alpha(alpha: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::config(format!("alpha must be within [0, 1], got {alpha}")));
        }
        Self::weighted(BTreeMap::from([(SourceKind::Vector, alpha), (SourceKind::Keyword, 1.0 - alpha)]))
    }

    pub fn from_settings(settings: &FusionSettings) -> Result<Self> {
        match settings.strategy {
            FusionKind::Rrf => Self::rrf(settings.rrf_k),
            FusionKind::Weighted => Self::weighted(settings.weights.clone()),
        }
    }

    /// Explicit weights must name every source kind that can contribute a list.
    pub fn check_covers(&self, kinds: impl IntoIterator<Item = SourceKind>) -> Result<()> {
        let Self::Weighted { weights } = self else { return Ok(()) };
        if weights.is_empty() {
            return Ok(());
        }
        match kinds.into_iter().find(|k| !weights.contains_key(k)) {
            Some(missing) => Err(Error::config(format!("fusion weights have no entry for the {missing} source"))),
            None => Ok(()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Rrf { k } => {
                if !k.is_finite() || *k < 0.0 {
                    return Err(Error::config(format!("rrf k must be a finite value >= 0, got {k}")));
                }
            }
            Self::Weighted { weights } => {
                if weights.is_empty() {
                    return Ok(());
                }
                if let Some((source, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
                    return Err(Error::config(format!("weight for {source} must be finite and >= 0, got {w}")));
                }
                let sum: f32 = weights.values().sum();
                if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                    return Err(Error::config(format!("fusion weights must sum to 1, got {sum}")));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Accumulator {
    fused: f32,
    source_scores: BTreeMap<SourceKind, f32>,
    provenance: BTreeSet<SourceKind>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FusionEngine;

impl FusionEngine {
    pub fn new() -> Self { Self }

    /// Fuse `lists` into at most `top_k` results, best first, ties by chunk id.
    ///
    /// A single list is still re-scored by the strategy. Two lists from the
    /// same source, `top_k == 0` or unusable weights are `InvalidConfiguration`.
    pub fn fuse(&self, lists: &[RankedList], strategy: &FusionStrategy, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(Error::config("top_k must be > 0"));
        }
        strategy.validate()?;
        let mut ordered: Vec<&RankedList> = lists.iter().collect();
        ordered.sort_by_key(|l| l.source());
        let mut seen = HashSet::new();
        if let Some(dup) = ordered.iter().find(|l| !seen.insert(l.source())) {
            return Err(Error::config(format!("more than one {} list passed to fusion", dup.source())));
        }

        let mut acc: BTreeMap<&str, Accumulator> = BTreeMap::new();
        match strategy {
            FusionStrategy::Rrf { k } => {
                for list in &ordered {
                    for (pos, (id, raw)) in list.entries().iter().enumerate() {
                        #[allow(clippy::cast_precision_loss)]
                        let contribution = 1.0 / (k + (pos + 1) as f32);
                        add(&mut acc, id, list.source(), *raw, contribution);
                    }
                }
            }
            FusionStrategy::Weighted { weights } => {
                let weights = effective_weights(weights, &ordered)?;
                for list in &ordered {
                    let w = weights.get(&list.source()).copied().unwrap_or(0.0);
                    for ((id, raw), norm) in list.entries().iter().zip(min_max(list)) {
                        add(&mut acc, id, list.source(), *raw, w * norm);
                    }
                }
            }
        }

        let mut fused: Vec<(&str, Accumulator)> = acc.into_iter().collect();
        fused.sort_by(|a, b| compare_entries((a.0, a.1.fused), (b.0, b.1.fused)));
        fused.truncate(top_k);
        debug!(lists = ordered.len(), results = fused.len(), "fused");
        Ok(fused
            .into_iter()
            .enumerate()
            .map(|(i, (id, a))| SearchResult {
                chunk_id: ChunkId::from(id),
                source_scores: a.source_scores,
                fused_score: a.fused,
                rerank_score: None,
                rank: i + 1,
                provenance: a.provenance,
            })
            .collect())
    }
}

fn add<'a>(acc: &mut BTreeMap<&'a str, Accumulator>, id: &'a str, source: SourceKind, raw: f32, contribution: f32) {
    let entry = acc.entry(id).or_default();
    entry.fused += contribution;
    entry.source_scores.insert(source, raw);
    entry.provenance.insert(source);
}

/// Weights for the sources actually present. Configured weights are rescaled
/// to sum to 1 over those sources; if they sum to 0 the split is even.
fn effective_weights(configured: &BTreeMap<SourceKind, f32>, lists: &[&RankedList]) -> Result<BTreeMap<SourceKind, f32>> {
    #[allow(clippy::cast_precision_loss)]
    let even = 1.0 / lists.len().max(1) as f32;
    if configured.is_empty() {
        return Ok(lists.iter().map(|l| (l.source(), even)).collect());
    }
    let mut present = BTreeMap::new();
    for list in lists {
        let Some(w) = configured.get(&list.source()) else {
            return Err(Error::config(format!("no fusion weight configured for {}", list.source())));
        };
        present.insert(list.source(), *w);
    }
    let sum: f32 = present.values().sum();
    if sum <= f32::EPSILON {
        return Ok(present.into_keys().map(|s| (s, even)).collect());
    }
    Ok(present.into_iter().map(|(s, w)| (s, w / sum)).collect())
}

/// Scores mapped to [0, 1]; a constant list maps to 1.0.
fn min_max(list: &RankedList) -> Vec<f32> {
    let scores: Vec<f32> = list.entries().iter().map(|(_, s)| *s).collect();
    let (min, max) = scores.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    let range = max - min;
    scores.into_iter().map(|s| if range > f32::EPSILON { (s - min) / range } else { 1.0 }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(source: SourceKind, v: &[(&str, f32)]) -> RankedList {
        RankedList::try_new(source, v.iter().map(|(i, s)| ((*i).to_string(), *s)).collect()).unwrap()
    }

    fn keyword() -> RankedList { list(SourceKind::Keyword, &[("A", 10.0), ("B", 8.0), ("C", 5.0)]) }
    fn vector() -> RankedList { list(SourceKind::Vector, &[("B", 0.9), ("C", 0.85), ("D", 0.8)]) }

    fn ids(results: &[SearchResult]) -> Vec<&str> { results.iter().map(|r| r.chunk_id.as_str()).collect() }

    #[test]
    fn rrf_puts_shared_chunk_first() {
        let out = FusionEngine::new().fuse(&[keyword(), vector()], &FusionStrategy::default(), 3).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].chunk_id, "B");
        assert_eq!(ids(&out), vec!["B", "C", "A"]);
        assert_eq!(out.iter().filter(|r| r.chunk_id == "B").count(), 1);
        assert_eq!(out[0].provenance, BTreeSet::from([SourceKind::Keyword, SourceKind::Vector]));
        assert_eq!(out[0].keyword_score(), Some(8.0));
        assert_eq!(out[0].vector_score(), Some(0.9));
        assert!((out[0].fused_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-7);
        assert_eq!(out.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn input_order_does_not_matter() {
        let e = FusionEngine::new();
        for strategy in [FusionStrategy::default(), FusionStrategy::alpha(0.3).unwrap()] {
            let a = e.fuse(&[keyword(), vector()], &strategy, 10).unwrap();
            let b = e.fuse(&[vector(), keyword()], &strategy, 10).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn rrf_contribution_decreases_with_rank() {
        let e = FusionEngine::new();
        let s = FusionStrategy::default();
        let out = e.fuse(&[list(SourceKind::Keyword, &[("x", 3.0), ("y", 2.0), ("z", 1.0)])], &s, 3).unwrap();
        assert!(out[0].fused_score > out[1].fused_score);
        assert!(out[1].fused_score > out[2].fused_score);
    }

    #[test]
    fn single_list_is_rescored() {
        let out = FusionEngine::new().fuse(&[keyword()], &FusionStrategy::default(), 10).unwrap();
        assert_eq!(ids(&out), vec!["A", "B", "C"]);
        assert!((out[0].fused_score - 1.0 / 61.0).abs() < 1e-7);
        assert_eq!(out[0].keyword_score(), Some(10.0));
    }

    #[test]
    fn empty_input_is_empty_output() {
        let e = FusionEngine::new();
        assert!(e.fuse(&[], &FusionStrategy::default(), 5).unwrap().is_empty());
        let empties = [RankedList::empty(SourceKind::Keyword), RankedList::empty(SourceKind::Vector)];
        assert!(e.fuse(&empties, &FusionStrategy::alpha(0.5).unwrap(), 5).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let out = FusionEngine::new()
            .fuse(&[list(SourceKind::Keyword, &[("b", 1.0)]), list(SourceKind::Vector, &[("a", 0.5)])], &FusionStrategy::default(), 5)
            .unwrap();
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn weighted_normalizes_then_combines() {
        let out = FusionEngine::new().fuse(&[keyword(), vector()], &FusionStrategy::alpha(0.5).unwrap(), 4).unwrap();
        // keyword: A=1, B=0.6, C=0; vector: B=1, C=0.5, D=0
        assert_eq!(ids(&out), vec!["B", "A", "C", "D"]);
        assert!((out[0].fused_score - 0.8).abs() < 1e-6);
        assert!((out[1].fused_score - 0.5).abs() < 1e-6);
        assert!((out[2].fused_score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn weighted_constant_list_normalizes_to_one() {
        let flat = list(SourceKind::Keyword, &[("a", 2.0), ("b", 2.0)]);
        let out = FusionEngine::new().fuse(&[flat], &FusionStrategy::Weighted { weights: BTreeMap::new() }, 5).unwrap();
        assert!(out.iter().all(|r| (r.fused_score - 1.0).abs() < 1e-6));
    }

    #[test]
    fn degraded_weights_are_rescaled() {
        let out = FusionEngine::new().fuse(&[keyword()], &FusionStrategy::alpha(0.8).unwrap(), 1).unwrap();
        assert!((out[0].fused_score - 1.0).abs() < 1e-6);
        let zero = FusionEngine::new().fuse(&[keyword()], &FusionStrategy::alpha(1.0).unwrap(), 1).unwrap();
        assert!((zero[0].fused_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_configuration() {
        let e = FusionEngine::new();
        assert!(matches!(e.fuse(&[keyword()], &FusionStrategy::default(), 0), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(e.fuse(&[keyword(), keyword()], &FusionStrategy::default(), 3), Err(Error::InvalidConfiguration(_))));
        let bad_sum = FusionStrategy::Weighted { weights: BTreeMap::from([(SourceKind::Vector, 0.7), (SourceKind::Keyword, 0.7)]) };
        assert!(matches!(e.fuse(&[keyword()], &bad_sum, 3), Err(Error::InvalidConfiguration(_))));
        let vector_only = FusionStrategy::weighted(BTreeMap::from([(SourceKind::Vector, 1.0)])).unwrap();
        assert!(matches!(e.fuse(&[keyword()], &vector_only, 3), Err(Error::InvalidConfiguration(_))));
        assert!(FusionStrategy::alpha(1.5).is_err());
        assert!(FusionStrategy::rrf(f32::NAN).is_err());
    }
}
