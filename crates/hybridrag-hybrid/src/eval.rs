//! Offline retrieval quality metrics over ranked chunk ids.

use std::collections::HashSet;

use serde::Serialize;

/// Share of `relevant` found in the first `k` retrieved ids. 0 when nothing is relevant.
pub fn recall_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<String>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let r = hits_in_top(retrieved, relevant, k) as f32 / relevant.len() as f32;
    r
}

/// Relevant ids in the first `k`, divided by `k` (not by the number retrieved).
pub fn precision_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<String>, k: usize) -> f32 {
    if k == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let p = hits_in_top(retrieved, relevant, k) as f32 / k as f32;
    p
}

/// `1 / rank` of the first relevant id, 0 when none is retrieved.
pub fn reciprocal_rank<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<String>) -> f32 {
    retrieved
        .iter()
        .position(|id| relevant.contains(AsRef::<str>::as_ref(id)))
        .map_or(0.0, |pos| {
            #[allow(clippy::cast_precision_loss)]
            let rr = 1.0 / (pos + 1) as f32;
            rr
        })
}

fn hits_in_top<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<String>, k: usize) -> usize {
    let top: HashSet<&str> = retrieved.iter().take(k).map(AsRef::<str>::as_ref).collect();
    top.iter().filter(|id| relevant.contains(**id)).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    pub recall_at_5: f32,
    pub recall_at_10: f32,
    pub precision_at_5: f32,
    pub mrr: f32,
}

impl RetrievalMetrics {
    pub fn evaluate<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<String>) -> Self {
        Self {
            recall_at_5: recall_at_k(retrieved, relevant, 5),
            recall_at_10: recall_at_k(retrieved, relevant, 10),
            precision_at_5: precision_at_k(retrieved, relevant, 5),
            mrr: reciprocal_rank(retrieved, relevant),
        }
    }

    /// Mean of each metric over several queries.
    pub fn mean(all: &[Self]) -> Option<Self> {
        if all.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = all.len() as f32;
        let sum = |f: fn(&Self) -> f32| all.iter().map(f).sum::<f32>() / n;
        Some(Self {
            recall_at_5: sum(|m| m.recall_at_5),
            recall_at_10: sum(|m| m.recall_at_10),
            precision_at_5: sum(|m| m.precision_at_5),
            mrr: sum(|m| m.mrr),
        })
    }
}
