//! Domain types shared by the search backends, the fusion engine and the
//! retriever.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// Well-known metadata keys read by the access filter.
pub mod meta_keys {
    pub const VISIBILITY: &str = "visibility";
    pub const DEPARTMENT: &str = "department";
    pub const ALLOWED_GROUPS: &str = "allowed_groups";
    pub const DENIED_PRINCIPALS: &str = "denied_principals";
    pub const CLASSIFICATION_LEVEL: &str = "classification_level";
}

/// A source document as handed over by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    /// Build chunk `index` of `total` carrying a copy of this document's metadata.
    pub fn chunk(&self, index: usize, total: usize, text: impl Into<String>) -> Chunk {
        Chunk {
            id: format!("{}:{}", self.id, index),
            doc_id: self.id.clone(),
            text: text.into(),
            chunk_index: index,
            total_chunks: total,
            metadata: self.metadata.clone(),
            embedding: None,
        }
    }
}

/// A chunk of a source document that is independently indexed.
///
/// - `id`: globally unique chunk identifier
/// - `doc_id`: identity of the owning document (not an owning reference)
/// - `chunk_index`/`total_chunks`: position within the parent document
/// - `metadata`: denormalized copy of the document metadata, used for filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Ordered clearance scale; higher values see more.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClearanceLevel(pub u8);

/// The authenticated identity issuing a query. Built per request by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: HashSet<String>,
    #[serde(default)]
    pub groups: HashSet<String>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub clearance_level: ClearanceLevel,
    #[serde(default)]
    pub region: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self { Self { id: id.into(), ..Self::default() } }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = department.into();
        self
    }

    #[must_use]
    pub fn with_clearance(mut self, level: u8) -> Self {
        self.clearance_level = ClearanceLevel(level);
        self
    }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Keyword,
    Graph,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Vector => f.write_str("vector"),
            SourceKind::Keyword => f.write_str("keyword"),
            SourceKind::Graph => f.write_str("graph"),
        }
    }
}

/// Ranked output of a single retrieval source.
///
/// Entries are ordered by score descending; equal scores are ordered by chunk
/// id ascending. Ids are unique and scores are never NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    source: SourceKind,
    entries: Vec<(ChunkId, f32)>,
}

impl RankedList {
    pub fn empty(source: SourceKind) -> Self { Self { source, entries: Vec::new() } }

    /// Accept an already ordered list, rejecting anything that breaks the ordering invariant.
    pub fn try_new(source: SourceKind, entries: Vec<(ChunkId, f32)>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for (i, (id, score)) in entries.iter().enumerate() {
            if score.is_nan() {
                return Err(Error::config(format!("{source} list has NaN score for '{id}'")));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::config(format!("{source} list repeats chunk '{id}'")));
            }
            if i > 0 {
                let (prev_id, prev_score) = &entries[i - 1];
                if compare_entries((prev_id.as_str(), *prev_score), (id.as_str(), *score)) != std::cmp::Ordering::Less {
                    return Err(Error::config(format!("{source} list is not ordered at position {}", i + 1)));
                }
            }
        }
        Ok(Self { source, entries })
    }

    /// Sort, drop NaN scores and keep the best score per chunk id.
    pub fn from_unsorted(source: SourceKind, entries: Vec<(ChunkId, f32)>) -> Self {
        let mut best: HashMap<ChunkId, f32> = HashMap::with_capacity(entries.len());
        for (id, score) in entries.into_iter().filter(|(_, s)| !s.is_nan()) {
            best.entry(id).and_modify(|old| if score > *old { *old = score }).or_insert(score);
        }
        let mut entries: Vec<(ChunkId, f32)> = best.into_iter().collect();
        entries.sort_by(|a, b| compare_entries((a.0.as_str(), a.1), (b.0.as_str(), b.1)));
        Self { source, entries }
    }

    #[must_use]
    pub fn truncated(mut self, k: usize) -> Self {
        self.entries.truncate(k);
        self
    }

    pub fn source(&self) -> SourceKind { self.source }
    pub fn entries(&self) -> &[(ChunkId, f32)] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn ids(&self) -> impl Iterator<Item = &str> { self.entries.iter().map(|(id, _)| id.as_str()) }
}

/// Score descending, then chunk id ascending.
pub fn compare_entries(a: (&str, f32), b: (&str, f32)) -> std::cmp::Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// One fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    /// Raw score reported by each contributing source.
    pub source_scores: BTreeMap<SourceKind, f32>,
    pub fused_score: f32,
    /// Set when a reranker reordered the fused candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// 1-based position in the final ranking.
    pub rank: usize,
    pub provenance: BTreeSet<SourceKind>,
}

impl SearchResult {
    pub fn vector_score(&self) -> Option<f32> { self.source_scores.get(&SourceKind::Vector).copied() }
    pub fn keyword_score(&self) -> Option<f32> { self.source_scores.get(&SourceKind::Keyword).copied() }
}

/// A fused result with its chunk payload attached.
#[derive(Debug, Clone)]
pub struct Hit {
    pub result: SearchResult,
    pub chunk: Arc<Chunk>,
}
