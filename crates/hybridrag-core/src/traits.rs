use async_trait::async_trait;
use std::sync::Arc;

use crate::access::Predicate;
use crate::error::Result;
use crate::types::{Chunk, ChunkId, RankedList, SourceKind};

/// Text to vector model. Called by the caller of the retriever, never inside it.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Embed a search query. Models with asymmetric query/document encoders override this.
    fn embed_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[query.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for query"))
    }
}

/// Read-only accessor for chunk text and metadata.
pub trait ChunkStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<Chunk>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Approximate nearest neighbour index over chunk embeddings.
///
/// `search` must return at most `k` `(id, cosine similarity)` pairs in
/// descending order, only for ids accepted by `accept`, without duplicates.
/// Results must be reproducible for a fixed index state.
pub trait AnnIndex: Send + Sync {
    fn dim(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
    fn insert(&self, id: ChunkId, vector: Vec<f32>) -> Result<()>;
    fn delete(&self, id: &str) -> Result<bool>;
    fn search(&self, query: &[f32], k: usize, accept: &dyn Fn(&str) -> bool) -> Result<Vec<(ChunkId, f32)>>;
}

/// Query handed to every retrieval source; each source reads the part it understands.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, vector: Option<Vec<f32>>) -> Self { Self { text: text.into(), vector } }
}

/// A backend that turns a query into a [`RankedList`] under a metadata predicate.
#[async_trait]
pub trait RankedSearchSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn search(&self, query: &SearchQuery, top_k: usize, filter: &Predicate) -> Result<RankedList>;
}
