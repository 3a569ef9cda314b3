use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use hybridrag_core::access::Predicate;
use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::{AnnIndex, ChunkStore, RankedSearchSource, SearchQuery};
use hybridrag_core::types::{RankedList, SourceKind};

/// Semantic source: nearest neighbours of a precomputed query embedding.
///
/// The query is never embedded here; callers pass the vector in. A missing or
/// all-zero vector yields an empty list rather than an error.
#[derive(Clone)]
pub struct VectorSearcher {
	index: Arc<dyn AnnIndex>,
	store: Arc<dyn ChunkStore>,
}

impl VectorSearcher {
	pub fn new(index: Arc<dyn AnnIndex>, store: Arc<dyn ChunkStore>) -> Self { Self { index, store } }

	pub fn index(&self) -> &Arc<dyn AnnIndex> { &self.index }

	#[instrument(skip_all, fields(dim = query.map(<[f32]>::len), top_k))]
	pub fn search_vector(&self, query: Option<&[f32]>, top_k: usize, filter: &Predicate) -> Result<RankedList> {
		let Some(query) = query else { return Ok(RankedList::empty(SourceKind::Vector)) };
		if query.len() != self.index.dim() {
			return Err(Error::config(format!("query vector has dimension {}, index expects {}", query.len(), self.index.dim())));
		}
		if top_k == 0 || query.iter().all(|x| *x == 0.0) {
			return Ok(RankedList::empty(SourceKind::Vector));
		}
		let accept = |id: &str| self.store.get(id).is_some_and(|c| filter.matches(&c.metadata));
		let hits = self.index.search(query, top_k, &accept)?;
		debug!(hits = hits.len(), "ann search done");
		// other AnnIndex impls may break ties differently
		Ok(RankedList::from_unsorted(SourceKind::Vector, hits).truncated(top_k))
	}
}

#[async_trait]
impl RankedSearchSource for VectorSearcher {
	fn kind(&self) -> SourceKind { SourceKind::Vector }

	async fn search(&self, query: &SearchQuery, top_k: usize, filter: &Predicate) -> Result<RankedList> {
		let Some(vector) = query.vector.clone() else { return Ok(RankedList::empty(SourceKind::Vector)) };
		let (this, filter) = (self.clone(), filter.clone());
		match tokio::task::spawn_blocking(move || this.search_vector(Some(&vector), top_k, &filter)).await {
			Ok(result) => result,
			Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
			Err(e) => Err(Error::unavailable(SourceKind::Vector, format!("ann search task failed: {e}"))),
		}
	}
}
