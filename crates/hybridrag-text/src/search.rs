use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use hybridrag_core::access::Predicate;
use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::{ChunkStore, RankedSearchSource, SearchQuery};
use hybridrag_core::types::{RankedList, SourceKind};

use crate::index::Bm25Index;

/// Keyword source: BM25 over a shared [`Bm25Index`], filtered on chunk metadata
/// from the shared [`ChunkStore`]. Chunks missing from the store are skipped.
#[derive(Clone)]
pub struct Bm25Scorer {
	index: Arc<Bm25Index>,
	store: Arc<dyn ChunkStore>,
}

impl Bm25Scorer {
	pub fn new(index: Arc<Bm25Index>, store: Arc<dyn ChunkStore>) -> Self { Self { index, store } }

	#[instrument(skip_all, fields(terms = terms.len(), top_k))]
	pub fn search_terms(&self, terms: &[String], top_k: usize, filter: &Predicate) -> Result<RankedList> {
		let accept = |id: &str| self.store.get(id).is_some_and(|c| filter.matches(&c.metadata));
		let hits = self.index.score(terms, top_k, &accept)?;
		debug!(hits = hits.len(), "bm25 search done");
		RankedList::try_new(SourceKind::Keyword, hits)
	}

	pub fn index(&self) -> &Arc<Bm25Index> { &self.index }
}

#[async_trait]
impl RankedSearchSource for Bm25Scorer {
	fn kind(&self) -> SourceKind { SourceKind::Keyword }

	/// Scoring runs on the blocking pool so a large scan never stalls the
	/// runtime worker that drives the other sources.
	async fn search(&self, query: &SearchQuery, top_k: usize, filter: &Predicate) -> Result<RankedList> {
		let (this, text, filter) = (self.clone(), query.text.clone(), filter.clone());
		let joined = tokio::task::spawn_blocking(move || {
			let terms = this.index.analyzer().terms(&text);
			this.search_terms(&terms, top_k, &filter)
		})
		.await;
		match joined {
			Ok(result) => result,
			Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
			Err(e) => Err(Error::unavailable(SourceKind::Keyword, format!("scoring task failed: {e}"))),
		}
	}
}
