use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bm25::{Embedder, EmbedderBuilder, Scorer};
use tracing::debug;

use hybridrag_core::config::Bm25Settings;
use hybridrag_core::error::{Error, Result};
use hybridrag_core::types::{compare_entries, ChunkId, SourceKind};

use crate::analyzer::Analyzer;

struct Doc {
	text: String,
	len: usize,
}

/// `bm25` embedder and scorer for one snapshot of the corpus.
struct Engine {
	embedder: Embedder<u32, Analyzer>,
	scorer: Scorer<ChunkId, u32>,
}

impl Engine {
	fn build(docs: &BTreeMap<ChunkId, Doc>, total_len: usize, analyzer: &Analyzer, params: &Bm25Settings) -> Self {
		#[allow(clippy::cast_precision_loss)]
		let avgdl = if docs.is_empty() { 1.0 } else { total_len as f32 / docs.len() as f32 };
		let embedder = EmbedderBuilder::<u32, Analyzer>::with_avgdl(avgdl.max(f32::EPSILON))
			.tokenizer(analyzer.clone())
			.k1(params.k1)
			.b(params.b)
			.build();
		let mut scorer = Scorer::new();
		for (id, doc) in docs {
			scorer.upsert(id, embedder.embed(&doc.text));
		}
		debug!(docs = docs.len(), avgdl, "bm25 scorer rebuilt");
		Self { embedder, scorer }
	}

	fn rank(&self, query: &str, top_k: usize, accept: &dyn Fn(&str) -> bool) -> Vec<(ChunkId, f32)> {
		let query = self.embedder.embed(query);
		let mut ranked: Vec<(ChunkId, f32)> = self
			.scorer
			.matches(&query)
			.into_iter()
			.filter(|d| d.score > 0.0 && accept(d.id.as_str()))
			.map(|d| (d.id, d.score))
			.collect();
		ranked.sort_by(|a, b| compare_entries((a.0.as_str(), a.1), (b.0.as_str(), b.1)));
		ranked.truncate(top_k);
		ranked
	}
}

struct State {
	online: bool,
	docs: BTreeMap<ChunkId, Doc>,
	total_len: usize,
	/// `None` after a write; rebuilt by the next search.
	engine: Option<Engine>,
}

/// In-memory keyword index scored with Okapi BM25 through the `bm25` crate.
///
/// Written by ingestion (`insert`, `remove`), read concurrently by searches.
/// Document weights depend on the average chunk length, so a write marks the
/// scorer stale and the next search re-embeds the corpus once.
pub struct Bm25Index {
	state: RwLock<State>,
	analyzer: Analyzer,
	params: Bm25Settings,
}

impl Bm25Index {
	pub fn new(params: Bm25Settings) -> Result<Self> {
		params.validate()?;
		Ok(Self {
			state: RwLock::new(State { online: true, docs: BTreeMap::new(), total_len: 0, engine: None }),
			analyzer: Analyzer::english(),
			params,
		})
	}

	pub fn analyzer(&self) -> &Analyzer { &self.analyzer }
	pub fn params(&self) -> &Bm25Settings { &self.params }

	/// Index `text` under `id`, replacing any previous content for that id.
	pub fn insert(&self, id: impl Into<ChunkId>, text: &str) -> Result<()> {
		let doc = Doc { text: text.to_string(), len: self.analyzer.terms(text).len() };
		let mut state = self.write()?;
		state.total_len += doc.len;
		if let Some(old) = state.docs.insert(id.into(), doc) {
			state.total_len -= old.len;
		}
		state.engine = None;
		Ok(())
	}

	pub fn update(&self, id: impl Into<ChunkId>, text: &str) -> Result<()> { self.insert(id, text) }

	pub fn remove(&self, id: &str) -> Result<bool> {
		let mut state = self.write()?;
		let Some(old) = state.docs.remove(id) else { return Ok(false) };
		state.total_len -= old.len;
		state.engine = None;
		Ok(true)
	}

	pub fn len(&self) -> usize { self.state.read().map(|s| s.docs.len()).unwrap_or(0) }
	pub fn is_empty(&self) -> bool { self.len() == 0 }

	/// Take the index offline (e.g. during a rebuild); searches fail until it is back.
	pub fn set_online(&self, online: bool) -> Result<()> {
		self.write()?.online = online;
		Ok(())
	}

	/// Score every chunk containing at least one of `terms` and accepted by
	/// `accept`. Returns at most `top_k` `(id, score)` pairs, best first, ties
	/// by id ascending. Repeated query terms count once.
	pub fn score(&self, terms: &[String], top_k: usize, accept: &dyn Fn(&str) -> bool) -> Result<Vec<(ChunkId, f32)>> {
		let unique: BTreeSet<&str> = terms.iter().map(String::as_str).collect();
		let query = unique.into_iter().collect::<Vec<_>>().join(" ");
		{
			let state = self.read()?;
			if query.is_empty() || top_k == 0 || state.docs.is_empty() {
				return Ok(Vec::new());
			}
			if let Some(engine) = &state.engine {
				return Ok(engine.rank(&query, top_k, accept));
			}
		}
		let mut guard = self.write()?;
		if !guard.online {
			return Err(Error::unavailable(SourceKind::Keyword, "index offline"));
		}
		let state = &mut *guard;
		if state.engine.is_none() {
			state.engine = Some(Engine::build(&state.docs, state.total_len, &self.analyzer, &self.params));
		}
		Ok(state.engine.as_ref().map(|e| e.rank(&query, top_k, accept)).unwrap_or_default())
	}

	fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
		let guard = self.state.read().map_err(|_| Error::unavailable(SourceKind::Keyword, "index lock poisoned"))?;
		if !guard.online {
			return Err(Error::unavailable(SourceKind::Keyword, "index offline"));
		}
		Ok(guard)
	}

	fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
		self.state.write().map_err(|_| Error::unavailable(SourceKind::Keyword, "index lock poisoned"))
	}
}

impl fmt::Debug for Bm25Index {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Bm25Index").field("len", &self.len()).field("params", &self.params).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn index(docs: &[(&str, &str)]) -> Bm25Index {
		let idx = Bm25Index::new(Bm25Settings::default()).unwrap();
		for (id, text) in docs { idx.insert(*id, text).unwrap(); }
		idx
	}

	fn terms(q: &str) -> Vec<String> { Analyzer::english().terms(q) }

	#[test]
	fn matches_hand_computed_score() {
		let idx = index(&[("a", "rust rust memory"), ("b", "python memory"), ("c", "garbage collector")]);
		let hits = idx.score(&terms("rust"), 10, &|_| true).unwrap();
		assert_eq!(hits.len(), 1);
		// N=3, df=1, tf=2, |a|=3, avg=7/3; IDF ln(1 + (N - df + 0.5) / (df + 0.5))
		let idf = (1.0f32 + (3.0 - 1.0 + 0.5) / 1.5).ln();
		let norm = 1.2 * (1.0 - 0.75 + 0.75 * 3.0 / (7.0 / 3.0));
		let expected = idf * (2.0 * 2.2) / (2.0 + norm);
		assert!((hits[0].1 - expected).abs() < 1e-5, "{} vs {}", hits[0].1, expected);
	}

	#[test]
	fn ties_break_by_id_and_duplicates_count_once() {
		let idx = index(&[("b", "alpha"), ("a", "alpha"), ("c", "beta")]);
		let once = idx.score(&terms("alpha"), 10, &|_| true).unwrap();
		let twice = idx.score(&terms("alpha alpha"), 10, &|_| true).unwrap();
		assert_eq!(once, twice);
		assert_eq!(once.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
	}

	#[test]
	fn remove_and_reinsert_update_statistics() {
		let idx = index(&[("a", "alpha beta"), ("b", "gamma")]);
		assert!(idx.remove("a").unwrap());
		assert!(!idx.remove("a").unwrap());
		assert!(idx.score(&terms("alpha"), 5, &|_| true).unwrap().is_empty());
		idx.update("b", "alpha").unwrap();
		assert_eq!(idx.len(), 1);
		assert_eq!(idx.score(&terms("alpha"), 5, &|_| true).unwrap()[0].0, "b");
		assert!(idx.score(&terms("gamma"), 5, &|_| true).unwrap().is_empty());
	}

	#[test]
	fn writes_after_a_search_are_visible() {
		let idx = index(&[("a", "alpha beta"), ("b", "beta")]);
		assert_eq!(idx.score(&terms("beta"), 5, &|_| true).unwrap().len(), 2);
		idx.insert("c", "alpha gamma").unwrap();
		let ids: Vec<ChunkId> = idx.score(&terms("alpha"), 5, &|_| true).unwrap().into_iter().map(|(id, _)| id).collect();
		assert_eq!(ids.len(), 2);
		assert!(ids.contains(&"c".to_string()));
		assert!(idx.score(&terms("alpha"), 5, &|id| id != "c").unwrap().iter().all(|(id, _)| id == "a"));
	}

	#[test]
	fn offline_index_is_unavailable() {
		let idx = index(&[("a", "alpha")]);
		idx.set_online(false).unwrap();
		assert!(matches!(idx.score(&terms("alpha"), 5, &|_| true), Err(Error::IndexUnavailable { backend: SourceKind::Keyword, .. })));
		idx.set_online(true).unwrap();
		assert_eq!(idx.score(&terms("alpha"), 5, &|_| true).unwrap().len(), 1);
	}

	#[test]
	fn rejects_bad_params() {
		assert!(Bm25Index::new(Bm25Settings { k1: -1.0, b: 0.75 }).is_err());
	}
}
