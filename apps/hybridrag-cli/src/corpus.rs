//! Loading a JSON corpus from disk and indexing it into both backends.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use hybridrag_core::config::RetrievalSettings;
use hybridrag_core::store::InMemoryChunkStore;
use hybridrag_core::traits::{AnnIndex, ChunkStore, Embedder, RankedSearchSource};
use hybridrag_core::types::{Chunk, Document};
use hybridrag_hybrid::HybridRetriever;
use hybridrag_text::{Bm25Index, Bm25Scorer};
use hybridrag_vector::{FlatIndex, VectorSearcher};

/// A document as stored on disk. `chunks` is optional pre-split text; without
/// it the whole document becomes a single chunk.
#[derive(Debug, Deserialize)]
pub struct CorpusDoc {
    #[serde(flatten)]
    pub document: Document,
    #[serde(default)]
    pub chunks: Vec<String>,
}

impl CorpusDoc {
    pub fn into_chunks(self) -> Vec<Chunk> {
        let Self { document, chunks } = self;
        if chunks.is_empty() {
            return vec![document.chunk(0, 1, document.text.clone())];
        }
        let total = chunks.len();
        chunks.into_iter().enumerate().map(|(i, text)| document.chunk(i, total, text)).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Many(Vec<CorpusDoc>),
    One(Box<CorpusDoc>),
}

/// Read every `*.json` file under `dir`. Each file holds one document or an array of them.
pub fn load_documents(dir: &Path) -> Result<Vec<CorpusDoc>> {
    if !dir.is_dir() {
        anyhow::bail!("corpus directory not found: {}", dir.display());
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(std::result::Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str::<CorpusFile>(&raw) {
            Ok(CorpusFile::Many(many)) => docs.extend(many),
            Ok(CorpusFile::One(one)) => docs.push(*one),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping file that is not a corpus document"),
        }
    }
    info!(documents = docs.len(), dir = %dir.display(), "corpus loaded");
    Ok(docs)
}

pub struct IndexedCorpus {
    pub store: Arc<InMemoryChunkStore>,
    pub retriever: HybridRetriever,
}

/// Chunk, embed and index `docs` into a BM25 index and a flat vector index.
pub fn index_documents(docs: Vec<CorpusDoc>, embedder: &dyn Embedder, mut settings: RetrievalSettings) -> Result<IndexedCorpus> {
    settings.vector_dim = embedder.dim();
    let text = Arc::new(Bm25Index::new(settings.bm25.clone())?);
    let ann = Arc::new(FlatIndex::new(embedder.dim())?);
    let store = Arc::new(InMemoryChunkStore::new());

    let chunks: Vec<Chunk> = docs.into_iter().flat_map(CorpusDoc::into_chunks).collect();
    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
            .context("progress template")?
            .progress_chars("#>-"),
    );
    for batch in chunks.chunks(64) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        for (chunk, vector) in batch.iter().zip(vectors) {
            text.insert(chunk.id.clone(), &chunk.text)?;
            ann.insert(chunk.id.clone(), vector)?;
            store.insert(chunk.clone());
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("indexed");
    debug!(chunks = store.len(), "indexes built");

    let sources: Vec<Arc<dyn RankedSearchSource>> =
        vec![Arc::new(Bm25Scorer::new(text, store.clone())), Arc::new(VectorSearcher::new(ann, store.clone()))];
    let retriever = HybridRetriever::new(sources, store.clone(), settings)?;
    Ok(IndexedCorpus { store, retriever })
}
