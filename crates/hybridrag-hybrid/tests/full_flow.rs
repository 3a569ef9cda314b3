use std::sync::Arc;

use hybridrag_core::config::{Bm25Settings, RetrievalSettings};
use hybridrag_core::store::InMemoryChunkStore;
use hybridrag_core::traits::{AnnIndex, Embedder, RankedSearchSource};
use hybridrag_core::types::{Document, Meta, Principal, SourceKind};
use hybridrag_embed::HashingEmbedder;
use hybridrag_hybrid::eval::RetrievalMetrics;
use hybridrag_hybrid::{HybridRetriever, SearchRequest};
use hybridrag_text::{Bm25Index, Bm25Scorer};
use hybridrag_vector::{FlatIndex, VectorSearcher};

const DIM: usize = 128;

fn doc(id: &str, text: &str, meta: &[(&str, &str)]) -> Document {
    let metadata: Meta = meta.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Document { id: id.to_string(), text: text.to_string(), metadata }
}

fn build() -> (HybridRetriever, HashingEmbedder) {
    let docs = [
        doc("fire", "start a campfire with flint and steel", &[("visibility", "public")]),
        doc("water", "purify water by boiling it over the campfire", &[("department", "ops")]),
        doc("shelter", "build a lean-to shelter from branches", &[("visibility", "public")]),
        doc("cache", "location of the campfire supply cache", &[("classification_level", "4")]),
    ];
    let embedder = HashingEmbedder::new(DIM).expect("embedder");
    let text = Arc::new(Bm25Index::new(Bm25Settings::default()).expect("bm25"));
    let ann = Arc::new(FlatIndex::new(DIM).expect("ann"));
    let store = Arc::new(InMemoryChunkStore::new());
    let chunks: Vec<_> = docs.iter().map(|d| d.chunk(0, 1, d.text.clone())).collect();
    let vectors = embedder.embed_batch(&chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>()).expect("embed");
    for (chunk, vector) in chunks.into_iter().zip(vectors) {
        text.insert(chunk.id.clone(), &chunk.text).expect("bm25 insert");
        ann.insert(chunk.id.clone(), vector).expect("ann insert");
        store.insert(chunk);
    }
    let sources: Vec<Arc<dyn RankedSearchSource>> =
        vec![Arc::new(Bm25Scorer::new(text, store.clone())), Arc::new(VectorSearcher::new(ann, store.clone()))];
    let mut settings = RetrievalSettings::default();
    settings.vector_dim = DIM;
    (HybridRetriever::new(sources, store, settings).expect("retriever"), embedder)
}

#[tokio::test]
async fn hybrid_search_end_to_end() {
    let (retriever, embedder) = build();
    let query = "campfire flint";
    let request = SearchRequest::new(query, Principal::new("hiker")).with_vector(embedder.embed_query(query).expect("embed")).with_top_k(5);
    let resp = retriever.search(request).await.expect("search");
    assert!(!resp.is_degraded());
    let ids: Vec<&str> = resp.hits.iter().map(|h| h.result.chunk_id.as_str()).collect();
    assert_eq!(ids[0], "fire:0");
    assert!(!ids.contains(&"water:0") && !ids.contains(&"cache:0"), "{ids:?}");
    assert!(resp.hits[0].result.provenance.contains(&SourceKind::Keyword));
    assert!(resp.hits[0].result.provenance.contains(&SourceKind::Vector));

    let relevant = ["fire:0".to_string()].into_iter().collect();
    assert!((RetrievalMetrics::evaluate(&ids, &relevant).mrr - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn clearance_and_department_widen_results() {
    let (retriever, _) = build();
    let ranger = Principal::new("ranger").with_department("ops").with_clearance(4);
    let resp = retriever.search(SearchRequest::new("campfire", ranger).with_top_k(10)).await.expect("search");
    let mut ids: Vec<&str> = resp.hits.iter().map(|h| h.result.chunk_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["cache:0", "fire:0", "water:0"]);
}

#[tokio::test]
async fn empty_query_is_empty_not_an_error() {
    let (retriever, _) = build();
    let resp = retriever.search(SearchRequest::new("", Principal::new("hiker"))).await.expect("search");
    assert!(resp.hits.is_empty());
    assert!(!resp.is_degraded());
    let zero = retriever.search(SearchRequest::new("the a", Principal::new("hiker")).with_vector(vec![0.0; DIM])).await.expect("search");
    assert!(zero.hits.is_empty());
}
