//! hybridrag-text
//!
//! Keyword retrieval: a tantivy-backed analyzer, an in-memory BM25 index
//! scored with the `bm25` crate and the [`Bm25Scorer`] search source.
pub mod analyzer;
pub mod index;
pub mod search;

pub use analyzer::Analyzer;
pub use index::Bm25Index;
pub use search::Bm25Scorer;
