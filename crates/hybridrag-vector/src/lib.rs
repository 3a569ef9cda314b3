//! hybridrag-vector
//!
//! Semantic retrieval over an [`AnnIndex`](hybridrag_core::traits::AnnIndex):
//! an exact in-memory [`FlatIndex`] and the [`VectorSearcher`] search source.
pub mod ann;
pub mod search;

pub use ann::FlatIndex;
pub use search::VectorSearcher;
