#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod access;
pub mod config;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use access::{AccessDecision, AccessFilter, AccessRule, Predicate};
pub use error::{Error, Result};
pub use store::InMemoryChunkStore;
pub use traits::{AnnIndex, ChunkStore, Embedder, RankedSearchSource, SearchQuery};
pub use types::{Chunk, ChunkId, ClearanceLevel, Document, Hit, Meta, Principal, RankedList, SearchResult, SourceKind};
