//! In-memory [`ChunkStore`] written by ingestion and read by the retriever.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::traits::ChunkStore;
use crate::types::{Chunk, Meta};

#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<String, Arc<Chunk>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self { Self::default() }

    pub fn from_chunks<I: IntoIterator<Item = Chunk>>(chunks: I) -> Self {
        let store = Self::new();
        for c in chunks { store.insert(c); }
        store
    }

    /// Insert or replace a chunk.
    pub fn insert(&self, chunk: Chunk) {
        let mut guard = self.chunks.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(chunk.id.clone(), Arc::new(chunk));
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Chunk>> {
        self.chunks.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(id)
    }

    /// Replace the metadata of every chunk belonging to `doc_id`; returns how many changed.
    pub fn update_document_metadata(&self, doc_id: &str, metadata: &Meta) -> usize {
        let mut guard = self.chunks.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut changed = 0;
        for chunk in guard.values_mut().filter(|c| c.doc_id == doc_id) {
            let mut updated = (**chunk).clone();
            updated.metadata = metadata.clone();
            *chunk = Arc::new(updated);
            changed += 1;
        }
        changed
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn get(&self, id: &str) -> Option<Arc<Chunk>> {
        self.chunks.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned()
    }

    fn len(&self) -> usize { self.chunks.read().unwrap_or_else(std::sync::PoisonError::into_inner).len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    #[test]
    fn metadata_update_reaches_every_chunk() {
        let doc = Document { id: "d".into(), text: String::new(), metadata: Meta::new() };
        let store = InMemoryChunkStore::from_chunks([doc.chunk(0, 2, "a"), doc.chunk(1, 2, "b")]);
        let mut m = Meta::new();
        m.insert("visibility".into(), "public".into());
        assert_eq!(store.update_document_metadata("d", &m), 2);
        assert_eq!(store.get("d:1").and_then(|c| c.metadata.get("visibility").cloned()).as_deref(), Some("public"));
        assert!(store.remove("d:0").is_some());
        assert_eq!(store.len(), 1);
    }
}
