//! Exact (brute force) implementation of [`AnnIndex`].
//!
//! Vectors are L2-normalized on insert so that search is a dot product. Entries
//! are kept in id order, which makes results reproducible for a fixed state.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hybridrag_core::error::{Error, Result};
use hybridrag_core::traits::AnnIndex;
use hybridrag_core::types::{compare_entries, ChunkId, SourceKind};

#[derive(Debug)]
struct State {
    online: bool,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
}

#[derive(Debug)]
pub struct FlatIndex {
    dim: usize,
    state: RwLock<State>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::config("vector dimension must be > 0"));
        }
        Ok(Self { dim, state: RwLock::new(State { online: true, vectors: BTreeMap::new() }) })
    }

    /// Take the index offline; searches fail with `IndexUnavailable` until restored.
    pub fn set_online(&self, online: bool) -> Result<()> {
        self.write()?.online = online;
        Ok(())
    }

    pub fn update(&self, id: ChunkId, vector: Vec<f32>) -> Result<()> { self.insert(id, vector) }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(Error::config(format!("expected vector of dimension {}, got {}", self.dim, v.len())));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        let guard = self.state.read().map_err(|_| Error::unavailable(SourceKind::Vector, "index lock poisoned"))?;
        if !guard.online {
            return Err(Error::unavailable(SourceKind::Vector, "index offline"));
        }
        Ok(guard)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| Error::unavailable(SourceKind::Vector, "index lock poisoned"))
    }
}

impl AnnIndex for FlatIndex {
    fn dim(&self) -> usize { self.dim }

    fn len(&self) -> usize { self.state.read().map(|s| s.vectors.len()).unwrap_or(0) }

    fn insert(&self, id: ChunkId, vector: Vec<f32>) -> Result<()> {
        self.check_dim(&vector)?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::config(format!("vector for '{id}' has non-finite components")));
        }
        self.write()?.vectors.insert(id, l2_normalized(vector));
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> { Ok(self.write()?.vectors.remove(id).is_some()) }

    fn search(&self, query: &[f32], k: usize, accept: &dyn Fn(&str) -> bool) -> Result<Vec<(ChunkId, f32)>> {
        self.check_dim(query)?;
        let state = self.read()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let q = l2_normalized(query.to_vec());
        let mut scored: Vec<(&str, f32)> = state
            .vectors
            .iter()
            .filter(|(id, _)| accept(id.as_str()))
            .map(|(id, v)| (id.as_str(), dot(&q, v)))
            .collect();
        scored.sort_by(|a, b| compare_entries(*a, *b));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(id, s)| (id.to_string(), s)).collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

pub(crate) fn l2_normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = dot(&v, &v).sqrt();
    if norm > f32::EPSILON {
        for x in &mut v { *x /= norm; }
    }
    v
}
