//! Orchestration of one hybrid retrieval request.
//!
//! Every [`RankedSearchSource`] runs as its own task under the access
//! pre-filter. The join point waits for all of them or the request deadline,
//! whichever comes first. Sources that fail or miss the deadline are reported
//! in [`Degradation`] and the request continues with what arrived. Fused
//! results are checked again against the current chunk metadata before they
//! are returned. An optional [`Reranker`] then reorders the survivors before
//! the list is cut to `top_k`.

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use hybridrag_core::access::{AccessFilter, Predicate};
use hybridrag_core::config::RetrievalSettings;
use hybridrag_core::error::{Error, Result, Stage};
use hybridrag_core::traits::{ChunkStore, RankedSearchSource, SearchQuery};
use hybridrag_core::types::{Hit, Principal, RankedList, SourceKind};

use crate::audit::{query_hash, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::fusion::{FusionEngine, FusionStrategy};
use crate::rerank::{self, Reranker};
use crate::state::{RetrievalState, StateTrace};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Precomputed query embedding; `None` skips semantic matching.
    pub query_vector: Option<Vec<f32>>,
    pub principal: Principal,
    /// Falls back to the configured `top_k`.
    pub top_k: Option<usize>,
    /// Falls back to the configured `over_fetch_factor`.
    pub over_fetch_factor: Option<usize>,
    /// Metadata equality filters ANDed with the access predicate.
    pub filters: HashMap<String, String>,
    pub cancel: Option<CancellationToken>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, principal: Principal) -> Self {
        Self { query: query.into(), query_vector: None, principal, top_k: None, over_fetch_factor: None, filters: HashMap::new(), cancel: None }
    }

    #[must_use]
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self { self.query_vector = Some(vector); self }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self { self.top_k = Some(top_k); self }

    #[must_use]
    pub fn with_over_fetch(mut self, factor: usize) -> Self { self.over_fetch_factor = Some(factor); self }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self { self.cancel = Some(token); self }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unavailable,
    TimedOut,
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub kind: SourceKind,
    pub reason: FailureReason,
}

/// Sources that did not contribute to a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub failed: Vec<SourceFailure>,
}

impl Degradation {
    pub fn failed_sources(&self) -> impl Iterator<Item = SourceKind> + '_ { self.failed.iter().map(|f| f.kind) }
}

#[derive(Debug, Clone)]
pub struct RetrievalResponse {
    pub hits: Vec<Hit>,
    pub degraded: Option<Degradation>,
    pub states: Vec<RetrievalState>,
    pub latency: Duration,
}

impl RetrievalResponse {
    pub fn is_degraded(&self) -> bool { self.degraded.is_some() }
}

struct Outcome {
    hits: Vec<Hit>,
    degraded: Option<Degradation>,
}

pub struct HybridRetriever {
    sources: Vec<Arc<dyn RankedSearchSource>>,
    store: Arc<dyn ChunkStore>,
    access: AccessFilter,
    fusion: FusionEngine,
    strategy: FusionStrategy,
    settings: RetrievalSettings,
    audit: Arc<dyn AuditSink>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    /// Fails fast on invalid settings, an empty source list, two sources of
    /// the same kind or fusion weights that leave a registered source out.
    pub fn new(sources: Vec<Arc<dyn RankedSearchSource>>, store: Arc<dyn ChunkStore>, settings: RetrievalSettings) -> Result<Self> {
        settings.validate()?;
        let strategy = FusionStrategy::from_settings(&settings.fusion)?;
        if sources.is_empty() {
            return Err(Error::config("at least one search source is required"));
        }
        let mut kinds = BTreeSet::new();
        if let Some(dup) = sources.iter().find(|s| !kinds.insert(s.kind())) {
            return Err(Error::config(format!("{} source registered twice", dup.kind())));
        }
        strategy.check_covers(kinds)?;
        Ok(Self {
            sources,
            store,
            access: AccessFilter::new(),
            fusion: FusionEngine::new(),
            strategy,
            settings,
            audit: Arc::new(TracingAuditSink),
            reranker: None,
        })
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self { self.audit = sink; self }

    /// Replace the configured fusion strategy; rejected like in [`Self::new`]
    /// when its weights leave a registered source out.
    pub fn with_strategy(mut self, strategy: FusionStrategy) -> Result<Self> {
        strategy.validate()?;
        strategy.check_covers(self.sources.iter().map(|s| s.kind()))?;
        self.strategy = strategy;
        Ok(self)
    }

    /// Rerank every post-filtered candidate (up to `top_k * over_fetch_factor`)
    /// before the response is cut to `top_k`.
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self { self.reranker = Some(reranker); self }

    pub fn strategy(&self) -> &FusionStrategy { &self.strategy }
    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    #[instrument(skip_all, fields(principal = %request.principal.id))]
    pub async fn search(&self, request: SearchRequest) -> Result<RetrievalResponse> {
        let started = Instant::now();
        let mut trace = StateTrace::new();
        let result = self.run(&request, &mut trace).await;
        let latency = started.elapsed();
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let (chunk_ids, degraded, outcome) = match &result {
            Ok(o) => (
                o.hits.iter().map(|h| h.result.chunk_id.clone()).collect(),
                o.degraded.is_some(),
                if o.degraded.is_some() { AuditOutcome::Degraded } else { AuditOutcome::Ok },
            ),
            Err(e) => {
                trace.advance(RetrievalState::Failed);
                (Vec::new(), false, AuditOutcome::from_error(e))
            }
        };
        self.audit.record(AuditEvent {
            timestamp: chrono::Utc::now(),
            query_hash: query_hash(&request.query),
            principal_id: request.principal.id.clone(),
            chunk_ids,
            degraded,
            latency_ms,
            outcome,
        });

        let Outcome { hits, degraded } = result?;
        info!(hits = hits.len(), degraded = degraded.is_some(), latency_ms, "retrieval done");
        Ok(RetrievalResponse { hits, degraded, states: trace.into_states(), latency })
    }

    fn validate(&self, request: &SearchRequest) -> Result<(usize, usize)> {
        let top_k = request.top_k.unwrap_or(self.settings.top_k);
        let over_fetch = request.over_fetch_factor.unwrap_or(self.settings.over_fetch_factor);
        if top_k == 0 {
            return Err(Error::config("top_k must be > 0"));
        }
        if over_fetch == 0 {
            return Err(Error::config("over_fetch_factor must be >= 1"));
        }
        if let Some(v) = &request.query_vector {
            let dim = self.settings.vector_dim;
            if dim != 0 && v.len() != dim {
                return Err(Error::config(format!("query vector has dimension {}, expected {dim}", v.len())));
            }
        }
        Ok((top_k, top_k.saturating_mul(over_fetch)))
    }

    async fn run(&self, request: &SearchRequest, trace: &mut StateTrace) -> Result<Outcome> {
        let (top_k, fetch_k) = self.validate(request)?;
        let cancel = request.cancel.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let extra = Predicate::all_eq(&request.filters);

        trace.advance(RetrievalState::Dispatching);
        let pre = self.access.pre_filter_predicate(&request.principal).and(extra.clone());
        let query = Arc::new(SearchQuery::new(request.query.clone(), request.query_vector.clone()));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<SourceKind> = BTreeSet::new();
        for source in &self.sources {
            let (source, query, filter) = (Arc::clone(source), Arc::clone(&query), pre.clone());
            let kind = source.kind();
            pending.insert(kind);
            tasks.spawn(async move {
                let result = AssertUnwindSafe(source.search(&query, fetch_k, &filter)).catch_unwind().await;
                (kind, result)
            });
        }
        debug!(sources = pending.len(), fetch_k, "dispatched");

        trace.advance(RetrievalState::Awaiting);
        let (lists, failures) = self.await_sources(&mut tasks, pending, &cancel).await?;
        if lists.is_empty() {
            warn!(failed = ?failures, "no search source produced results");
            return Err(Error::RetrievalUnavailable { stage: Stage::Await });
        }
        let degraded = if failures.is_empty() {
            None
        } else {
            warn!(failed = ?failures, "continuing in degraded mode");
            trace.advance(RetrievalState::Degraded);
            Some(Degradation { failed: failures })
        };

        trace.advance(RetrievalState::Fusing);
        let fused = self.fusion.fuse(&lists, &self.strategy, fetch_k)?;

        trace.advance(RetrievalState::Filtering);
        let post = self.access.post_filter_predicate(&request.principal).and(extra);
        let keep = if self.reranker.is_some() { fused.len() } else { top_k };
        let mut hits: Vec<Hit> = Vec::with_capacity(keep.min(fused.len()));
        for result in fused {
            if hits.len() == keep {
                break;
            }
            let Some(chunk) = self.store.get(&result.chunk_id) else {
                debug!(chunk = %result.chunk_id, "dropping chunk missing from store");
                continue;
            };
            if !post.matches(&chunk.metadata) {
                debug!(chunk = %result.chunk_id, "post-filter removed chunk");
                continue;
            }
            hits.push(Hit { result, chunk });
        }
        if let Some(reranker) = &self.reranker {
            hits = Self::rerank(reranker.as_ref(), &request.query, hits, top_k);
        }
        hits.truncate(top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.result.rank = i + 1;
        }
        trace.advance(RetrievalState::Done);
        Ok(Outcome { hits, degraded })
    }

    /// Reranking is best effort: without query text, or when the reranker
    /// fails, the post-filtered fusion order is kept.
    fn rerank(reranker: &dyn Reranker, query: &str, hits: Vec<Hit>, top_k: usize) -> Vec<Hit> {
        if query.trim().is_empty() {
            return hits;
        }
        let candidates = hits.clone();
        match rerank::apply(reranker, query, hits, top_k) {
            Ok(reranked) => {
                debug!(candidates = candidates.len(), kept = reranked.len(), "reranked");
                reranked
            }
            Err(e) => {
                warn!(error = %e, "reranker failed; keeping fusion order");
                candidates
            }
        }
    }

    /// Collect source results until every task has finished, the deadline
    /// passes or the request is cancelled. Dropping `tasks` aborts the rest.
    async fn await_sources(
        &self,
        tasks: &mut JoinSet<(SourceKind, std::thread::Result<Result<RankedList>>)>,
        mut pending: BTreeSet<SourceKind>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RankedList>, Vec<SourceFailure>)> {
        let deadline = tokio::time::sleep(self.settings.timeout());
        tokio::pin!(deadline);
        let mut lists = Vec::new();
        let mut failures = Vec::new();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    debug!("request cancelled while awaiting sources");
                    return Err(Error::Cancelled);
                }
                () = &mut deadline => {
                    tasks.abort_all();
                    timed_out = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((kind, Ok(Ok(list))))) => {
                        pending.remove(&kind);
                        debug!(%kind, hits = list.len(), "source finished");
                        lists.push(list);
                    }
                    Some(Ok((kind, Ok(Err(e))))) => {
                        pending.remove(&kind);
                        if let Error::InvalidConfiguration(_) = e {
                            tasks.abort_all();
                            return Err(e);
                        }
                        warn!(%kind, error = %e, "search source failed");
                        failures.push(SourceFailure { kind, reason: FailureReason::Unavailable });
                    }
                    Some(Ok((kind, Err(_)))) => {
                        pending.remove(&kind);
                        warn!(%kind, "search source panicked");
                        failures.push(SourceFailure { kind, reason: FailureReason::Panicked });
                    }
                    Some(Err(e)) => warn!(error = %e, "search task did not complete"),
                },
            }
        }
        let reason = if timed_out { FailureReason::TimedOut } else { FailureReason::Unavailable };
        failures.extend(pending.into_iter().map(|kind| SourceFailure { kind, reason }));
        failures.sort_by_key(|f| f.kind);
        Ok((lists, failures))
    }
}
