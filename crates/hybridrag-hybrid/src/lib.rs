//! hybridrag-hybrid
//!
//! Fusion of ranked lists and the [`HybridRetriever`] that fans a request out
//! to every search source, fuses what comes back, enforces access control on
//! the result and optionally reranks it.
pub mod audit;
pub mod eval;
pub mod fusion;
pub mod rerank;
pub mod retriever;
pub mod state;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, ChannelAuditSink, TracingAuditSink};
pub use fusion::{FusionEngine, FusionStrategy};
pub use rerank::{RerankScore, Reranker};
pub use retriever::{Degradation, FailureReason, HybridRetriever, RetrievalResponse, SearchRequest, SourceFailure};
pub use state::RetrievalState;
