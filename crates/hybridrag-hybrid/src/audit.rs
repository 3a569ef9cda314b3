//! One audit event per retrieval request, delivered fire-and-forget.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hybridrag_core::error::Error;
use hybridrag_core::types::ChunkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Ok,
    Degraded,
    InvalidRequest,
    Unavailable,
    Cancelled,
}

impl AuditOutcome {
    /// Classify a failure without carrying its message.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::InvalidConfiguration(_) | Error::FilterEvaluation(_) | Error::NotFound(_) => Self::InvalidRequest,
            Error::IndexUnavailable { .. } | Error::RetrievalUnavailable { .. } => Self::Unavailable,
            Error::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// blake3 of the query text; the text itself is never recorded.
    pub query_hash: String,
    pub principal_id: String,
    pub chunk_ids: Vec<ChunkId>,
    pub degraded: bool,
    pub latency_ms: u64,
    pub outcome: AuditOutcome,
}

pub fn query_hash(query: &str) -> String { blake3::hash(query.as_bytes()).to_hex().to_string() }

/// Receives audit events. Must not block and must not fail the request.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events as structured `info` records on the `hybridrag::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "hybridrag::audit",
            timestamp = %event.timestamp.to_rfc3339(),
            query_hash = %event.query_hash,
            principal = %event.principal_id,
            results = event.chunk_ids.len(),
            chunk_ids = ?event.chunk_ids,
            degraded = event.degraded,
            latency_ms = event.latency_ms,
            outcome = ?event.outcome,
            "retrieval"
        );
    }
}

/// Forwards events to a bounded channel drained by an external collector.
/// Events are dropped with a warning when the buffer is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "buffer full",
                mpsc::error::TrySendError::Closed(_) => "collector closed",
            };
            warn!(reason, "audit event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: AuditOutcome) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            query_hash: query_hash("fire"),
            principal_id: "u1".into(),
            chunk_ids: vec!["a:0".into()],
            degraded: false,
            latency_ms: 3,
            outcome,
        }
    }

    #[test]
    fn hash_is_stable_and_hides_query() {
        assert_eq!(query_hash("fire"), query_hash("fire"));
        assert_ne!(query_hash("fire"), query_hash("water"));
        assert_eq!(query_hash("fire").len(), 64);
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelAuditSink::new(1);
        sink.record(event(AuditOutcome::Ok));
        sink.record(event(AuditOutcome::Degraded));
        assert_eq!(rx.try_recv().unwrap().outcome, AuditOutcome::Ok);
        assert!(rx.try_recv().is_err());
        drop(rx);
        sink.record(event(AuditOutcome::Ok));
    }

    #[test]
    fn outcome_ignores_error_text() {
        assert_eq!(AuditOutcome::from_error(&Error::Cancelled), AuditOutcome::Cancelled);
        assert_eq!(AuditOutcome::from_error(&Error::config("secret detail")), AuditOutcome::InvalidRequest);
        let json = serde_json::to_string(&event(AuditOutcome::Unavailable)).unwrap();
        assert!(json.contains("\"outcome\":\"unavailable\""));
    }
}
