use thiserror::Error;

use crate::types::SourceKind;

/// Pipeline stage reported when a request fails as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Dispatch,
    Await,
    Fusion,
    Filter,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Validation => "validation",
            Stage::Dispatch => "dispatch",
            Stage::Await => "await",
            Stage::Fusion => "fusion",
            Stage::Filter => "filter",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A single backend could not serve the request. `reason` is for logs only.
    #[error("{backend} index unavailable")]
    IndexUnavailable { backend: SourceKind, reason: String },

    #[error("retrieval unavailable: no source produced results (stage: {stage})")]
    RetrievalUnavailable { stage: Stage },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Filter evaluation failed: {0}")]
    FilterEvaluation(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn unavailable(backend: SourceKind, reason: impl Into<String>) -> Self {
        Self::IndexUnavailable { backend, reason: reason.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self { Self::InvalidConfiguration(msg.into()) }
}

pub type Result<T> = std::result::Result<T, Error>;
