use serde::Serialize;
use tracing::{debug, warn};

/// Lifecycle of one retrieval request.
///
/// ```text
/// Idle → Dispatching → Awaiting → Fusing → Filtering → Done
///                         ↓          ↑
///                      Degraded ─────┘
/// any non-terminal state → Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalState {
    Idle,
    Dispatching,
    Awaiting,
    Degraded,
    Fusing,
    Filtering,
    Done,
    Failed,
}

impl RetrievalState {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Done | Self::Failed) }

    pub fn can_transition_to(self, next: Self) -> bool {
        use RetrievalState::*;
        match (self, next) {
            (Idle, Dispatching)
            | (Dispatching, Awaiting)
            | (Awaiting, Fusing)
            | (Awaiting, Degraded)
            | (Degraded, Fusing)
            | (Fusing, Filtering)
            | (Filtering, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Records the path a request took through [`RetrievalState`].
#[derive(Debug, Clone)]
pub(crate) struct StateTrace {
    states: Vec<RetrievalState>,
}

impl StateTrace {
    pub(crate) fn new() -> Self { Self { states: vec![RetrievalState::Idle] } }

    pub(crate) fn current(&self) -> RetrievalState { *self.states.last().unwrap_or(&RetrievalState::Idle) }

    /// Move to `next`; an illegal transition is refused and leaves the state unchanged.
    pub(crate) fn advance(&mut self, next: RetrievalState) -> bool {
        let from = self.current();
        if !from.can_transition_to(next) {
            warn!(?from, to = ?next, "refusing illegal retrieval state transition");
            return false;
        }
        debug!(?from, to = ?next, "retrieval state");
        self.states.push(next);
        true
    }

    pub(crate) fn into_states(self) -> Vec<RetrievalState> { self.states }
}

#[cfg(test)]
mod tests {
    use super::RetrievalState::*;
    use super::*;

    #[test]
    fn happy_and_degraded_paths_are_legal() {
        let mut t = StateTrace::new();
        for s in [Dispatching, Awaiting, Degraded, Fusing, Filtering, Done] {
            assert!(t.advance(s), "{s:?}");
        }
        assert_eq!(t.into_states().len(), 7);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        assert!(!Idle.can_transition_to(Fusing));
        assert!(!Filtering.can_transition_to(Degraded));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Idle));
        assert!(Awaiting.can_transition_to(Failed));

        let mut t = StateTrace::new();
        assert!(!t.advance(Done));
        assert_eq!(t.current(), Idle);
    }
}
