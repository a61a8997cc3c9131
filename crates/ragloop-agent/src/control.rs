use serde::Serialize;

use crate::graph::RagState;

/// Outcome of the faithfulness loop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopDecision {
    Terminate,
    /// Rewrite the queries and try again.
    Retry,
}

impl LoopDecision {
    pub const TERMINATE: &'static str = "terminate";
    pub const RETRY: &'static str = "retry";

    /// Route label used on the conditional edge.
    pub fn label(self) -> &'static str {
        match self {
            LoopDecision::Terminate => Self::TERMINATE,
            LoopDecision::Retry => Self::RETRY,
        }
    }
}

/// Decide whether the run ends after the faithfulness check.
///
/// A faithful answer, or no verdict at all, ends the run. An unfaithful
/// answer is retried until `step` reaches `max_steps`.
pub fn route_after_faithfulness(state: &RagState) -> LoopDecision {
    let faithful = state.faithfulness.as_ref().map_or(true, |f| f.faithful);
    if faithful {
        return LoopDecision::Terminate;
    }
    match state.max_steps {
        Some(max) if state.step >= max => LoopDecision::Terminate,
        _ => LoopDecision::Retry,
    }
}

/// [`route_after_faithfulness`] as a conditional-edge route function.
pub(crate) fn faithfulness_route(state: &RagState) -> &'static str {
    route_after_faithfulness(state).label()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_core::types::Faithfulness;

    fn state(faithful: Option<bool>, step: u32, max_steps: Option<u32>) -> RagState {
        RagState {
            faithfulness: faithful.map(|f| Faithfulness {
                faithful: f,
                issues: vec![],
                heuristics: Default::default(),
            }),
            step,
            max_steps,
            ..Default::default()
        }
    }

    #[test]
    fn test_faithful_terminates() {
        assert_eq!(
            route_after_faithfulness(&state(Some(true), 1, Some(3))),
            LoopDecision::Terminate
        );
    }

    #[test]
    fn test_missing_verdict_terminates() {
        assert_eq!(
            route_after_faithfulness(&state(None, 1, Some(3))),
            LoopDecision::Terminate
        );
    }

    #[test]
    fn test_unfaithful_retries_below_bound() {
        assert_eq!(
            route_after_faithfulness(&state(Some(false), 1, Some(3))),
            LoopDecision::Retry
        );
        assert_eq!(
            route_after_faithfulness(&state(Some(false), 5, None)),
            LoopDecision::Retry
        );
    }

    #[test]
    fn test_unfaithful_terminates_at_bound() {
        assert_eq!(
            route_after_faithfulness(&state(Some(false), 3, Some(3))),
            LoopDecision::Terminate
        );
        assert_eq!(
            route_after_faithfulness(&state(Some(false), 4, Some(3))),
            LoopDecision::Terminate
        );
    }

    #[test]
    fn test_route_labels() {
        assert_eq!(faithfulness_route(&state(Some(true), 1, None)), "terminate");
        assert_eq!(faithfulness_route(&state(Some(false), 0, Some(2))), "retry");
    }
}
