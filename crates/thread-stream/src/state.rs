use crate::errors::RunFailure;
use crate::stream::ThreadUpdate;

/// Lifecycle of a single run.
///
/// `Idle -> Streaming -> {Done | Errored | Cancelled}`. Terminal states are
/// final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }

    /// Moves to `next` if the transition is allowed and reports whether it was.
    pub fn advance(&mut self, next: RunState) -> bool {
        let allowed = match (*self, next) {
            (Self::Idle, Self::Streaming) => true,
            (Self::Idle | Self::Streaming, n) => n.is_terminal(),
            _ => false,
        };
        if allowed {
            *self = next;
        }
        allowed
    }

    /// Applies the state change implied by an observed update.
    pub(crate) fn observe(&mut self, update: &ThreadUpdate) {
        let next = match update {
            ThreadUpdate::Done { .. } => RunState::Done,
            ThreadUpdate::Error {
                error: RunFailure::Cancelled,
            } => RunState::Cancelled,
            ThreadUpdate::Error { .. } => RunState::Errored,
            _ => RunState::Streaming,
        };
        if *self != next {
            self.advance(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_transitions() {
        let mut state = RunState::Idle;
        assert!(state.advance(RunState::Streaming));
        assert!(state.advance(RunState::Done));
        assert!(!state.advance(RunState::Streaming));
        assert!(!state.advance(RunState::Errored));
        assert_eq!(state, RunState::Done);
    }

    #[test]
    fn idle_can_fail_before_streaming() {
        let mut state = RunState::Idle;
        assert!(state.advance(RunState::Errored));
        assert!(state.is_terminal());
    }

    #[test]
    fn streaming_cannot_return_to_idle() {
        let mut state = RunState::Streaming;
        assert!(!state.advance(RunState::Idle));
        assert_eq!(state, RunState::Streaming);
    }

    #[test]
    fn observe_maps_updates_to_states() {
        let mut state = RunState::Idle;
        state.observe(&ThreadUpdate::ContentDelta { text: "a".into() });
        assert_eq!(state, RunState::Streaming);
        state.observe(&ThreadUpdate::Error {
            error: RunFailure::Cancelled,
        });
        assert_eq!(state, RunState::Cancelled);
        state.observe(&ThreadUpdate::Done {
            finish_reason: None,
            usage: None,
        });
        assert_eq!(state, RunState::Cancelled);
    }
}
