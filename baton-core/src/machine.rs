//! The agent state machine.
//!
//! Transitions are pure functions of (current state, signal); the runtime
//! rejects anything this module does not accept. Terminal states accept no
//! signal at all.
//!
//! # State Transition Diagram
//!
//! ```text
//! idle ── start ──> running ──┬── pause ───────> paused ──── resume ──┐
//!                             ├── await-input ─> awaiting-input ── resume ──┤
//!                             ├── complete ────> completed (terminal)       │
//!                             └── fail ────────> failed (terminal)          │
//!                  running <────────────────────────────────────────────────┘
//!
//! any non-terminal ── abort ──> failed (terminal)
//! ```

use crate::{AgentSignal, AgentState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transition rejected by the state machine.
///
/// This is always an internal bug in the caller: the runtime persists the
/// full diagnostic and fails terminally (`state-violation` in the error
/// taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateViolation {
    pub from: AgentState,
    pub signal: AgentSignal,
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State machine rejects signal '{}' in state '{}'",
            self.signal, self.from
        )
    }
}

impl std::error::Error for StateViolation {}

impl AgentState {
    /// Apply a signal, returning the next state or a violation.
    ///
    /// Pure and total: every (state, signal) pair is either an accepted
    /// transition or an explicit rejection.
    pub fn apply(self, signal: AgentSignal) -> Result<AgentState, StateViolation> {
        use AgentSignal::*;
        use AgentState::*;

        // Abort is legal from every non-terminal state.
        if signal == Abort {
            return if self.is_terminal() {
                Err(StateViolation { from: self, signal })
            } else {
                Ok(Failed)
            };
        }

        match (self, signal) {
            (Idle, Start) => Ok(Running),
            (Running, Pause) => Ok(Paused),
            (Running, AwaitInput) => Ok(AwaitingInput),
            (Running, Complete) => Ok(Completed),
            (Running, Fail) => Ok(Failed),
            (Paused, Resume) => Ok(Running),
            (AwaitingInput, Resume) => Ok(Running),
            (from, signal) => Err(StateViolation { from, signal }),
        }
    }

    /// All signals this state accepts.
    pub fn accepted_signals(self) -> Vec<AgentSignal> {
        use AgentSignal::*;
        [Start, Pause, Resume, AwaitInput, Complete, Fail, Abort]
            .into_iter()
            .filter(|signal| self.apply(*signal).is_ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentSignal::*;
    use AgentState::*;

    const ALL_STATES: [AgentState; 6] =
        [Idle, Running, Paused, AwaitingInput, Completed, Failed];
    const ALL_SIGNALS: [AgentSignal; 7] =
        [Start, Pause, Resume, AwaitInput, Complete, Fail, Abort];

    #[test]
    fn test_happy_path() {
        let state = Idle.apply(Start).unwrap();
        assert_eq!(state, Running);
        let state = state.apply(Pause).unwrap();
        assert_eq!(state, Paused);
        let state = state.apply(Resume).unwrap();
        assert_eq!(state, Running);
        let state = state.apply(Complete).unwrap();
        assert_eq!(state, Completed);
    }

    #[test]
    fn test_await_input_roundtrip() {
        let state = Idle.apply(Start).unwrap().apply(AwaitInput).unwrap();
        assert_eq!(state, AwaitingInput);
        assert_eq!(state.apply(Resume).unwrap(), Running);
    }

    #[test]
    fn test_abort_from_every_non_terminal() {
        for state in [Idle, Running, Paused, AwaitingInput] {
            assert_eq!(state.apply(Abort).unwrap(), Failed);
        }
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in [Completed, Failed] {
            for signal in ALL_SIGNALS {
                assert!(
                    state.apply(signal).is_err(),
                    "{state} should reject {signal}"
                );
            }
        }
    }

    #[test]
    fn test_undefined_transitions_rejected() {
        assert!(Idle.apply(Complete).is_err());
        assert!(Idle.apply(Pause).is_err());
        assert!(Idle.apply(Resume).is_err());
        assert!(Running.apply(Start).is_err());
        assert!(Paused.apply(Complete).is_err());
        assert!(Paused.apply(Fail).is_err());
        assert!(AwaitingInput.apply(Complete).is_err());
    }

    #[test]
    fn test_machine_is_total() {
        // Every pair either transitions or is rejected; no panics.
        for state in ALL_STATES {
            for signal in ALL_SIGNALS {
                let _ = state.apply(signal);
            }
        }
    }

    #[test]
    fn test_accepted_signals() {
        assert_eq!(Idle.accepted_signals(), vec![Start, Abort]);
        assert_eq!(
            Running.accepted_signals(),
            vec![Pause, AwaitInput, Complete, Fail, Abort]
        );
        assert!(Completed.accepted_signals().is_empty());
    }
}
