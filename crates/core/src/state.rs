//! Session state machine.
//!
//! `Idle -> Submitting -> Polling -> (Completed | Failed) -> Idle`.
//! Submission errors jump straight from `Submitting` to `Failed`. A run
//! that is cancelled or abandoned goes back to `Idle` without settling.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No job in flight.
    #[default]
    Idle,
    Submitting,
    Polling,
    Completed,
    Failed,
}

impl SessionState {
    /// States reachable from `self`.
    pub fn valid_transitions(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Idle => &[Submitting],
            // Submitting -> Idle is a run cancelled before polling started.
            Submitting => &[Polling, Failed, Idle],
            // Polling -> Idle is a cancelled watch.
            Polling => &[Completed, Failed, Idle],
            Completed | Failed => &[Idle],
        }
    }

    pub fn can_transition(self, to: SessionState) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn is_idle(self) -> bool {
        self == SessionState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Submitting => "submitting",
            SessionState::Polling => "polling",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
