//! Run lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome or lifecycle stage of a run.
///
/// The discriminants are persisted in the build history, so their values
/// must not change. Ordering encodes severity: a smaller state is worse,
/// which is what makes worst-wins accumulation a `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Unknown = 0,
    Queued = 1,
    Running = 2,
    Aborted = 3,
    Failed = 4,
    Success = 5,
}

impl RunState {
    /// Combine two states, keeping the worse one. An aborted run stays
    /// aborted even if a later script fails or succeeds.
    pub fn worst(self, other: RunState) -> RunState {
        self.min(other)
    }
}

impl From<i32> for RunState {
    fn from(value: i32) -> Self {
        match value {
            1 => RunState::Queued,
            2 => RunState::Running,
            3 => RunState::Aborted,
            4 => RunState::Failed,
            5 => RunState::Success,
            _ => RunState::Unknown,
        }
    }
}

impl From<RunState> for i32 {
    fn from(value: RunState) -> Self {
        value as i32
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Unknown => write!(f, "unknown"),
            RunState::Queued => write!(f, "queued"),
            RunState::Running => write!(f, "running"),
            RunState::Aborted => write!(f, "aborted"),
            RunState::Failed => write!(f, "failed"),
            RunState::Success => write!(f, "success"),
        }
    }
}
