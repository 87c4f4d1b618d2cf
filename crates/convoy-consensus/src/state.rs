//! Request states, votes and wait outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a consensus request
///
/// `Pending -> (AutoApproved | QuorumApproved) -> Executing -> Completed`,
/// with `Rejected` and `Expired` reachable directly from `Pending`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    AutoApproved,
    QuorumApproved,
    Rejected,
    Executing,
    Completed,
    /// Never reached a decision before the engine's stale timeout
    Expired,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Expired)
    }

    pub fn is_approved(self) -> bool {
        matches!(self, Self::AutoApproved | Self::QuorumApproved)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Pending, AutoApproved)
                | (Pending, QuorumApproved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (AutoApproved, Executing)
                | (QuorumApproved, Executing)
                | (Executing, Completed)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::AutoApproved => "auto_approved",
            Self::QuorumApproved => "quorum_approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Expired => "expired",
        };
        write!(f, "{}", name)
    }
}

/// A single voter's decision
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Approve,
    Reject,
}

/// Result of a bounded wait on a request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The request reached this terminal state within the deadline
    Finished(RequestState),
    /// The deadline elapsed first
    TimedOut,
}
