//! Peer reachability classification

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Reachability of a peer as seen from this node
///
/// Reporting only: a peer is never evicted because of its status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Never answered a probe
    Unknown,
    /// Answered recently
    Reachable,
    /// Missed probes for longer than the suspicion timeout
    Suspect,
    /// Missed probes for longer than the failure timeout
    Unreachable,
}

/// Failure detector based on the last successful probe
pub struct FailureDetector {
    /// Silence before a peer is suspect
    suspicion_timeout: Duration,

    /// Silence before a peer is considered unreachable
    failure_timeout: Duration,
}

impl FailureDetector {
    pub fn new(suspicion_timeout: Duration, failure_timeout: Duration) -> Self {
        Self {
            suspicion_timeout,
            failure_timeout,
        }
    }

    /// Check if a peer should be marked as suspect
    pub fn is_suspect(&self, last_seen: Instant) -> bool {
        last_seen.elapsed() > self.suspicion_timeout
    }

    /// Check if a peer should be marked as unreachable
    pub fn is_failed(&self, last_seen: Instant) -> bool {
        last_seen.elapsed() > self.failure_timeout
    }

    pub fn classify(&self, last_seen: Option<Instant>) -> PeerStatus {
        match last_seen {
            None => PeerStatus::Unknown,
            Some(seen) if self.is_failed(seen) => PeerStatus::Unreachable,
            Some(seen) if self.is_suspect(seen) => PeerStatus::Suspect,
            Some(_) => PeerStatus::Reachable,
        }
    }
}
