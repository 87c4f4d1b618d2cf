//! Error types for convoy

use crate::types::{ClientId, RequestId, TemplateId};
use thiserror::Error;

/// Main error type for convoy
#[derive(Error, Debug)]
pub enum ConvoyError {
    // Discovery errors
    #[error("invalid seed {seed}: {reason}")]
    InvalidSeed { seed: String, reason: String },

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("http request to {peer} failed: {reason}")]
    Http { peer: String, reason: String },

    #[error("malformed metadata from {peer}: {reason}")]
    MalformedMeta { peer: String, reason: String },

    #[error("discovery service is no longer running")]
    DiscoveryGone,

    // Request validation errors
    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("request has no target clients")]
    NoTargets,

    #[error("not authorized: {0}")]
    Unauthorized(String),

    // Request lifecycle errors
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("{voter} already voted on request {request}")]
    AlreadyVoted { request: RequestId, voter: String },

    #[error("request {0} is no longer pending")]
    RequestClosed(RequestId),

    #[error("check not found: {0}")]
    CheckNotFound(String),

    #[error("check disabled: {0}")]
    CheckDisabled(String),

    // Execution errors
    #[error("client {client} failed to execute: {reason}")]
    Execution { client: ClientId, reason: String },

    #[error("timeout")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvoyError {
    /// Transient failures that the next discovery tick or a retry may resolve
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::PeerUnreachable(_) | Self::Http { .. } | Self::Timeout | Self::Io(_)
        )
    }

    /// Failures reported to a request submitter as a rejection
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound(_)
                | Self::NoTargets
                | Self::Unauthorized(_)
                | Self::CheckNotFound(_)
                | Self::CheckDisabled(_)
                | Self::Internal(_)
        )
    }
}

impl From<serde_json::Error> for ConvoyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for convoy
pub type Result<T> = std::result::Result<T, ConvoyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retriable() {
        assert!(ConvoyError::PeerUnreachable("a:1".into()).is_retriable());
        assert!(ConvoyError::Timeout.is_retriable());
        assert!(!ConvoyError::NoTargets.is_retriable());
    }

    #[test]
    fn test_validation_errors_are_rejections() {
        assert!(ConvoyError::NoTargets.is_rejection());
        assert!(ConvoyError::TemplateNotFound(TemplateId::new("x")).is_rejection());
        assert!(!ConvoyError::Timeout.is_rejection());
    }
}
