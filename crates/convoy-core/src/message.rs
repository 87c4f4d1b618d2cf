//! Control-plane message envelope exchanged between nodes and clients

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of control-plane message
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Initial discovery ping
    DiscoveryPing,
    /// Answer to a discovery ping
    DiscoveryResponse,
    /// Metadata beyond initial discovery
    DiscoveryMeta,
    /// Configuration pushed across the cluster
    Configuration,
    /// New task submission
    TaskRequest,
    /// Approval vote on a task
    TaskApproval,
    /// Rejection vote on a task
    TaskReject,
    /// Approved task sent to a client for execution
    TaskExecution,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        Self::DiscoveryPing,
        Self::DiscoveryResponse,
        Self::DiscoveryMeta,
        Self::Configuration,
        Self::TaskRequest,
        Self::TaskApproval,
        Self::TaskReject,
        Self::TaskExecution,
    ];

    /// Stable numeric code, starting at 1
    pub fn code(self) -> u8 {
        match self {
            Self::DiscoveryPing => 1,
            Self::DiscoveryResponse => 2,
            Self::DiscoveryMeta => 3,
            Self::Configuration => 4,
            Self::TaskRequest => 5,
            Self::TaskApproval => 6,
            Self::TaskReject => 7,
            Self::TaskExecution => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn is_discovery(self) -> bool {
        matches!(
            self,
            Self::DiscoveryPing | Self::DiscoveryResponse | Self::DiscoveryMeta
        )
    }

    pub fn is_task(self) -> bool {
        matches!(
            self,
            Self::TaskRequest | Self::TaskApproval | Self::TaskReject | Self::TaskExecution
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DiscoveryPing => "discovery_ping",
            Self::DiscoveryResponse => "discovery_response",
            Self::DiscoveryMeta => "discovery_meta",
            Self::Configuration => "configuration",
            Self::TaskRequest => "task_request",
            Self::TaskApproval => "task_approval",
            Self::TaskReject => "task_reject",
            Self::TaskExecution => "task_execution",
        };
        write!(f, "{}", name)
    }
}

/// Message envelope; the payload is an opaque JSON document
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    /// Wrap a payload, encoding it as JSON
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self> {
        Ok(Self {
            kind,
            payload: serde_json::to_string(payload)?,
        })
    }

    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
