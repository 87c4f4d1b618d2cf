//! Configuration types for convoy

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Port assumed for seeds and learned peers that omit one
pub const DEFAULT_PORT: u16 = 8190;

/// Main configuration for a convoy node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the peer endpoint listens on
    pub listen_addr: SocketAddr,

    /// Seed peers in `host[:port]` form
    pub seeds: Vec<String>,

    /// Discovery configuration
    pub discovery: DiscoveryConfig,

    /// Consensus configuration
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            seeds: Vec::new(),
            discovery: DiscoveryConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

/// Peer discovery configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Port used when a seed omits one
    pub default_port: u16,

    /// Interval between probing rounds
    #[serde(with = "duration_millis")]
    pub ping_interval: Duration,

    /// TCP dial timeout for a single probe
    #[serde(with = "duration_secs")]
    pub ping_timeout: Duration,

    /// Timeout for metadata fetch and exchange requests
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,

    /// Silence after the last successful probe before a peer is reported suspect
    #[serde(with = "duration_secs")]
    pub suspect_after: Duration,

    /// Silence before a peer is reported unreachable
    #[serde(with = "duration_secs")]
    pub unreachable_after: Duration,

    /// User-Agent sent with metadata exchange
    pub user_agent: String,

    /// This node's own `host:port` as peers see it; never added as a peer
    pub advertise_addr: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            ping_interval: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            suspect_after: Duration::from_secs(5),
            unreachable_after: Duration::from_secs(30),
            user_agent: "convoy-discovery".to_string(),
            advertise_addr: None,
        }
    }
}

/// Approval workflow configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Distinct admin approvals needed when auto-approval does not apply
    pub quorum: usize,

    /// Pending requests older than this expire
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Per-client bound on task execution
    #[serde(with = "duration_secs")]
    pub execution_timeout: Duration,

    /// Requests the registry holds before refusing new ones
    pub max_requests: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            request_timeout: Duration::from_secs(3600), // 1 hour
            execution_timeout: Duration::from_secs(30),
            max_requests: 10_000,
        }
    }
}

// Serde helpers for Duration
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.default_port, 8190);
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.ping_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_durations_use_declared_units() {
        let json = serde_json::to_value(DiscoveryConfig::default()).unwrap();
        assert_eq!(json["ping_interval"], 1000);
        assert_eq!(json["ping_timeout"], 30);
        assert_eq!(json["suspect_after"], 5);
        assert_eq!(json["unreachable_after"], 30);
    }
}
