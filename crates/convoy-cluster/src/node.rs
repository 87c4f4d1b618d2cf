//! A single peer of the cluster and its probing/metadata protocol

use crate::discovery::DiscoveryService;
use crate::failure::PeerStatus;
use crate::wire::{parse_meta, NodeList, DISCOVERY_SERVICE};
use convoy_core::{ConvoyError, Result};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Peer in the cluster, addressed by `host:port`
pub struct Node {
    host: String,
    port: u16,

    /// Owning discovery service
    discovery: Weak<DiscoveryService>,

    /// Set once metadata was fetched successfully; never reset
    meta_received: RwLock<bool>,

    /// Last successful probe
    last_seen: RwLock<Option<Instant>>,

    /// A probe for this node is running
    probing: AtomicBool,

    /// A metadata fetch for this node is running
    fetching: AtomicBool,
}

impl Node {
    pub(crate) fn new(host: impl Into<String>, port: u16, discovery: Weak<DiscoveryService>) -> Self {
        Self {
            host: host.into(),
            port,
            discovery,
            meta_received: RwLock::new(false),
            last_seen: RwLock::new(None),
            probing: AtomicBool::new(false),
            fetching: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL of a named service on this peer
    pub fn full_url(&self, service: &str) -> String {
        format!("http://{}/{}", self.full_name(), service)
    }

    pub async fn meta_received(&self) -> bool {
        *self.meta_received.read().await
    }

    pub async fn last_seen(&self) -> Option<Instant> {
        *self.last_seen.read().await
    }

    pub async fn status(&self) -> PeerStatus {
        match self.discovery.upgrade() {
            Some(discovery) => discovery.detector().classify(self.last_seen().await),
            None => PeerStatus::Unknown,
        }
    }

    /// Claim the probe slot; false if a probe is still running
    pub(crate) fn begin_probe(&self) -> bool {
        !self.probing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_probe(&self) {
        self.probing.store(false, Ordering::Release);
    }

    /// Liveness probe: open and immediately close a TCP connection.
    ///
    /// The first successful contact starts a metadata fetch in the background.
    pub async fn ping(self: &Arc<Self>) -> bool {
        let Some(discovery) = self.discovery.upgrade() else {
            return false;
        };
        let timeout = discovery.config().ping_timeout;
        drop(discovery);

        match tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(stream)) => drop(stream),
            Ok(Err(e)) => {
                debug!(peer = %self.full_name(), error = %e, "Dial failed");
                return false;
            }
            Err(_) => {
                debug!(peer = %self.full_name(), "Dial timed out");
                return false;
            }
        }

        *self.last_seen.write().await = Some(Instant::now());

        if !self.meta_received().await && !self.fetching.swap(true, Ordering::AcqRel) {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = node.fetch_meta().await {
                    warn!(peer = %node.full_name(), error = %e, "Failed to fetch node metadata");
                }
                node.fetching.store(false, Ordering::Release);
            });
        }

        true
    }

    /// Fetch the peer's metadata, then push our membership view to it
    pub async fn fetch_meta(&self) -> Result<Map<String, Value>> {
        let discovery = self.discovery.upgrade().ok_or(ConvoyError::DiscoveryGone)?;
        let client = discovery.client().clone();
        drop(discovery);

        let body = client
            .get(self.full_url(DISCOVERY_SERVICE))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| self.http_error(e))?
            .text()
            .await
            .map_err(|e| self.http_error(e))?;

        let meta = parse_meta(&body).map_err(|reason| ConvoyError::MalformedMeta {
            peer: self.full_name(),
            reason,
        })?;
        debug!(peer = %self.full_name(), time = %meta["time"], "Received node metadata");

        *self.meta_received.write().await = true;
        info!(peer = %self.full_name(), "Detected peer");

        if let Err(e) = self.exchange_meta().await {
            warn!(peer = %self.full_name(), error = %e, "Metadata exchange failed");
        }

        Ok(meta)
    }

    /// POST our membership view to the peer; returns its (opaque) response body
    pub async fn exchange_meta(&self) -> Result<String> {
        let discovery = self.discovery.upgrade().ok_or(ConvoyError::DiscoveryGone)?;
        info!(peer = %self.full_name(), "Exchanging metadata");

        let body = NodeList::from_names(&discovery.membership_view().await);
        let request = discovery
            .client()
            .post(self.full_url(DISCOVERY_SERVICE))
            .header(reqwest::header::USER_AGENT, discovery.config().user_agent.as_str())
            .json(&body);
        drop(discovery);

        let response = request
            .send()
            .await
            .map_err(|e| self.http_error(e))?
            .text()
            .await
            .map_err(|e| self.http_error(e))?;

        debug!(peer = %self.full_name(), response = %response, "Metadata exchange response");
        Ok(response)
    }

    fn http_error(&self, e: reqwest::Error) -> ConvoyError {
        if e.is_connect() || e.is_timeout() {
            ConvoyError::PeerUnreachable(self.full_name())
        } else {
            ConvoyError::Http {
                peer: self.full_name(),
                reason: e.to_string(),
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::DiscoveryConfig;

    #[test]
    fn test_names_and_urls() {
        let node = Node::new("host1", 9090, Weak::new());
        assert_eq!(node.full_name(), "host1:9090");
        assert_eq!(node.full_url("discovery"), "http://host1:9090/discovery");
    }

    #[tokio::test]
    async fn test_ping_without_owner_fails() {
        let node = Arc::new(Node::new("127.0.0.1", 1, Weak::new()));
        assert!(!node.ping().await);
        assert_eq!(node.status().await, PeerStatus::Unknown);
    }

    #[tokio::test]
    async fn test_ping_closed_port_leaves_state_untouched() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = DiscoveryService::new(DiscoveryConfig::default()).unwrap();
        let node = service.add_peer("127.0.0.1", port).await.unwrap();

        assert!(!node.ping().await);
        assert!(!node.meta_received().await);
        assert!(node.last_seen().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_meta_from_unreachable_peer_is_retriable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = DiscoveryService::new(DiscoveryConfig::default()).unwrap();
        let node = service.add_peer("127.0.0.1", port).await.unwrap();

        let err = node.fetch_meta().await.unwrap_err();
        assert!(err.is_retriable());
        assert!(!node.meta_received().await);
    }

    #[tokio::test]
    async fn test_probe_slot_is_exclusive() {
        let node = Node::new("a", 1, Weak::new());
        assert!(node.begin_probe());
        assert!(!node.begin_probe());
        node.end_probe();
        assert!(node.begin_probe());
    }
}
