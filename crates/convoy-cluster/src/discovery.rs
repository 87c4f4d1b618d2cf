//! Discovery service: owns the peer set and runs the probing loop

use crate::failure::{FailureDetector, PeerStatus};
use crate::node::Node;
use crate::wire::NodeList;
use convoy_core::{ConvoyError, DiscoveryConfig, Result};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Parse `host[:port]`, falling back to `default_port`
pub fn parse_seed(seed: &str, default_port: u16) -> Result<(String, u16)> {
    let invalid = |reason: &str| ConvoyError::InvalidSeed {
        seed: seed.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = seed.trim().split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host] => (*host, default_port),
        [host, port] => {
            let port = port.parse::<u16>().map_err(|_| invalid("port format invalid"))?;
            (*host, port)
        }
        _ => return Err(invalid("host:port format invalid")),
    };

    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    Ok((host.to_string(), port))
}

/// Cluster membership view kept convergent by probing and metadata gossip
pub struct DiscoveryService {
    /// Handle to ourselves, given to every node as its back-reference
    me: Weak<DiscoveryService>,

    /// Known peers in seed/discovery order
    nodes: RwLock<Vec<Arc<Node>>>,

    config: DiscoveryConfig,

    /// Shared HTTP client for metadata requests
    client: reqwest::Client,

    detector: FailureDetector,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ConvoyError::Internal(format!("failed to create HTTP client: {}", e)))?;

        let detector = FailureDetector::new(config.suspect_after, config.unreachable_after);
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            nodes: RwLock::new(Vec::new()),
            config,
            client,
            detector,
        }))
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    /// Add every well-formed seed as a peer; malformed seeds are logged and skipped.
    ///
    /// Returns the number of peers added.
    pub async fn set_seeds<S: AsRef<str>>(&self, seeds: &[S]) -> usize {
        let mut added = Vec::new();
        for seed in seeds {
            match parse_seed(seed.as_ref(), self.config.default_port) {
                Ok((host, port)) => added.push(Arc::new(Node::new(host, port, self.me.clone()))),
                Err(e) => warn!(error = %e, "Skipping seed"),
            }
        }

        let count = added.len();
        self.nodes.write().await.extend(added);
        count
    }

    /// Add a peer unless one with the same name is already known
    pub async fn add_peer(&self, host: &str, port: u16) -> Option<Arc<Node>> {
        let name = format!("{}:{}", host, port);
        if self.is_self(&name) {
            return None;
        }

        let mut nodes = self.nodes.write().await;
        if nodes.iter().any(|n| n.full_name() == name) {
            return None;
        }
        let node = Arc::new(Node::new(host, port, self.me.clone()));
        nodes.push(Arc::clone(&node));
        Some(node)
    }

    /// Learn peers from a received membership view.
    ///
    /// Returns the number of new peers.
    pub async fn learn_peers(&self, list: &NodeList) -> usize {
        let mut learned = 0;
        for entry in list.names() {
            match parse_seed(entry, self.config.default_port) {
                Ok((host, port)) => {
                    if let Some(node) = self.add_peer(&host, port).await {
                        info!(peer = %node.full_name(), "Learned peer");
                        learned += 1;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring peer entry"),
            }
        }
        learned
    }

    /// Administrative removal of a peer; discovery never evicts on its own
    pub async fn remove_peer(&self, full_name: &str) -> bool {
        let mut nodes = self.nodes.write().await;
        let before = nodes.len();
        nodes.retain(|n| n.full_name() != full_name);
        let removed = nodes.len() != before;
        if removed {
            info!(peer = %full_name, "Removed peer");
        }
        removed
    }

    /// Snapshot of the known peers
    pub async fn peers(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// `host:port` of every known peer, in order
    pub async fn peer_names(&self) -> Vec<String> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|n| n.full_name())
            .collect()
    }

    /// Names pushed to peers during metadata exchange: ourselves first when advertised
    pub async fn membership_view(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(own) = &self.config.advertise_addr {
            names.push(own.clone());
        }
        names.extend(self.peer_names().await);
        names
    }

    pub async fn peer_statuses(&self) -> Vec<(String, PeerStatus)> {
        let mut statuses = Vec::new();
        for node in self.peers().await {
            statuses.push((node.full_name(), node.status().await));
        }
        statuses
    }

    fn is_self(&self, name: &str) -> bool {
        self.config.advertise_addr.as_deref() == Some(name)
    }

    /// Launch the probing loop; it stops once `shutdown` flips to true or its sender drops
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.ping_interval, "Starting discovery");

        let mut ticker = tokio::time::interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.probe_all().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Discovery stopped");
    }

    /// Ping every known peer, each in its own task
    async fn probe_all(&self) {
        for node in self.peers().await {
            if !node.begin_probe() {
                debug!(peer = %node.full_name(), "Previous probe still running");
                continue;
            }
            tokio::spawn(async move {
                if !node.ping().await {
                    warn!(peer = %node.full_name(), "Failed to detect peer");
                }
                node.end_probe();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn service() -> Arc<DiscoveryService> {
        assert_ok!(DiscoveryService::new(DiscoveryConfig::default()))
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(assert_ok!(parse_seed("host1:9090", 8190)), ("host1".to_string(), 9090));
        assert_eq!(assert_ok!(parse_seed("host2", 8190)), ("host2".to_string(), 8190));
        assert!(parse_seed("bad:1:2", 8190).is_err());
        assert!(parse_seed("host:port", 8190).is_err());
        assert!(parse_seed(":80", 8190).is_err());
    }

    #[tokio::test]
    async fn test_set_seeds_skips_malformed_entries() {
        let service = service();
        let added = service.set_seeds(&["host1:9090", "host2", "bad:1:2"]).await;

        assert_eq!(added, 2);
        assert_eq!(service.peer_names().await, vec!["host1:9090", "host2:8190"]);
    }

    #[tokio::test]
    async fn test_seeds_keep_duplicates_and_order() {
        let service = service();
        service.set_seeds(&["b:2", "a:1", "b:2"]).await;
        assert_eq!(service.peer_names().await, vec!["b:2", "a:1", "b:2"]);
    }

    #[tokio::test]
    async fn test_nodes_point_back_to_owner() {
        let service = service();
        service.set_seeds(&["host1:9090"]).await;
        let node = service.peers().await.remove(0);
        // A node with a live owner classifies through the owner's detector
        assert_eq!(node.status().await, PeerStatus::Unknown);
        assert!(service.me.upgrade().is_some_and(|me| Arc::ptr_eq(&me, &service)));
    }

    #[tokio::test]
    async fn test_learn_peers_dedups_and_skips_self() {
        let service = assert_ok!(DiscoveryService::new(DiscoveryConfig {
            advertise_addr: Some("me:8190".to_string()),
            ..DiscoveryConfig::default()
        }));
        service.set_seeds(&["a:1"]).await;

        let learned = service
            .learn_peers(&NodeList {
                nodes: "me:8190,a:1,b:2,,bad:1:2,c".to_string(),
            })
            .await;

        assert_eq!(learned, 2);
        assert_eq!(service.peer_names().await, vec!["a:1", "b:2", "c:8190"]);
        assert_eq!(service.membership_view().await[0], "me:8190");
    }

    #[tokio::test]
    async fn test_remove_peer_is_explicit() {
        let service = service();
        service.set_seeds(&["a:1", "b:2"]).await;

        assert!(service.remove_peer("a:1").await);
        assert!(!service.remove_peer("a:1").await);
        assert_eq!(service.peer_names().await, vec!["b:2"]);
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let service = assert_ok!(DiscoveryService::new(DiscoveryConfig {
            ping_interval: Duration::from_millis(10),
            ..DiscoveryConfig::default()
        }));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = service.start(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();

        assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await));
    }

    #[tokio::test]
    async fn test_two_services_do_not_share_shutdown() {
        let first = service();
        let second = service();
        let (first_tx, first_rx) = watch::channel(false);
        let (_second_tx, second_rx) = watch::channel(false);

        let first_handle = first.start(first_rx);
        let second_handle = second.start(second_rx);

        first_tx.send(true).unwrap();
        assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(1), first_handle).await));
        assert!(!second_handle.is_finished());
        second_handle.abort();
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_never_evicted() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = assert_ok!(DiscoveryService::new(DiscoveryConfig {
            ping_interval: Duration::from_millis(10),
            ..DiscoveryConfig::default()
        }));
        service.set_seeds(&[format!("127.0.0.1:{}", port)]).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = service.start(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        assert_eq!(service.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_thresholds_come_from_config() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let service = assert_ok!(DiscoveryService::new(DiscoveryConfig {
            suspect_after: Duration::from_secs(1),
            unreachable_after: Duration::from_secs(3),
            ..DiscoveryConfig::default()
        }));
        let node = service.add_peer("127.0.0.1", port).await.unwrap();
        assert_eq!(node.status().await, PeerStatus::Unknown);

        assert!(node.ping().await);
        assert_eq!(node.status().await, PeerStatus::Reachable);

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(node.status().await, PeerStatus::Suspect);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(node.status().await, PeerStatus::Unreachable);
        assert_eq!(service.peer_statuses().await[0].1, PeerStatus::Unreachable);
    }
}
