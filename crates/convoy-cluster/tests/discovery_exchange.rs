//! Two peers on loopback: probing, metadata fetch and membership gossip

use convoy_cluster::{discovery_router, DiscoveryService, NodeList};
use convoy_core::DiscoveryConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn spawn_peer() -> (Arc<DiscoveryService>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = DiscoveryService::new(DiscoveryConfig {
        ping_interval: Duration::from_millis(50),
        ping_timeout: Duration::from_secs(1),
        advertise_addr: Some(addr.to_string()),
        ..DiscoveryConfig::default()
    })
    .unwrap();

    let app = discovery_router(Arc::clone(&service));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (service, addr)
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_seeded_peer_learns_about_us() {
    let (alpha, _alpha_addr) = spawn_peer().await;
    let (beta, beta_addr) = spawn_peer().await;
    alpha.set_seeds(&[beta_addr.to_string()]).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = alpha.start(shutdown_rx);

    let node = alpha.peers().await.remove(0);
    assert!(
        eventually(|| {
            let node = Arc::clone(&node);
            async move { node.meta_received().await }
        })
        .await
    );

    let alpha_name = alpha.config().advertise_addr.clone().unwrap();
    assert!(
        eventually(|| {
            let beta = Arc::clone(&beta);
            let alpha_name = alpha_name.clone();
            async move { beta.peer_names().await.contains(&alpha_name) }
        })
        .await
    );

    // beta never adds itself even though alpha's view names it
    assert_eq!(beta.peer_count().await, 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_exchange_reports_learned_peers() {
    let (alpha, _) = spawn_peer().await;
    let (_beta, beta_addr) = spawn_peer().await;
    alpha.set_seeds(&["10.0.0.1:8190".to_string(), beta_addr.to_string()]).await;

    let beta_node = alpha.peers().await.remove(1);
    let response = beta_node.exchange_meta().await.unwrap();
    let ack: serde_json::Value = serde_json::from_str(&response).unwrap();

    // alpha itself plus 10.0.0.1; beta's own address is skipped
    assert_eq!(ack["learned"], 2);
    assert_eq!(ack["known"], 2);
}

#[tokio::test]
async fn test_fetch_meta_sets_flag_once() {
    let (alpha, _) = spawn_peer().await;
    let (_beta, beta_addr) = spawn_peer().await;
    alpha.set_seeds(&[beta_addr.to_string()]).await;

    let node = alpha.peers().await.remove(0);
    assert!(!node.meta_received().await);

    let meta = node.fetch_meta().await.unwrap();
    assert!(meta.contains_key("time"));
    assert!(node.meta_received().await);
}

#[tokio::test]
async fn test_non_json_peer_is_malformed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route("/discovery", axum::routing::get(|| async { "hello" }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let alpha = DiscoveryService::new(DiscoveryConfig::default()).unwrap();
    alpha.set_seeds(&[addr.to_string()]).await;
    let node = alpha.peers().await.remove(0);

    let err = node.fetch_meta().await.unwrap_err();
    assert!(matches!(err, convoy_core::ConvoyError::MalformedMeta { .. }));
    assert!(!node.meta_received().await);
    assert_eq!(NodeList::default().names().count(), 0);
}
