//! Inbound side of the discovery protocol

use crate::discovery::DiscoveryService;
use crate::failure::PeerStatus;
use crate::wire::NodeList;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use convoy_core::Timestamp;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Answer to `GET /discovery`
#[derive(Debug, Serialize)]
pub struct DiscoveryInfo {
    pub time: u64,
    pub nodes: String,
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub status: PeerStatus,
}

/// Answer to `POST /discovery`
#[derive(Debug, Serialize)]
pub struct ExchangeAck {
    pub learned: usize,
    pub known: usize,
}

/// Router serving `/discovery` for peers
pub fn discovery_router(service: Arc<DiscoveryService>) -> Router {
    Router::new()
        .route("/discovery", get(get_discovery).post(post_discovery))
        .with_state(service)
}

async fn get_discovery(State(service): State<Arc<DiscoveryService>>) -> Json<DiscoveryInfo> {
    let peers = service
        .peer_statuses()
        .await
        .into_iter()
        .map(|(name, status)| PeerInfo { name, status })
        .collect();

    Json(DiscoveryInfo {
        time: Timestamp::now().0,
        nodes: service.membership_view().await.join(","),
        peers,
    })
}

async fn post_discovery(
    State(service): State<Arc<DiscoveryService>>,
    headers: HeaderMap,
    Json(list): Json<NodeList>,
) -> Json<ExchangeAck> {
    let agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    debug!(user_agent = %agent, nodes = %list.nodes, "Received membership view");

    let learned = service.learn_peers(&list).await;
    Json(ExchangeAck {
        learned,
        known: service.peer_count().await,
    })
}
