//! Convoy Node - discovery peer and task approval host

use anyhow::Context;
use clap::Parser;
use convoy_cluster::{discovery_router, DiscoveryService};
use convoy_consensus::{ClientOutbox, ConsensusEngine, StaticTemplates};
use convoy_core::{NodeConfig, DEFAULT_PORT};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "convoy-node")]
#[command(about = "Convoy peer discovery and task approval node")]
struct Args {
    /// Address the peer endpoint listens on
    #[arg(long, default_value = "0.0.0.0:8190")]
    listen: SocketAddr,

    /// Seed peers, comma separated `host[:port]`
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<String>,

    /// Port assumed for seeds without one
    #[arg(long, default_value_t = DEFAULT_PORT)]
    default_port: u16,

    /// This node's `host:port` as peers reach it
    #[arg(long)]
    advertise: Option<String>,

    /// Admin approvals required for requests that are not auto-approved
    #[arg(long, default_value_t = 2)]
    quorum: usize,

    /// Known task template id (repeatable)
    #[arg(long = "template")]
    templates: Vec<String>,
}

impl Args {
    fn into_config(self) -> (NodeConfig, Vec<String>) {
        let mut config = NodeConfig {
            listen_addr: self.listen,
            seeds: self.seeds,
            ..NodeConfig::default()
        };
        config.discovery.default_port = self.default_port;
        config.discovery.advertise_addr = self.advertise;
        config.consensus.quorum = self.quorum;
        (config, self.templates)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, templates) = Args::parse().into_config();

    tracing::info!(
        listen = %config.listen_addr,
        seeds = config.seeds.len(),
        quorum = config.consensus.quorum,
        "Starting convoy node"
    );

    let discovery = DiscoveryService::new(config.discovery.clone()).context("building discovery")?;
    let seeded = discovery.set_seeds(config.seeds.as_slice()).await;
    if seeded < config.seeds.len() {
        tracing::warn!(
            accepted = seeded,
            given = config.seeds.len(),
            "Some seeds were rejected"
        );
    }

    let outbox = Arc::new(ClientOutbox::new());
    let engine = ConsensusEngine::new(
        config.consensus.clone(),
        Arc::new(StaticTemplates::new(templates)),
        outbox,
    );
    tracing::info!(quorum = engine.config().quorum, "Consensus engine ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let discovery_loop = discovery.start(shutdown_rx);

    let app = discovery_router(Arc::clone(&discovery)).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Serving /discovery");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("serving peer endpoint")?;

    let _ = shutdown_tx.send(true);
    discovery_loop.await.context("discovery loop panicked")?;

    tracing::info!(pending = engine.pending().await.len(), "Node stopped");
    Ok(())
}
