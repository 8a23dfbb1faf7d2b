// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloudfleet Node - cluster node server
//!
//! Supervises the local game-server processes and keeps the cluster-wide
//! service view in sync with the configured peers.

use std::sync::Arc;
use tracing::{info, warn};

use cloudfleet_node::config::NodeConfig;
use cloudfleet_node::network::NodeNetwork;
use cloudfleet_node::node::Node;
use cloudfleet_node::process::{NativeProcessLauncher, ProcessLauncher};
use cloudfleet_node::resources::SysinfoProbe;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudfleet_node=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = NodeConfig::from_env()?;

    info!(
        node_id = %config.node_id,
        listeners = config.listeners.len(),
        peers = config.cluster_peers.len(),
        max_memory = config.max_memory,
        "Starting Cloudfleet Node"
    );

    let launcher = Arc::new(NativeProcessLauncher::new());
    info!(launcher_type = launcher.launcher_type(), "Launcher initialized");

    let node = Node::builder()
        .config(config)
        .launcher(launcher)
        .resource_probe(Arc::new(SysinfoProbe::new()))
        .build()?;

    let network = NodeNetwork::new(node.clone());
    let addresses = network.start().await?;
    info!(addresses = ?addresses, "Node ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    network.shutdown();
    node.shutdown().await;

    info!("Cloudfleet Node shut down");

    Ok(())
}
