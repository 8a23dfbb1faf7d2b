// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry of remote cluster nodes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cloudfleet_protocol::Packet;
use dashmap::DashMap;
use tracing::info;

use super::correlation::CorrelationRegistry;
use super::node_server::ClusterNodeServer;
use crate::model::{NetworkClusterNode, NetworkClusterNodeInfoSnapshot, ServiceTemplate};

/// Owns one [`ClusterNodeServer`] per peer node id.
pub struct ClusterNodeServerProvider {
    servers: DashMap<String, Arc<ClusterNodeServer>>,
    registry: Arc<CorrelationRegistry>,
    timeout: Duration,
}

impl ClusterNodeServerProvider {
    pub fn new(registry: Arc<CorrelationRegistry>, timeout: Duration) -> Self {
        Self {
            servers: DashMap::new(),
            registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Send a copy of `packet` to every connected peer. Returns how many
    /// peers it was handed to.
    pub fn send_all(&self, packet: &Packet) -> usize {
        self.servers()
            .iter()
            .filter(|server| server.send_packet(packet.clone()))
            .count()
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<ClusterNodeServer>> {
        self.servers.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, node: &NetworkClusterNode) -> Arc<ClusterNodeServer> {
        self.servers
            .entry(node.unique_id.clone())
            .or_insert_with(|| {
                Arc::new(ClusterNodeServer::new(
                    node.clone(),
                    self.registry.clone(),
                    self.timeout,
                ))
            })
            .value()
            .clone()
    }

    /// Forget `node_id` and close its channel.
    pub fn remove(&self, node_id: &str) -> Option<Arc<ClusterNodeServer>> {
        let (_, server) = self.servers.remove(node_id)?;
        server.close();
        info!(peer = %node_id, "Cluster node removed");
        Some(server)
    }

    pub fn servers(&self) -> Vec<Arc<ClusterNodeServer>> {
        self.servers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn server_by_channel(&self, channel_id: u64) -> Option<Arc<ClusterNodeServer>> {
        self.servers()
            .into_iter()
            .find(|server| server.has_channel(channel_id))
    }

    /// Detach the channel with `channel_id` from whichever peer holds it.
    pub fn handle_disconnect(&self, channel_id: u64) -> Option<Arc<ClusterNodeServer>> {
        let server = self
            .servers()
            .into_iter()
            .find(|server| server.clear_channel(channel_id))?;
        info!(peer = %server.node_id(), "Cluster node disconnected");
        Some(server)
    }

    /// Push a zipped template to every connected peer.
    pub fn deploy_template_in_cluster(&self, template: &ServiceTemplate, zip: Bytes) -> usize {
        self.servers()
            .iter()
            .filter(|server| server.deploy_template(template, zip.clone()))
            .count()
    }

    pub fn node_info_snapshots(&self) -> Vec<NetworkClusterNodeInfoSnapshot> {
        self.servers()
            .iter()
            .filter_map(|server| server.node_info_snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfleet_protocol::{MemoryChannel, NetworkChannel, channels};

    fn provider() -> ClusterNodeServerProvider {
        ClusterNodeServerProvider::new(Arc::new(CorrelationRegistry::new()), Duration::from_secs(1))
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let provider = provider();
        let node = NetworkClusterNode::new("Node-2", vec![]);
        let a = provider.get_or_create(&node);
        let b = provider.get_or_create(&node);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(provider.servers().len(), 1);
        assert!(provider.get("Node-3").is_none());
    }

    #[tokio::test]
    async fn test_send_all_skips_disconnected() {
        let provider = provider();
        let connected = provider.get_or_create(&NetworkClusterNode::new("Node-2", vec![]));
        provider.get_or_create(&NetworkClusterNode::new("Node-3", vec![]));

        let (left, _right) = MemoryChannel::pair();
        connected.set_channel(left);

        let packet = Packet::new(channels::CHANNEL_MESSAGE, Default::default());
        assert_eq!(provider.send_all(&packet), 1);
    }

    #[tokio::test]
    async fn test_disconnect_and_remove() {
        let provider = provider();
        let server = provider.get_or_create(&NetworkClusterNode::new("Node-2", vec![]));
        let (left, _right) = MemoryChannel::pair();
        let channel_id = left.id();
        server.set_channel(left.clone());

        assert_eq!(
            provider.server_by_channel(channel_id).map(|s| s.node_id().to_string()),
            Some("Node-2".to_string())
        );
        assert!(provider.handle_disconnect(channel_id).is_some());
        assert!(provider.handle_disconnect(channel_id).is_none());

        server.set_channel(left.clone());
        provider.remove("Node-2");
        assert!(!left.is_connected());
        assert!(provider.get("Node-2").is_none());
    }
}
