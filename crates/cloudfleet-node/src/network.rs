// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node networking: TCP listeners, peer connections and inbound packet
//! routing.
//!
//! The first packet on every connection is an auth packet. A peer node is
//! attached to its [`ClusterNodeServer`](crate::cluster::ClusterNodeServer);
//! a service wrapper is attached to its service as the back-channel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use cloudfleet_protocol::{NetworkChannel, Packet, PacketListener, TcpChannel, channels};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster::packets::{
    self, AuthPayload, ChannelMessage, ConsoleLogEntry, ServiceInfoUpdate, ServiceInfoUpdateType,
    fields,
};
use crate::error::Result;
use crate::handlers;
use crate::model::{NetworkClusterNodeInfoSnapshot, ServiceTemplate};
use crate::node::Node;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Who authenticated a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOwner {
    Node,
    Service,
}

fn authenticated_as(node: &Node, channel_id: u64) -> Option<ChannelOwner> {
    if node.provider().server_by_channel(channel_id).is_some() {
        return Some(ChannelOwner::Node);
    }
    node.manager()
        .local_services()
        .iter()
        .any(|service| service.has_network_channel(channel_id))
        .then_some(ChannelOwner::Service)
}

/// Routes packets arriving on any channel of this node.
///
/// Until a channel has sent a valid auth packet, anything else on it closes
/// the channel. Service back-channels may only send channel messages.
pub struct NodePacketListener {
    node: Weak<Node>,
}

impl NodePacketListener {
    pub fn new(node: &Arc<Node>) -> Self {
        Self {
            node: Arc::downgrade(node),
        }
    }

    fn handle_auth(&self, node: &Arc<Node>, channel: &Arc<dyn NetworkChannel>, packet: &Packet) {
        match packet.header_as::<AuthPayload>() {
            Ok(AuthPayload::Node { node: peer }) => {
                let accepted = node.provider().get(&peer.unique_id).filter(|server| {
                    server.is_acceptable_connection(channel.as_ref(), &peer.unique_id)
                });
                let Some(server) = accepted else {
                    warn!(peer = %peer.unique_id, "Rejected node connection");
                    channel.close();
                    return;
                };
                server.set_channel(channel.clone());
                info!(peer = %peer.unique_id, "Cluster node connected");
                if let Ok(info) = packets::node_info_update(&node.node_info_snapshot()) {
                    server.send_packet(info);
                }
            }
            Ok(AuthPayload::Service {
                unique_id,
                connection_key,
            }) => {
                let service = node
                    .manager()
                    .local_service(&unique_id)
                    .filter(|service| service.connection_key() == connection_key);
                let Some(service) = service else {
                    warn!(%unique_id, "Rejected service connection");
                    channel.close();
                    return;
                };
                service.set_network_channel(channel.clone());
                info!(service = %service.name(), "Service connected");
            }
            Err(e) => {
                warn!(channel_id = channel.id(), error = %e, "Invalid auth packet");
                channel.close();
            }
        }
    }

    fn handle_service_info(&self, node: &Node, packet: &Packet) {
        let update: ServiceInfoUpdate = match packet.header_as() {
            Ok(update) => update,
            Err(e) => {
                debug!(error = %e, "Invalid service info packet");
                return;
            }
        };
        let snapshot = update.service_info_snapshot;
        match update.kind {
            ServiceInfoUpdateType::Unregister => {
                node.manager().remove_snapshot(&snapshot.service_id.unique_id);
            }
            _ => node.manager().publish_snapshot(snapshot.clone()),
        }
        node.hooks()
            .each(|h| h.remote_service_update(update.kind, &snapshot));
    }

    fn handle_node_info(&self, node: &Node, channel: &Arc<dyn NetworkChannel>, packet: &Packet) {
        let snapshot = match packet.field::<NetworkClusterNodeInfoSnapshot>("clusterNodeInfoSnapshot") {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "Invalid node info packet");
                return;
            }
        };
        if let Some(server) = node.provider().server_by_channel(channel.id()) {
            server.set_node_info_snapshot(snapshot);
        }
    }

    fn handle_deploy_template(&self, node: &Arc<Node>, packet: Packet) {
        let template = match packet.field::<ServiceTemplate>(fields::SERVICE_TEMPLATE_ZIP) {
            Ok(Some(template)) => template,
            _ => {
                debug!("Template deployment without template");
                return;
            }
        };
        let Some(storage) = node.storages().local() else {
            return;
        };
        tokio::spawn(async move {
            match storage.deploy_zip(&template, packet.body).await {
                Ok(()) => info!(%template, "Template received from cluster"),
                Err(e) => warn!(%template, error = %e, "Failed to store template from cluster"),
            }
        });
    }
}

impl PacketListener for NodePacketListener {
    fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) {
        let Some(node) = self.node.upgrade() else {
            return;
        };

        if packet.channel == channels::AUTH {
            self.handle_auth(&node, channel, &packet);
            return;
        }

        match authenticated_as(&node, channel.id()) {
            None => {
                warn!(
                    channel_id = channel.id(),
                    packet_channel = packet.channel,
                    "Packet before authentication, closing channel"
                );
                channel.close();
                return;
            }
            Some(ChannelOwner::Service) if packet.channel != channels::CHANNEL_MESSAGE => {
                debug!(
                    channel_id = channel.id(),
                    packet_channel = packet.channel,
                    "Packet not accepted from a service"
                );
                return;
            }
            Some(_) => {}
        }

        match packet.channel {
            channels::SYNC_REQUEST => {
                let channel = channel.clone();
                tokio::spawn(async move {
                    let response = handlers::handle_sync_request(&node, &packet).await;
                    if let Err(e) = channel.send(response) {
                        debug!(channel_id = channel.id(), error = %e, "Could not answer sync request");
                    }
                });
            }
            channels::SYNC_RESPONSE => {
                if !node.registry().complete(packet) {
                    debug!(channel_id = channel.id(), "Response without pending request");
                }
            }
            channels::SERVICE_INFO_PUBLISHER => self.handle_service_info(&node, &packet),
            channels::NODE_INFO_UPDATE => self.handle_node_info(&node, channel, &packet),
            channels::CONSOLE_LOG_ENTRY => {
                if let Ok(entry) = packet.header_as::<ConsoleLogEntry>() {
                    node.hooks()
                        .each(|h| h.console_line(&entry.service_id, &entry.message, entry.stream));
                }
            }
            channels::CHANNEL_MESSAGE => {
                if let Ok(message) = packet.header_as::<ChannelMessage>() {
                    node.hooks()
                        .each(|h| h.channel_message(&message.channel, &message.message, &message.data));
                }
            }
            channels::DEPLOY_TEMPLATE => self.handle_deploy_template(&node, packet),
            other => debug!(channel_id = channel.id(), packet_channel = other, "Unhandled packet"),
        }
    }

    fn handle_disconnect(&self, channel: &Arc<dyn NetworkChannel>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        if node.provider().handle_disconnect(channel.id()).is_some() {
            return;
        }
        for service in node.manager().local_services() {
            if service.clear_network_channel(channel.id()) {
                info!(service = %service.name(), "Service disconnected");
                break;
            }
        }
    }
}

/// TCP side of a node: accept loops and peer reconnection.
pub struct NodeNetwork {
    node: Arc<Node>,
    listener: Arc<NodePacketListener>,
    shutdown: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeNetwork {
    pub fn new(node: Arc<Node>) -> Self {
        let listener = Arc::new(NodePacketListener::new(&node));
        Self {
            node,
            listener,
            shutdown: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn packet_listener(&self) -> Arc<NodePacketListener> {
        self.listener.clone()
    }

    /// Bind every configured listener and start the peer reconnect loop.
    pub async fn start(&self) -> Result<Vec<SocketAddr>> {
        let mut bound = Vec::new();
        for address in &self.node.config().listeners {
            let tcp = TcpListener::bind((address.host.as_str(), address.port)).await?;
            let local = tcp.local_addr()?;
            info!(address = %local, "Node listener bound");
            bound.push(local);
            self.spawn(accept_loop(tcp, self.listener.clone(), self.shutdown.clone()));
        }

        self.spawn(reconnect_loop(
            self.node.clone(),
            self.listener.clone(),
            self.shutdown.clone(),
        ));
        Ok(bound)
    }

    /// Try once to connect every disconnected peer.
    pub async fn connect_peers(&self) -> usize {
        connect_peers(&self.node, &self.listener).await
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }

    fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tokio::spawn(future));
    }
}

async fn accept_loop(tcp: TcpListener, listener: Arc<NodePacketListener>, shutdown: Arc<Notify>) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.notified() => break,
            accepted = tcp.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => match TcpChannel::spawn(stream, listener.clone()) {
                Ok(channel) => debug!(%peer, channel_id = channel.id(), "Connection accepted"),
                Err(e) => warn!(%peer, error = %e, "Failed to set up connection"),
            },
            Err(e) => {
                error!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn reconnect_loop(node: Arc<Node>, listener: Arc<NodePacketListener>, shutdown: Arc<Notify>) {
    let mut interval = tokio::time::interval(RECONNECT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = interval.tick() => {
                connect_peers(&node, &listener).await;
            }
        }
    }
}

async fn connect_peers(node: &Arc<Node>, listener: &Arc<NodePacketListener>) -> usize {
    let mut connected = 0;
    for server in node.provider().servers() {
        if server.is_connected() {
            continue;
        }
        for address in &server.node().listeners {
            let target = (address.host.as_str(), address.port);
            let channel = match TcpChannel::connect(target, listener.clone()).await {
                Ok(channel) => channel,
                Err(e) => {
                    debug!(peer = %server.node_id(), %address, error = %e, "Peer unreachable");
                    continue;
                }
            };
            let auth = packets::auth(&AuthPayload::Node {
                node: node.identity().clone(),
            });
            // Attached before the auth goes out so the peer's first answer
            // arrives on an authenticated channel.
            server.set_channel(channel.clone());
            match auth.map(|packet| channel.send(packet)) {
                Ok(Ok(())) => {
                    info!(peer = %server.node_id(), %address, "Connected to cluster node");
                    connected += 1;
                    break;
                }
                _ => {
                    server.clear_channel(channel.id());
                    channel.close();
                }
            }
        }
    }
    connected
}
