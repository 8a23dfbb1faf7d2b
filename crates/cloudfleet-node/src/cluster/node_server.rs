// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-peer facade turning sync packets into remote calls.
//!
//! Every remote operation shares one timeout and one failure policy: a
//! disconnected peer, a timeout or an undecodable answer yields `None`.
//! `None` is inconclusive; the peer may still have performed the operation.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use cloudfleet_protocol::{NetworkChannel, Packet};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::correlation::{CallError, CorrelationRegistry};
use super::packets::{self, CustomServiceRequest, fields, ops};
use crate::model::{
    NetworkClusterNode, NetworkClusterNodeInfoSnapshot, ServiceConfiguration, ServiceDeployment,
    ServiceInfoSnapshot, ServiceLifeCycle, ServiceRemoteInclusion, ServiceTask, ServiceTemplate,
};

/// A remote cluster node.
pub struct ClusterNodeServer {
    node: NetworkClusterNode,
    channel: RwLock<Option<Arc<dyn NetworkChannel>>>,
    info: RwLock<Option<NetworkClusterNodeInfoSnapshot>>,
    registry: Arc<CorrelationRegistry>,
    timeout: Duration,
}

impl ClusterNodeServer {
    pub fn new(node: NetworkClusterNode, registry: Arc<CorrelationRegistry>, timeout: Duration) -> Self {
        Self {
            node,
            channel: RwLock::new(None),
            info: RwLock::new(None),
            registry,
            timeout,
        }
    }

    pub fn node(&self) -> &NetworkClusterNode {
        &self.node
    }

    pub fn node_id(&self) -> &str {
        &self.node.unique_id
    }

    /// True only if no live channel is attached and `node_id` is this peer.
    pub fn is_acceptable_connection(&self, _channel: &dyn NetworkChannel, node_id: &str) -> bool {
        let free = self.channel().is_none_or(|current| !current.is_connected());
        free && node_id == self.node.unique_id
    }

    pub fn channel(&self) -> Option<Arc<dyn NetworkChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_channel(&self, channel: Arc<dyn NetworkChannel>) {
        debug!(peer = %self.node.unique_id, channel_id = channel.id(), "Peer channel attached");
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    /// Detach the channel if it is the one with `channel_id`.
    pub fn clear_channel(&self, channel_id: u64) -> bool {
        let mut guard = self.channel.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|c| c.id() == channel_id) {
            *guard = None;
            true
        } else {
            false
        }
    }

    pub fn has_channel(&self, channel_id: u64) -> bool {
        self.channel().is_some_and(|c| c.id() == channel_id)
    }

    pub fn is_connected(&self) -> bool {
        self.channel().is_some_and(|c| c.is_connected())
    }

    /// Fire-and-forget send. Returns false if the peer is not connected.
    pub fn send_packet(&self, packet: Packet) -> bool {
        match self.channel() {
            Some(channel) if channel.is_connected() => match channel.send(packet) {
                Ok(()) => true,
                Err(e) => {
                    debug!(peer = %self.node.unique_id, error = %e, "Send failed");
                    false
                }
            },
            _ => false,
        }
    }

    pub fn send_channel_message(&self, channel: &str, message: &str, data: Value) -> bool {
        match packets::channel_message(channel, message, data) {
            Ok(packet) => self.send_packet(packet),
            Err(e) => {
                warn!(error = %e, "Could not encode channel message");
                false
            }
        }
    }

    /// Push a zipped template to this peer.
    pub fn deploy_template(&self, template: &ServiceTemplate, zip: Bytes) -> bool {
        match packets::deploy_template(template, zip) {
            Ok(packet) => self.send_packet(packet),
            Err(e) => {
                warn!(%template, error = %e, "Could not encode template deployment");
                false
            }
        }
    }

    /// Last node info snapshot received from this peer.
    pub fn node_info_snapshot(&self) -> Option<NetworkClusterNodeInfoSnapshot> {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_node_info_snapshot(&self, snapshot: NetworkClusterNodeInfoSnapshot) {
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Close and detach the channel.
    pub fn close(&self) {
        let channel = self
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    pub async fn create_cloud_service_by_task(
        &self,
        task: &ServiceTask,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::CREATE_BY_SERVICE_TASK,
            json!({ fields::SERVICE_TASK: task }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn create_cloud_service(
        &self,
        configuration: &ServiceConfiguration,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::CREATE_BY_CONFIGURATION,
            json!({ fields::SERVICE_CONFIGURATION: configuration }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn create_cloud_service_custom(
        &self,
        request: &CustomServiceRequest,
    ) -> Option<ServiceInfoSnapshot> {
        let payload = serde_json::to_value(request).ok()?;
        self.call_field(ops::CREATE_CUSTOM, payload, fields::SERVICE_INFO_SNAPSHOT)
            .await
    }

    /// Create `amount` custom services on `node_unique_id`.
    pub async fn create_cloud_services_custom(
        &self,
        node_unique_id: &str,
        amount: u32,
        request: &CustomServiceRequest,
    ) -> Option<Vec<ServiceInfoSnapshot>> {
        let mut payload = serde_json::to_value(request).ok()?;
        if let Value::Object(map) = &mut payload {
            map.insert(fields::NODE_UNIQUE_ID.into(), json!(node_unique_id));
            map.insert(fields::AMOUNT.into(), json!(amount));
        }
        self.call_field(
            ops::CREATE_CUSTOM_SELECTED_NODE_AND_AMOUNT,
            payload,
            fields::SERVICE_INFO_SNAPSHOTS,
        )
        .await
    }

    /// Run a node command on the peer and collect its answer lines.
    pub async fn send_command_line(&self, command_line: &str) -> Option<Vec<String>> {
        self.call_field(
            ops::SEND_COMMAND_LINE,
            json!({ fields::COMMAND_LINE: command_line }),
            fields::RESPONSE_MESSAGES,
        )
        .await
    }

    pub async fn send_command_line_to_service(
        &self,
        unique_id: Uuid,
        command_line: &str,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::SEND_COMMAND_LINE_TO_SERVICE,
            json!({ fields::UNIQUE_ID: unique_id, fields::COMMAND_LINE: command_line }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn add_service_template(
        &self,
        unique_id: Uuid,
        template: &ServiceTemplate,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::ADD_TEMPLATE,
            json!({ fields::UNIQUE_ID: unique_id, fields::SERVICE_TEMPLATE: template }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn add_service_remote_inclusion(
        &self,
        unique_id: Uuid,
        inclusion: &ServiceRemoteInclusion,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::ADD_INCLUSION,
            json!({ fields::UNIQUE_ID: unique_id, fields::SERVICE_REMOTE_INCLUSION: inclusion }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn add_service_deployment(
        &self,
        unique_id: Uuid,
        deployment: &ServiceDeployment,
    ) -> Option<ServiceInfoSnapshot> {
        self.call_field(
            ops::ADD_DEPLOYMENT,
            json!({ fields::UNIQUE_ID: unique_id, fields::SERVICE_DEPLOYMENT: deployment }),
            fields::SERVICE_INFO_SNAPSHOT,
        )
        .await
    }

    pub async fn get_cached_log_messages(&self, unique_id: Uuid) -> Option<Vec<String>> {
        self.call_field(
            ops::GET_CACHED_LOG_MESSAGES,
            json!({ fields::UNIQUE_ID: unique_id }),
            fields::CACHED_LOG_MESSAGES,
        )
        .await
    }

    pub async fn set_service_life_cycle(
        &self,
        service: &ServiceInfoSnapshot,
        life_cycle: ServiceLifeCycle,
    ) -> Option<()> {
        self.call_ack(
            ops::SET_LIFE_CYCLE,
            json!({ fields::SERVICE_INFO_SNAPSHOT: service, fields::LIFE_CYCLE: life_cycle }),
        )
        .await
    }

    pub async fn restart_cloud_service(&self, service: &ServiceInfoSnapshot) -> Option<()> {
        self.call_ack(ops::RESTART, json!({ fields::SERVICE_INFO_SNAPSHOT: service }))
            .await
    }

    pub async fn kill_cloud_service(&self, service: &ServiceInfoSnapshot) -> Option<()> {
        self.call_ack(ops::KILL, json!({ fields::SERVICE_INFO_SNAPSHOT: service }))
            .await
    }

    pub async fn run_command(&self, service: &ServiceInfoSnapshot, command: &str) -> Option<()> {
        self.call_ack(
            ops::RUN_COMMAND,
            json!({ fields::SERVICE_INFO_SNAPSHOT: service, fields::COMMAND: command }),
        )
        .await
    }

    pub async fn include_all_waiting_service_inclusions(&self, unique_id: Uuid) -> Option<()> {
        self.call_ack(
            ops::INCLUDE_WAITING_INCLUSIONS,
            json!({ fields::UNIQUE_ID: unique_id }),
        )
        .await
    }

    pub async fn include_all_waiting_service_templates(&self, unique_id: Uuid) -> Option<()> {
        self.call_ack(
            ops::INCLUDE_WAITING_TEMPLATES,
            json!({ fields::UNIQUE_ID: unique_id }),
        )
        .await
    }

    pub async fn deploy_resources(&self, unique_id: Uuid) -> Option<()> {
        self.call_ack(ops::DEPLOY_RESOURCES, json!({ fields::UNIQUE_ID: unique_id }))
            .await
    }

    /// Task service ids in use on the peer for `task`.
    pub async fn get_reserved_task_ids(&self, task: &str) -> Option<Vec<u32>> {
        self.call_field(
            ops::GET_RESERVED_TASK_IDS,
            json!({ fields::TASK: task }),
            fields::TASK_IDS,
        )
        .await
    }

    #[instrument(skip(self, payload), fields(peer = %self.node.unique_id))]
    async fn call(&self, operation: &'static str, payload: Value) -> Result<Packet, CallError> {
        let channel = self.channel().ok_or(CallError::NotConnected)?;
        let request = packets::sync_request(operation, payload);
        self.registry
            .call(channel.as_ref(), request, self.timeout)
            .await
    }

    async fn call_field<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        payload: Value,
        field: &str,
    ) -> Option<T> {
        let result = match self.call(operation, payload).await {
            Ok(response) => response.field::<T>(field).map_err(CallError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(peer = %self.node.unique_id, operation, error = %e, "Cluster call failed");
                None
            }
        }
    }

    async fn call_ack(&self, operation: &'static str, payload: Value) -> Option<()> {
        match self.call(operation, payload).await {
            Ok(_) => Some(()),
            Err(e) => {
                warn!(peer = %self.node.unique_id, operation, error = %e, "Cluster call failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfleet_protocol::{MemoryChannel, PacketListener};

    fn server(timeout: Duration) -> ClusterNodeServer {
        ClusterNodeServer::new(
            NetworkClusterNode::new("Node-2", vec![]),
            Arc::new(CorrelationRegistry::new()),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_acceptable_connection() {
        let server = server(Duration::from_secs(1));
        let (left, _right) = MemoryChannel::pair();

        assert!(server.is_acceptable_connection(left.as_ref(), "Node-2"));
        assert!(!server.is_acceptable_connection(left.as_ref(), "Node-3"));

        server.set_channel(left.clone());
        assert!(!server.is_acceptable_connection(left.as_ref(), "Node-2"));
        assert!(server.is_connected());
    }

    #[tokio::test]
    async fn test_disconnected_peer_yields_none() {
        let server = server(Duration::from_secs(5));
        assert_eq!(server.get_reserved_task_ids("Lobby").await, None);
        assert_eq!(server.deploy_resources(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_clear_channel_only_matching_id() {
        let server = server(Duration::from_secs(1));
        let (left, right) = MemoryChannel::pair();
        server.set_channel(left.clone());

        assert!(!server.clear_channel(right.id()));
        assert!(server.has_channel(left.id()));
        assert!(server.clear_channel(left.id()));
        assert!(server.channel().is_none());
    }

    struct Answer;

    impl PacketListener for Answer {
        fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) {
            let mut header = serde_json::Map::new();
            header.insert(fields::TASK_IDS.into(), json!([1, 3]));
            let _ = channel.send(Packet::response_to(&packet, header));
        }
    }

    struct Complete(Arc<CorrelationRegistry>);

    impl PacketListener for Complete {
        fn handle(&self, _channel: &Arc<dyn NetworkChannel>, packet: Packet) {
            self.0.complete(packet);
        }
    }

    #[tokio::test]
    async fn test_field_decoded_from_response() {
        let registry = Arc::new(CorrelationRegistry::new());
        let server = ClusterNodeServer::new(
            NetworkClusterNode::new("Node-2", vec![]),
            registry.clone(),
            Duration::from_secs(1),
        );
        let (left, right) = MemoryChannel::pair();
        left.add_listener(Arc::new(Complete(registry)));
        right.add_listener(Arc::new(Answer));
        server.set_channel(left);

        assert_eq!(server.get_reserved_task_ids("Lobby").await, Some(vec![1, 3]));
        assert_eq!(server.get_cached_log_messages(Uuid::new_v4()).await, None);
        assert_eq!(server.deploy_resources(Uuid::new_v4()).await, Some(()));
    }
}
