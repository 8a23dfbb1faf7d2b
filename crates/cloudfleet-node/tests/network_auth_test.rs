// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel authentication in the node packet listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cloudfleet_node::cluster::packets::{AuthPayload, auth, fields, ops, sync_request};
use cloudfleet_node::model::NetworkClusterNode;
use cloudfleet_node::network::NodePacketListener;
use cloudfleet_node::process::MockProcessLauncher;
use cloudfleet_protocol::{MemoryChannel, NetworkChannel};
use common::{TestContext, task, wait_until};
use serde_json::json;

fn node_with_peer() -> TestContext {
    TestContext::build(MockProcessLauncher::new(), Vec::new(), |config| {
        config.cluster_peers = vec![NetworkClusterNode::new("Node-2", Vec::new())];
    })
}

/// The node listens on `local`; tests drive `remote`.
fn attach(ctx: &TestContext) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    let (local, remote) = MemoryChannel::pair();
    local.add_listener(Arc::new(NodePacketListener::new(&ctx.node)));
    (local, remote)
}

fn create_request() -> cloudfleet_protocol::Packet {
    sync_request(
        ops::CREATE_BY_SERVICE_TASK,
        json!({ fields::SERVICE_TASK: task("Lobby", 256) }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_before_auth_closes_channel() {
    let ctx = node_with_peer();
    let (local, remote) = attach(&ctx);

    remote.send(create_request()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || !local.is_connected()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.node.manager().local_services_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_authenticated_peer_may_send_requests() {
    let ctx = node_with_peer();
    let (local, remote) = attach(&ctx);

    let hello = auth(&AuthPayload::Node {
        node: NetworkClusterNode::new("Node-2", Vec::new()),
    })
    .unwrap();
    remote.send(hello).unwrap();
    remote.send(create_request()).unwrap();

    let created = wait_until(Duration::from_secs(2), || {
        ctx.node.manager().local_services_count() == 1
    })
    .await;
    assert!(created);
    assert!(local.is_connected());
    assert!(ctx.node.provider().get("Node-2").unwrap().has_channel(local.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_peer_is_rejected() {
    let ctx = node_with_peer();
    let (local, remote) = attach(&ctx);

    let hello = auth(&AuthPayload::Node {
        node: NetworkClusterNode::new("Node-9", Vec::new()),
    })
    .unwrap();
    remote.send(hello).unwrap();

    assert!(wait_until(Duration::from_secs(2), || !local.is_connected()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_channel_cannot_send_requests() {
    let ctx = node_with_peer();
    let service = ctx
        .node
        .create_cloud_service_by_task(&task("Lobby", 256))
        .await
        .unwrap();
    let (local, remote) = attach(&ctx);

    let hello = auth(&AuthPayload::Service {
        unique_id: service.unique_id(),
        connection_key: service.connection_key().to_string(),
    })
    .unwrap();
    remote.send(hello).unwrap();
    assert!(wait_until(Duration::from_secs(2), || service.has_network_channel(local.id())).await);

    remote.send(create_request()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(ctx.node.manager().local_services_count(), 1);
    assert!(local.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_connection_key_is_rejected() {
    let ctx = node_with_peer();
    let service = ctx
        .node
        .create_cloud_service_by_task(&task("Lobby", 256))
        .await
        .unwrap();
    let (local, remote) = attach(&ctx);

    let hello = auth(&AuthPayload::Service {
        unique_id: service.unique_id(),
        connection_key: "not-the-key".to_string(),
    })
    .unwrap();
    remote.send(hello).unwrap();

    assert!(wait_until(Duration::from_secs(2), || !local.is_connected()).await);
    assert!(service.network_channel().is_none());
}
