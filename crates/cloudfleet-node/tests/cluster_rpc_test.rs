// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote calls between two nodes joined by an in-process channel pair.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cloudfleet_node::commands;
use cloudfleet_node::model::{NetworkClusterNode, ServiceLifeCycle};
use cloudfleet_node::network::NodePacketListener;
use cloudfleet_node::process::MockProcessLauncher;
use cloudfleet_protocol::{MemoryChannel, NetworkChannel};
use common::{TestContext, task, wait_until};
use uuid::Uuid;

fn member(node_id: &'static str, peer_id: &'static str) -> TestContext {
    TestContext::build(MockProcessLauncher::new(), Vec::new(), move |config| {
        config.node_id = node_id.to_string();
        config.cluster_peers = vec![NetworkClusterNode::new(peer_id, Vec::new())];
    })
}

/// Two nodes that know each other, with their channels attached.
fn connected_pair() -> (TestContext, TestContext) {
    let first = member("Node-1", "Node-2");
    let second = member("Node-2", "Node-1");

    let (left, right) = MemoryChannel::pair();
    left.add_listener(Arc::new(NodePacketListener::new(&first.node)));
    right.add_listener(Arc::new(NodePacketListener::new(&second.node)));

    first.node.provider().get("Node-2").unwrap().set_channel(left);
    second.node.provider().get("Node-1").unwrap().set_channel(right);
    (first, second)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_create_and_reserved_ids() {
    let (first, second) = connected_pair();
    let peer = first.node.provider().get("Node-2").unwrap();

    let snapshot = peer
        .create_cloud_service_by_task(&task("Lobby", 256))
        .await
        .unwrap();

    assert_eq!(snapshot.service_id.node_unique_id, "Node-2");
    assert_eq!(snapshot.life_cycle, ServiceLifeCycle::Prepared);
    assert_eq!(second.node.manager().local_services_count(), 1);
    assert_eq!(peer.get_reserved_task_ids("Lobby").await, Some(vec![1]));
    assert_eq!(peer.get_reserved_task_ids("Proxy").await, Some(Vec::new()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_info_propagates_to_peer() {
    let (first, second) = connected_pair();
    let service = second
        .node
        .create_cloud_service_by_task(&task("Lobby", 256))
        .await
        .unwrap();
    let unique_id = service.unique_id();

    let seen = wait_until(Duration::from_secs(2), || {
        first.node.manager().snapshot(&unique_id).is_some()
    })
    .await;
    assert!(seen);
    assert_eq!(first.node.manager().reserved_task_ids("Lobby"), vec![1]);

    service.delete().await;
    let gone = wait_until(Duration::from_secs(2), || {
        first.node.manager().snapshot(&unique_id).is_none()
    })
    .await;
    assert!(gone);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_start_and_cached_log() {
    let (first, second) = connected_pair();
    let peer = first.node.provider().get("Node-2").unwrap();

    let snapshot = peer
        .create_cloud_service_by_task(&task("Lobby", 256))
        .await
        .unwrap();
    assert_eq!(
        peer.set_service_life_cycle(&snapshot, ServiceLifeCycle::Running)
            .await,
        Some(())
    );

    let service = second
        .node
        .manager()
        .local_service(&snapshot.service_id.unique_id)
        .unwrap();
    assert_eq!(service.life_cycle(), ServiceLifeCycle::Running);

    second
        .launcher
        .last()
        .unwrap()
        .emit_stdout("Done (0.8s)!\n")
        .await;
    assert!(wait_until(Duration::from_secs(2), || service.cached_log_lines().len() == 1).await);

    let lines = peer
        .get_cached_log_messages(snapshot.service_id.unique_id)
        .await
        .unwrap();
    assert_eq!(lines, vec!["Done (0.8s)!".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_command_line() {
    let (first, second) = connected_pair();
    let peer = first.node.provider().get("Node-2").unwrap();

    let lines = peer.send_command_line("help").await.unwrap();
    assert_eq!(lines, commands::execute(&second.node, "help"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_service_yields_none() {
    let (first, _second) = connected_pair();
    let peer = first.node.provider().get("Node-2").unwrap();

    assert_eq!(peer.get_cached_log_messages(Uuid::new_v4()).await, None);
    assert_eq!(first.node.registry().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnected_peer_yields_none() {
    let first = member("Node-1", "Node-2");
    let peer = first.node.provider().get("Node-2").unwrap();

    assert!(!peer.is_connected());
    assert_eq!(peer.get_reserved_task_ids("Lobby").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_peer_times_out() {
    let first = member("Node-1", "Node-2");
    let (left, _right) = MemoryChannel::pair();
    left.add_listener(Arc::new(NodePacketListener::new(&first.node)));
    let peer = first.node.provider().get("Node-2").unwrap();
    peer.set_channel(left);

    let started = tokio::time::Instant::now();
    assert_eq!(peer.get_reserved_task_ids("Lobby").await, None);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(first.node.registry().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_disconnect_clears_channel() {
    let (first, second) = connected_pair();
    let peer = first.node.provider().get("Node-2").unwrap();
    assert!(peer.is_connected());

    second.node.provider().get("Node-1").unwrap().close();

    assert!(wait_until(Duration::from_secs(2), || !peer.is_connected()).await);
}
