// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP channel tests over a loopback listener.

use std::sync::Arc;
use std::time::Duration;

use cloudfleet_protocol::{NetworkChannel, Packet, PacketListener, TcpChannel, channels};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Forwards every packet (and disconnects as `None`) into an mpsc queue.
struct Forward(mpsc::UnboundedSender<Option<Packet>>);

impl PacketListener for Forward {
    fn handle(&self, _channel: &Arc<dyn NetworkChannel>, packet: Packet) {
        let _ = self.0.send(Some(packet));
    }

    fn handle_disconnect(&self, _channel: &Arc<dyn NetworkChannel>) {
        let _ = self.0.send(None);
    }
}

/// Echoes sync requests back as responses with the same unique id.
struct Echo;

impl PacketListener for Echo {
    fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) {
        let response = Packet::response_to(&packet, packet.header.clone()).with_body(packet.body);
        channel.send(response).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_request_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        TcpChannel::spawn(stream, Arc::new(Echo)).unwrap()
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = TcpChannel::connect(addr, Arc::new(Forward(tx))).await.unwrap();
    let _server_channel = server.await.unwrap();

    let request = Packet::from_value(channels::SYNC_REQUEST, &json!({ "sync_operation": "ping" }))
        .unwrap()
        .with_body(vec![9u8; 1024]);
    let id = request.unique_id;
    client.send(request).unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.unique_id, id);
    assert_eq!(response.channel, channels::SYNC_RESPONSE);
    assert_eq!(response.sync_operation(), Some("ping"));
    assert_eq!(response.body.len(), 1024);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_peer_close_notifies_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        TcpChannel::spawn(stream, Arc::new(Echo)).unwrap()
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = TcpChannel::connect(addr, Arc::new(Forward(tx))).await.unwrap();
    let server_channel = server.await.unwrap();

    server_channel.close();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(event.is_none());
    assert!(!client.is_connected());
    assert!(client.send(Packet::new(channels::AUTH, Default::default())).is_err());
}
