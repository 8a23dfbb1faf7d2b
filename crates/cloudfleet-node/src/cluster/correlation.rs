// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Correlation of sync requests with their responses.
//!
//! Every outgoing request registers a one-shot slot keyed by the packet's
//! unique id. The first response carrying that id fills the slot; a timeout
//! removes it. Late or duplicate responses find no slot and are dropped.

use std::time::Duration;

use cloudfleet_protocol::{ChannelError, NetworkChannel, Packet};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Failure of a correlated call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("peer not connected")]
    NotConnected,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("send failed: {0}")]
    Send(ChannelError),

    #[error("response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Pending requests awaiting a response.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<Uuid, oneshot::Sender<Packet>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `id`.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<Packet> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Resolve the slot matching `packet.unique_id`.
    ///
    /// Returns false if nothing was waiting for it.
    pub fn complete(&self, packet: Packet) -> bool {
        match self.pending.remove(&packet.unique_id) {
            Some((id, tx)) => {
                if tx.send(packet).is_err() {
                    debug!(correlation_id = %id, "Caller gave up before response arrived");
                }
                true
            }
            None => {
                debug!(correlation_id = %packet.unique_id, "Dropping response without pending request");
                false
            }
        }
    }

    pub fn cancel(&self, id: &Uuid) {
        self.pending.remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` on `channel` and wait up to `timeout` for its response.
    pub async fn call(
        &self,
        channel: &dyn NetworkChannel,
        request: Packet,
        timeout: Duration,
    ) -> Result<Packet, CallError> {
        if !channel.is_connected() {
            return Err(CallError::NotConnected);
        }

        let id = request.unique_id;
        let rx = self.register(id);

        if let Err(e) = channel.send(request) {
            self.cancel(&id);
            return Err(match e {
                ChannelError::Closed => CallError::NotConnected,
                other => CallError::Send(other),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CallError::NotConnected),
            Err(_) => {
                self.cancel(&id);
                Err(CallError::Timeout(timeout))
            }
        }
    }
}
