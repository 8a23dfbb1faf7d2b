// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel capability and the in-process channel pair.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::frame::FrameError;
use crate::packet::Packet;

/// Errors raised when sending on a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Receiver of packets arriving on a channel.
///
/// `handle` runs on the channel's reader task and must not block; long work
/// should be spawned.
pub trait PacketListener: Send + Sync {
    fn handle(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet);

    /// Called once when the channel stops delivering packets.
    fn handle_disconnect(&self, _channel: &Arc<dyn NetworkChannel>) {}
}

/// A bidirectional packet link to a peer.
pub trait NetworkChannel: Send + Sync {
    /// Process-unique id of this channel.
    fn id(&self) -> u64;

    /// Queue a packet for delivery. Never blocks.
    fn send(&self, packet: Packet) -> Result<(), ChannelError>;

    fn add_listener(&self, listener: Arc<dyn PacketListener>);

    fn is_connected(&self) -> bool;

    fn close(&self);
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_channel_id() -> u64 {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Ordered set of listeners shared by the channel implementations.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: RwLock<Vec<Arc<dyn PacketListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn PacketListener>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn snapshot(&self) -> Vec<Arc<dyn PacketListener>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn dispatch(&self, channel: &Arc<dyn NetworkChannel>, packet: Packet) {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            debug!(channel_id = channel.id(), packet_channel = packet.channel, "No listener for packet");
            return;
        }
        for listener in listeners {
            listener.handle(channel, packet.clone());
        }
    }

    pub(crate) fn disconnect(&self, channel: &Arc<dyn NetworkChannel>) {
        for listener in self.snapshot() {
            listener.handle_disconnect(channel);
        }
    }
}

/// One end of a connected in-process channel pair.
pub struct MemoryChannel {
    id: u64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    connected: AtomicBool,
    shutdown: Arc<Notify>,
    listeners: Listeners,
}

impl MemoryChannel {
    /// Create two connected ends. Must be called inside a tokio runtime.
    pub fn pair() -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        let (to_left, left_inbox) = mpsc::unbounded_channel();
        let (to_right, right_inbox) = mpsc::unbounded_channel();

        let left = Arc::new(Self::new(to_right));
        let right = Arc::new(Self::new(to_left));

        Self::spawn_pump(&left, left_inbox);
        Self::spawn_pump(&right, right_inbox);

        (left, right)
    }

    fn new(outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            id: next_channel_id(),
            outbound: Mutex::new(Some(outbound)),
            connected: AtomicBool::new(true),
            shutdown: Arc::new(Notify::new()),
            listeners: Listeners::default(),
        }
    }

    fn spawn_pump(this: &Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Packet>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let shutdown = this.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.notified() => None,
                    received = inbox.recv() => received,
                };
                let Some(packet) = received else {
                    break;
                };
                let Some(strong) = weak.upgrade() else {
                    return;
                };
                let channel: Arc<dyn NetworkChannel> = strong.clone();
                strong.listeners.dispatch(&channel, packet);
            }

            if let Some(strong) = weak.upgrade() {
                strong.connected.store(false, Ordering::SeqCst);
                strong
                    .outbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let channel: Arc<dyn NetworkChannel> = strong.clone();
                strong.listeners.disconnect(&channel);
            }
        });
    }
}

impl NetworkChannel for MemoryChannel {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, packet: Packet) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(sender) => sender.send(packet).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    fn add_listener(&self, listener: Arc<dyn PacketListener>) {
        self.listeners.add(listener);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shutdown.notify_one();
    }
}
