// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Framed packet channel over TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::channel::{ChannelError, Listeners, NetworkChannel, PacketListener, next_channel_id};
use crate::frame::{FrameError, read_packet, write_packet};
use crate::packet::Packet;

/// A [`NetworkChannel`] over a TCP stream.
///
/// A writer task drains an unbounded queue so `send` never blocks; a reader
/// task decodes frames and pushes them to the listeners.
pub struct TcpChannel {
    id: u64,
    peer_addr: SocketAddr,
    outbound: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    connected: AtomicBool,
    shutdown: Arc<Notify>,
    listeners: Listeners,
}

impl TcpChannel {
    /// Connect to `addr`; `listener` is registered before the first read.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        listener: Arc<dyn PacketListener>,
    ) -> std::io::Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        Self::spawn(stream, listener)
    }

    /// Wrap an accepted stream; `listener` is registered before the first read.
    pub fn spawn(
        stream: TcpStream,
        listener: Arc<dyn PacketListener>,
    ) -> std::io::Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();

        let channel = Arc::new(Self {
            id: next_channel_id(),
            peer_addr,
            outbound: Mutex::new(Some(tx)),
            connected: AtomicBool::new(true),
            shutdown: Arc::new(Notify::new()),
            listeners: Listeners::default(),
        });
        channel.listeners.add(listener);

        let channel_id = channel.id;
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if let Err(e) = write_packet(&mut writer, &packet).await {
                    debug!(channel_id, error = %e, "Write failed, stopping writer");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let weak: Weak<Self> = Arc::downgrade(&channel);
        let shutdown = channel.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = shutdown.notified() => break,
                    result = read_packet(&mut reader) => result,
                };
                match result {
                    Ok(packet) => {
                        let Some(strong) = weak.upgrade() else {
                            return;
                        };
                        let dyn_channel: Arc<dyn NetworkChannel> = strong.clone();
                        strong.listeners.dispatch(&dyn_channel, packet);
                    }
                    Err(FrameError::ConnectionClosed) => {
                        debug!(channel_id, "Peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(channel_id, error = %e, "Failed to read packet");
                        break;
                    }
                }
            }

            if let Some(strong) = weak.upgrade() {
                strong.connected.store(false, Ordering::SeqCst);
                strong
                    .outbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let dyn_channel: Arc<dyn NetworkChannel> = strong.clone();
                strong.listeners.disconnect(&dyn_channel);
            }
        });

        Ok(channel)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl NetworkChannel for TcpChannel {
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
