// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloudfleet Protocol
//!
//! Packet transport shared by every cloudfleet node.
//!
//! A [`Packet`] is the unit of communication between nodes and between a node
//! and the wrapper running inside a service process. It carries a numeric
//! channel id, a correlation id, a JSON header and an opaque binary body.
//!
//! Packets travel over a [`NetworkChannel`]. Two implementations exist:
//!
//! - [`MemoryChannel`]: a connected in-process pair, used for loopback and tests
//! - [`TcpChannel`]: length-prefixed frames over a TCP stream
//!
//! Incoming packets are pushed to every registered [`PacketListener`].
//!
//! # Example
//!
//! ```ignore
//! use cloudfleet_protocol::{MemoryChannel, Packet, channels};
//! use serde_json::json;
//!
//! let (left, right) = MemoryChannel::pair();
//! right.add_listener(my_listener);
//! left.send(Packet::from_value(channels::CHANNEL_MESSAGE, &json!({ "message": "hi" }))?)?;
//! ```

pub mod channel;
pub mod frame;
pub mod packet;
pub mod tcp;

pub use channel::{ChannelError, MemoryChannel, NetworkChannel, PacketListener};
pub use frame::{FrameError, MAX_FRAME_SIZE, read_packet, write_packet};
pub use packet::{Header, Packet, SYNC_OPERATION_PROPERTY, channels};
pub use tcp::TcpChannel;
