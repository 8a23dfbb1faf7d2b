// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Packet model.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

/// JSON header of a packet. Always an object.
pub type Header = Map<String, Value>;

/// Header property naming the requested remote operation.
pub const SYNC_OPERATION_PROPERTY: &str = "sync_operation";

/// Well-known channel ids.
pub mod channels {
    /// First packet on a fresh connection, identifies the peer.
    pub const AUTH: u32 = 1;
    /// Request expecting a correlated response.
    pub const SYNC_REQUEST: u32 = 2;
    /// Response to a [`SYNC_REQUEST`] carrying the same unique id.
    pub const SYNC_RESPONSE: u32 = 3;
    /// Service snapshot publication (register, start, stop, unregister...).
    pub const SERVICE_INFO_PUBLISHER: u32 = 4;
    /// A line captured from a service's console.
    pub const CONSOLE_LOG_ENTRY: u32 = 5;
    /// A zipped template pushed to peers.
    pub const DEPLOY_TEMPLATE: u32 = 6;
    /// Node resource snapshot publication.
    pub const NODE_INFO_UPDATE: u32 = 7;
    /// Free-form custom message.
    pub const CHANNEL_MESSAGE: u32 = 8;
}

/// A unit of communication on a [`NetworkChannel`](crate::NetworkChannel).
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub channel: u32,
    pub unique_id: Uuid,
    pub header: Header,
    pub body: Bytes,
}

impl Packet {
    /// Create a packet with a fresh unique id and an empty body.
    pub fn new(channel: u32, header: Header) -> Self {
        Self {
            channel,
            unique_id: Uuid::new_v4(),
            header,
            body: Bytes::new(),
        }
    }

    /// Create a packet whose header is the JSON object form of `value`.
    pub fn from_value<T: Serialize>(channel: u32, value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(header) => Ok(Self::new(channel, header)),
            _ => Err(<serde_json::Error as serde::ser::Error>::custom(
                "packet header must be a JSON object",
            )),
        }
    }

    /// Create a response to `request`, reusing its unique id.
    pub fn response_to(request: &Packet, header: Header) -> Self {
        Self {
            channel: channels::SYNC_RESPONSE,
            unique_id: request.unique_id,
            header,
            body: Bytes::new(),
        }
    }

    /// Replace the unique id (used for correlation).
    pub fn with_unique_id(mut self, unique_id: Uuid) -> Self {
        self.unique_id = unique_id;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The operation tag of a sync request, if any.
    pub fn sync_operation(&self) -> Option<&str> {
        self.header
            .get(SYNC_OPERATION_PROPERTY)
            .and_then(Value::as_str)
    }

    /// Decode the whole header into `T`.
    pub fn header_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.header.clone()))
    }

    /// Decode a single header field. Absent or `null` fields yield `None`.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        match self.header.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some),
        }
    }
}
