// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster communication: remote calls to peer nodes and broadcasts.

pub mod correlation;
pub mod node_server;
pub mod packets;
pub mod provider;

pub use correlation::{CallError, CorrelationRegistry};
pub use node_server::ClusterNodeServer;
pub use provider::ClusterNodeServerProvider;
