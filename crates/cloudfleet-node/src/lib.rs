// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloudfleet Node - Game Server Cluster Node
//!
//! Every machine in a cloudfleet cluster runs one node. A node supervises the
//! game-server processes ("services") placed on it, and talks to its peer
//! nodes to keep a cluster-wide view of every service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │           Node-1             │  packets │           Node-2             │
//! │  ┌────────────┐ ┌─────────┐  │◄────────►│  ┌────────────┐ ┌─────────┐  │
//! │  │  Cluster   │ │  Sync   │  │          │  │  Cluster   │ │  Sync   │  │
//! │  │ NodeServer │ │ Handler │  │          │  │ NodeServer │ │ Handler │  │
//! │  └────────────┘ └─────────┘  │          │  └────────────┘ └─────────┘  │
//! │  ┌────────────────────────┐  │          │  ┌────────────────────────┐  │
//! │  │  CloudServiceManager   │  │          │  │  CloudServiceManager   │  │
//! │  └───────────┬────────────┘  │          │  └───────────┬────────────┘  │
//! └──────────────┼───────────────┘          └──────────────┼───────────────┘
//!                │ spawn / stdin / logs                    │
//!                ▼                                         ▼
//!        ┌───────────────┐                         ┌───────────────┐
//!        │ service (JVM) │                         │ service (JVM) │
//!        │   + wrapper   │                         │   + wrapper   │
//!        └───────────────┘                         └───────────────┘
//! ```
//!
//! Remote operations on a peer go through a
//! [`ClusterNodeServer`](cluster::ClusterNodeServer): a sync request packet is
//! sent and the caller awaits the response with the same unique id, bounded
//! by the request timeout.
//!
//! # Service Life Cycle
//!
//! ```text
//! DEFINED ──► PREPARED ──► RUNNING ◄──► STOPPED
//!    └────────────┴───────────┴────────────┴──► DELETED
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CLOUDFLEET_NODE_ID` | `Node-1` | Unique id of this node |
//! | `CLOUDFLEET_LISTENERS` | `127.0.0.1:1410` | Comma separated listen addresses |
//! | `CLOUDFLEET_CLUSTER_PEERS` | - | `id@host:port,...` |
//! | `CLOUDFLEET_MAX_MEMORY` | `2048` | MiB of heap services may use |
//! | `CLOUDFLEET_MAX_CPU_USAGE` | `100` | CPU percent at which starts are refused |
//! | `CLOUDFLEET_PARALLEL_START` | `false` | Allow concurrent starts |
//! | `CLOUDFLEET_START_RETRY` | `true` | Retry starts refused by admission control |
//! | `CLOUDFLEET_JVM_COMMAND` | `java` | Launcher command |
//! | `CLOUDFLEET_TEMP_DIR` | `temp` | Temporary services and caches |
//! | `CLOUDFLEET_SERVICES_DIR` | `local/services` | Static services |
//! | `CLOUDFLEET_TEMPLATES_DIR` | `local/templates` | Local template storage |
//!
//! # Modules
//!
//! - [`cluster`]: remote calls to peer nodes and broadcasts
//! - [`service`]: service life cycle, staging and log capture
//! - [`template`]: template storages
//! - [`process`]: process launchers
//! - [`network`]: TCP listeners and inbound packet routing
//! - [`handlers`]: sync request handlers
//! - [`commands`]: node command line

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod model;
pub mod network;
pub mod node;
pub mod process;
pub mod resources;
pub mod service;
pub mod template;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use hooks::{HookRegistry, ServiceEventHooks};
pub use node::{AdmissionDenied, Node, NodeBuilder};
pub use service::{CloudService, StartOutcome};
