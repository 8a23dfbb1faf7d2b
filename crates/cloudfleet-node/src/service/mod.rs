// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service module - lifecycle, staging and supervision of service processes.

pub mod cloud_service;
pub mod environment;
pub mod handoff;
pub mod log_cache;
pub mod manager;
pub mod staging;

pub use cloud_service::{CloudService, StartOutcome};
pub use log_cache::{ConsoleLogCache, LogEntrySink, LogStream};
pub use manager::CloudServiceManager;
