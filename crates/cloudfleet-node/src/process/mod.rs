// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process module - launching and controlling service processes.

pub mod mock;
pub mod native;
mod traits;

pub use mock::{MockProcessHandle, MockProcessLauncher};
pub use native::NativeProcessLauncher;
pub use traits::*;
