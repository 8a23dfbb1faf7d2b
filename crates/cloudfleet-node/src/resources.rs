// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! System CPU usage used for start admission.

use std::sync::{Mutex, PoisonError};

use sysinfo::System;

/// Source of the host's CPU load.
pub trait ResourceProbe: Send + Sync {
    /// CPU usage in percent (0-100) across all cores.
    fn system_cpu_usage(&self) -> f64;
}

/// Reads the host CPU usage through `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn system_cpu_usage(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        f64::from(system.global_cpu_usage())
    }
}

/// Always reports the same usage.
pub struct FixedProbe(pub f64);

impl ResourceProbe for FixedProbe {
    fn system_cpu_usage(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_probe_in_range() {
        let probe = SysinfoProbe::new();
        let usage = probe.system_cpu_usage();
        assert!((0.0..=100.0).contains(&usage) || usage.is_nan());
    }

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedProbe(42.5).system_cpu_usage(), 42.5);
    }
}
