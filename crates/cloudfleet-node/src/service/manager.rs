// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node-local service registry and the cluster-wide snapshot map.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::cloud_service::CloudService;
use crate::model::{ServiceInfoSnapshot, ServiceLifeCycle, ServiceTask};

/// Services running on this node plus the last known snapshot of every
/// service in the cluster.
#[derive(Default)]
pub struct CloudServiceManager {
    local: DashMap<Uuid, Arc<CloudService>>,
    global: DashMap<Uuid, ServiceInfoSnapshot>,
    tasks: DashMap<String, ServiceTask>,
}

impl CloudServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local(&self, service: Arc<CloudService>) {
        self.local.insert(service.unique_id(), service);
    }

    pub fn unregister_local(&self, unique_id: &Uuid) -> Option<Arc<CloudService>> {
        self.local.remove(unique_id).map(|(_, service)| service)
    }

    pub fn local_service(&self, unique_id: &Uuid) -> Option<Arc<CloudService>> {
        self.local.get(unique_id).map(|entry| entry.value().clone())
    }

    pub fn local_services(&self) -> Vec<Arc<CloudService>> {
        self.local.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn local_services_count(&self) -> usize {
        self.local.len()
    }

    /// Store `snapshot` unless a newer one for the same service is known.
    pub fn publish_snapshot(&self, snapshot: ServiceInfoSnapshot) {
        match self.global.entry(snapshot.service_id.unique_id) {
            Entry::Occupied(mut current) => {
                if current.get().creation_time <= snapshot.creation_time {
                    current.insert(snapshot);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
    }

    pub fn remove_snapshot(&self, unique_id: &Uuid) -> Option<ServiceInfoSnapshot> {
        self.global.remove(unique_id).map(|(_, snapshot)| snapshot)
    }

    pub fn snapshot(&self, unique_id: &Uuid) -> Option<ServiceInfoSnapshot> {
        self.global.get(unique_id).map(|entry| entry.value().clone())
    }

    /// Every known snapshot, ordered by service name.
    pub fn snapshots(&self) -> Vec<ServiceInfoSnapshot> {
        let mut snapshots: Vec<_> = self.global.iter().map(|e| e.value().clone()).collect();
        snapshots.sort_by(|a, b| {
            (a.service_id.task_name.as_str(), a.service_id.task_service_id)
                .cmp(&(b.service_id.task_name.as_str(), b.service_id.task_service_id))
        });
        snapshots
    }

    pub fn snapshots_by_task(&self, task: &str) -> Vec<ServiceInfoSnapshot> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.service_id.task_name == task)
            .collect()
    }

    /// Task service ids in use for `task` anywhere in the cluster, ascending.
    pub fn reserved_task_ids(&self, task: &str) -> Vec<u32> {
        self.global
            .iter()
            .filter(|e| e.service_id.task_name == task)
            .map(|e| e.service_id.task_service_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Smallest id >= 1 not reserved for `task`.
    pub fn next_task_service_id(&self, task: &str) -> u32 {
        let reserved = self.reserved_task_ids(task);
        let mut id = 1;
        for taken in reserved {
            if taken == id {
                id += 1;
            } else if taken > id {
                break;
            }
        }
        id
    }

    /// Ports held by local services that are not deleted.
    pub fn ports_in_use(&self) -> BTreeSet<u16> {
        self.local
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|s| s.life_cycle != ServiceLifeCycle::Deleted)
            .map(|s| s.configuration.port)
            .collect()
    }

    /// MiB of heap claimed by local services in RUNNING state.
    pub fn current_used_heap_memory(&self) -> u64 {
        self.local
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|s| s.life_cycle == ServiceLifeCycle::Running)
            .map(|s| u64::from(s.configuration.process_config.max_heap_memory_size))
            .sum()
    }

    /// MiB of heap claimed by every local service.
    pub fn current_reserved_memory(&self) -> u64 {
        self.local
            .iter()
            .map(|e| u64::from(e.value().configuration().process_config.max_heap_memory_size))
            .sum()
    }

    pub fn add_task(&self, task: ServiceTask) {
        self.tasks.insert(task.name.clone(), task);
    }

    pub fn remove_task(&self, name: &str) -> Option<ServiceTask> {
        self.tasks.remove(name).map(|(_, task)| task)
    }

    pub fn task(&self, name: &str) -> Option<ServiceTask> {
        self.tasks.get(name).map(|e| e.value().clone())
    }

    pub fn tasks(&self) -> Vec<ServiceTask> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }
}
