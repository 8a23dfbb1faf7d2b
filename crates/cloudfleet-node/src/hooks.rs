// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service lifecycle hooks.
//!
//! Subscribers implement [`ServiceEventHooks`], overriding only the points
//! they care about. The `allow_*` methods can veto a staging step by returning
//! `false`. [`HookRegistry`] calls subscribers in registration order.

use std::sync::{Arc, PoisonError, RwLock};

use crate::cluster::packets::ServiceInfoUpdateType;
use crate::model::{
    ServiceDeployment, ServiceId, ServiceInfoSnapshot, ServiceRemoteInclusion, ServiceTemplate,
};
use crate::service::log_cache::LogStream;

/// Lifecycle observer. All methods default to no-ops (or "allow").
#[allow(unused_variables)]
pub trait ServiceEventHooks: Send + Sync {
    fn pre_prepare(&self, service: &ServiceInfoSnapshot) {}
    fn post_prepare(&self, service: &ServiceInfoSnapshot) {}
    fn pre_start_prepare(&self, service: &ServiceInfoSnapshot) {}
    fn post_start_prepare(&self, service: &ServiceInfoSnapshot) {}
    fn pre_start(&self, service: &ServiceInfoSnapshot) {}
    fn post_start(&self, service: &ServiceInfoSnapshot) {}
    fn pre_stop(&self, service: &ServiceInfoSnapshot) {}
    fn post_stop(&self, service: &ServiceInfoSnapshot, exit_code: i32) {}
    fn pre_delete(&self, service: &ServiceInfoSnapshot) {}
    fn post_delete(&self, service: &ServiceInfoSnapshot) {}

    /// Return `false` to skip downloading `inclusion`.
    fn allow_inclusion(
        &self,
        service: &ServiceInfoSnapshot,
        inclusion: &ServiceRemoteInclusion,
    ) -> bool {
        true
    }

    /// Return `false` to skip copying `template`.
    fn allow_template(&self, service: &ServiceInfoSnapshot, template: &ServiceTemplate) -> bool {
        true
    }

    /// Return `false` to skip `deployment`.
    fn allow_deployment(
        &self,
        service: &ServiceInfoSnapshot,
        deployment: &ServiceDeployment,
    ) -> bool {
        true
    }

    /// A console line of a service on this node or a peer.
    fn console_line(&self, service_id: &ServiceId, line: &str, stream: LogStream) {}

    /// A service snapshot published by a peer.
    fn remote_service_update(&self, kind: ServiceInfoUpdateType, service: &ServiceInfoSnapshot) {}

    /// A custom channel message received from a peer.
    fn channel_message(&self, channel: &str, message: &str, data: &serde_json::Value) {}
}

/// Ordered subscriber list.
#[derive(Default)]
pub struct HookRegistry {
    subscribers: RwLock<Vec<Arc<dyn ServiceEventHooks>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hooks: Arc<dyn ServiceEventHooks>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hooks);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on every subscriber in registration order.
    pub fn each(&self, f: impl Fn(&dyn ServiceEventHooks)) {
        for hooks in self.snapshot() {
            f(hooks.as_ref());
        }
    }

    /// True unless a subscriber vetoes. Stops at the first veto.
    pub fn allow(&self, f: impl Fn(&dyn ServiceEventHooks) -> bool) -> bool {
        self.snapshot().iter().all(|hooks| f(hooks.as_ref()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn ServiceEventHooks>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Named {
        name: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
        veto_templates: bool,
    }

    impl ServiceEventHooks for Named {
        fn pre_delete(&self, _service: &ServiceInfoSnapshot) {
            self.calls.lock().unwrap().push(self.name);
        }

        fn allow_template(&self, _service: &ServiceInfoSnapshot, _template: &ServiceTemplate) -> bool {
            self.calls.lock().unwrap().push(self.name);
            !self.veto_templates
        }
    }

    fn snapshot() -> ServiceInfoSnapshot {
        serde_json::from_value(serde_json::json!({
            "creationTime": 1,
            "serviceId": {
                "uniqueId": uuid::Uuid::nil(),
                "taskName": "Lobby",
                "taskServiceId": 1,
                "nodeUniqueId": "Node-1"
            },
            "address": { "host": "127.0.0.1", "port": 44955 },
            "connected": false,
            "lifeCycle": "PREPARED",
            "processSnapshot": crate::model::ProcessSnapshot::empty(),
            "configuration": {
                "serviceId": {
                    "uniqueId": uuid::Uuid::nil(),
                    "taskName": "Lobby",
                    "taskServiceId": 1,
                    "nodeUniqueId": "Node-1"
                },
                "runtime": "jvm",
                "autoDeleteOnStop": false,
                "staticService": false,
                "processConfig": {
                    "environment": "MINECRAFT_SERVER",
                    "maxHeapMemorySize": 512
                },
                "port": 44955
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_subscribers_called_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        for name in ["first", "second", "third"] {
            registry.register(Arc::new(Named {
                name,
                calls: calls.clone(),
                veto_templates: false,
            }));
        }

        registry.each(|h| h.pre_delete(&snapshot()));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_veto_stops_at_first_refusal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        registry.register(Arc::new(Named {
            name: "allows",
            calls: calls.clone(),
            veto_templates: false,
        }));
        registry.register(Arc::new(Named {
            name: "vetoes",
            calls: calls.clone(),
            veto_templates: true,
        }));
        registry.register(Arc::new(Named {
            name: "never",
            calls: calls.clone(),
            veto_templates: false,
        }));

        let template = ServiceTemplate::new("Lobby", "default", "local");
        assert!(!registry.allow(|h| h.allow_template(&snapshot(), &template)));
        assert_eq!(*calls.lock().unwrap(), vec!["allows", "vetoes"]);
    }

    #[test]
    fn test_empty_registry_allows() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        let template = ServiceTemplate::new("Lobby", "default", "local");
        assert!(registry.allow(|h| h.allow_template(&snapshot(), &template)));
    }
}
