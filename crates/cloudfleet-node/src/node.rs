// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node context shared by every component.
//!
//! A [`Node`] owns the configuration, the peer registry, the service manager,
//! hooks, template storages and the process launcher. It is built once with
//! [`NodeBuilder`] and handed around as `Arc<Node>`.
//!
//! ```rust,ignore
//! let node = Node::builder()
//!     .config(NodeConfig::from_env()?)
//!     .launcher(Arc::new(NativeProcessLauncher::new()))
//!     .build()?;
//!
//! let service = node.create_cloud_service_by_task(&task).await?;
//! service.start().await?;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::packets::{self, CustomServiceRequest, ServiceInfoUpdateType};
use crate::cluster::{ClusterNodeServerProvider, CorrelationRegistry};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::hooks::{HookRegistry, ServiceEventHooks};
use crate::model::{
    NetworkClusterNode, NetworkClusterNodeInfoSnapshot, ServiceConfiguration, ServiceId,
    ServiceInfoSnapshot, ServiceTask,
};
use crate::process::{NativeProcessLauncher, ProcessLauncher};
use crate::resources::{ResourceProbe, SysinfoProbe};
use crate::service::log_cache::{LogEntrySink, LogStream};
use crate::service::{CloudService, CloudServiceManager};
use crate::template::local::LocalTemplateStorage;
use crate::template::{TemplateStorage, TemplateStorageRegistry};

/// Why admission control refused a start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionDenied {
    #[error("not enough memory: {used} MiB used, {requested} MiB requested, {max} MiB max")]
    MemoryExhausted { used: u64, requested: u64, max: u64 },

    #[error("CPU usage {usage:.1}% reaches the {limit:.1}% limit")]
    CpuExhausted { usage: f64, limit: f64 },
}

/// Builder for [`Node`].
#[derive(Default)]
pub struct NodeBuilder {
    config: Option<NodeConfig>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    resources: Option<Arc<dyn ResourceProbe>>,
    storages: Vec<Arc<dyn TemplateStorage>>,
    hooks: Vec<Arc<dyn ServiceEventHooks>>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: `NodeConfig::default()`
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Default: [`NativeProcessLauncher`]
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Default: [`SysinfoProbe`]
    pub fn resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.resources = Some(probe);
        self
    }

    /// Register an additional storage. A storage named `local` replaces the
    /// built-in one.
    pub fn template_storage(mut self, storage: Arc<dyn TemplateStorage>) -> Self {
        self.storages.push(storage);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ServiceEventHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn build(self) -> Result<Arc<Node>> {
        let config = self.config.unwrap_or_default();
        if config.node_id.trim().is_empty() {
            return Err(Error::Other("node id must not be empty".to_string()));
        }

        let registry = Arc::new(CorrelationRegistry::new());
        let provider = ClusterNodeServerProvider::new(registry.clone(), config.request_timeout);
        for peer in &config.cluster_peers {
            provider.get_or_create(peer);
        }

        let storages = TemplateStorageRegistry::new();
        storages.register(Arc::new(LocalTemplateStorage::new(config.templates_dir.clone())));
        for storage in self.storages {
            storages.register(storage);
        }

        let hooks = HookRegistry::new();
        for subscriber in self.hooks {
            hooks.register(subscriber);
        }

        let http = reqwest::Client::builder().build()?;

        Ok(Arc::new(Node {
            identity: config.identity(),
            registry,
            provider,
            manager: CloudServiceManager::new(),
            hooks,
            storages,
            launcher: self
                .launcher
                .unwrap_or_else(|| Arc::new(NativeProcessLauncher::new())),
            resources: self.resources.unwrap_or_else(|| Arc::new(SysinfoProbe::new())),
            start_sequence: Arc::new(tokio::sync::Mutex::new(())),
            http,
            config,
        }))
    }
}

/// The local cluster node.
pub struct Node {
    config: NodeConfig,
    identity: NetworkClusterNode,
    registry: Arc<CorrelationRegistry>,
    provider: ClusterNodeServerProvider,
    manager: CloudServiceManager,
    hooks: HookRegistry,
    storages: TemplateStorageRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    resources: Arc<dyn ResourceProbe>,
    start_sequence: Arc<tokio::sync::Mutex<()>>,
    http: reqwest::Client,
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> &NetworkClusterNode {
        &self.identity
    }

    pub fn node_id(&self) -> &str {
        &self.identity.unique_id
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &ClusterNodeServerProvider {
        &self.provider
    }

    pub fn manager(&self) -> &CloudServiceManager {
        &self.manager
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn storages(&self) -> &TemplateStorageRegistry {
        &self.storages
    }

    pub fn launcher(&self) -> &Arc<dyn ProcessLauncher> {
        &self.launcher
    }

    pub fn resources(&self) -> &Arc<dyn ResourceProbe> {
        &self.resources
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Serializes service starts unless parallel starts are configured.
    pub fn start_sequence(&self) -> &tokio::sync::Mutex<()> {
        &self.start_sequence
    }

    /// Create, register and prepare a service.
    pub async fn create_cloud_service(
        self: &Arc<Self>,
        configuration: ServiceConfiguration,
    ) -> Result<Arc<CloudService>> {
        let service = CloudService::create(self.clone(), configuration).await?;
        self.publish_node_info();
        Ok(service)
    }

    /// Create a service from a task: next free task id, first free port at or
    /// above the task's start port.
    pub async fn create_cloud_service_by_task(
        self: &Arc<Self>,
        task: &ServiceTask,
    ) -> Result<Arc<CloudService>> {
        if !task.associated_nodes.is_empty()
            && !task.associated_nodes.iter().any(|n| n == self.node_id())
        {
            return Err(Error::Other(format!(
                "task {} is not associated with node {}",
                task.name,
                self.node_id()
            )));
        }

        let configuration = ServiceConfiguration {
            service_id: self.next_service_id(&task.name),
            runtime: task.runtime.clone(),
            auto_delete_on_stop: task.auto_delete_on_stop,
            static_service: task.static_services,
            groups: task.groups.clone(),
            includes: task.includes.clone(),
            templates: task.templates.clone(),
            deployments: task.deployments.clone(),
            process_config: task.process_configuration.clone(),
            port: self.free_port(task.start_port),
        };
        self.create_cloud_service(configuration).await
    }

    /// Create a service from explicit resource lists.
    pub async fn create_cloud_service_custom(
        self: &Arc<Self>,
        request: &CustomServiceRequest,
    ) -> Result<Arc<CloudService>> {
        let configuration = ServiceConfiguration {
            service_id: self.next_service_id(&request.name),
            runtime: request.runtime.clone(),
            auto_delete_on_stop: request.auto_delete_on_stop,
            static_service: request.static_service,
            groups: request.groups.clone(),
            includes: request.includes.clone(),
            templates: request.templates.clone(),
            deployments: request.deployments.clone(),
            process_config: request.process_configuration.clone(),
            port: self.free_port(request.port),
        };
        self.create_cloud_service(configuration).await
    }

    /// Create `amount` custom services. Stops at the first failure.
    ///
    /// Amounts above `max_services_per_request` are refused outright.
    pub async fn create_cloud_services_custom(
        self: &Arc<Self>,
        amount: u32,
        request: &CustomServiceRequest,
    ) -> Result<Vec<Arc<CloudService>>> {
        let limit = self.config().max_services_per_request;
        if amount > limit {
            return Err(Error::Other(format!(
                "requested {} services, at most {} per request",
                amount, limit
            )));
        }
        let mut services = Vec::with_capacity(amount as usize);
        for _ in 0..amount {
            services.push(self.create_cloud_service_custom(request).await?);
        }
        Ok(services)
    }

    fn next_service_id(&self, task_name: &str) -> ServiceId {
        ServiceId {
            unique_id: uuid::Uuid::new_v4(),
            task_name: task_name.to_string(),
            task_service_id: self.manager.next_task_service_id(task_name),
            node_unique_id: self.node_id().to_string(),
        }
    }

    fn free_port(&self, start: u16) -> u16 {
        let in_use = self.manager.ports_in_use();
        let mut port = start;
        while in_use.contains(&port) {
            match port.checked_add(1) {
                Some(next) => port = next,
                None => return start,
            }
        }
        port
    }

    /// Admission control for a start requesting `max_heap` MiB.
    pub fn check_admission(&self, max_heap: u32) -> std::result::Result<(), AdmissionDenied> {
        let used = self.manager.current_used_heap_memory();
        let requested = u64::from(max_heap);
        let max = self.config.max_memory;
        if used >= max || used + requested > max {
            return Err(AdmissionDenied::MemoryExhausted {
                used,
                requested,
                max,
            });
        }

        let usage = self.resources.system_cpu_usage();
        let limit = self.config.max_cpu_usage_to_start_services;
        if usage >= limit {
            return Err(AdmissionDenied::CpuExhausted { usage, limit });
        }
        Ok(())
    }

    /// Resource figures of this node.
    pub fn node_info_snapshot(&self) -> NetworkClusterNodeInfoSnapshot {
        NetworkClusterNodeInfoSnapshot {
            creation_time: chrono::Utc::now().timestamp_millis(),
            node: self.identity.clone(),
            current_services_count: self.manager.local_services_count(),
            used_memory: self.manager.current_used_heap_memory(),
            reserved_memory: self.manager.current_reserved_memory(),
            max_memory: self.config.max_memory,
            system_cpu_usage: self.resources.system_cpu_usage(),
        }
    }

    /// Broadcast the node info snapshot to every connected peer.
    pub fn publish_node_info(&self) {
        match packets::node_info_update(&self.node_info_snapshot()) {
            Ok(packet) => {
                let peers = self.provider.send_all(&packet);
                debug!(peers, "Node info published");
            }
            Err(e) => warn!(error = %e, "Could not encode node info snapshot"),
        }
    }

    /// Broadcast a service snapshot to every connected peer.
    pub fn publish_service_info(&self, kind: ServiceInfoUpdateType, snapshot: &ServiceInfoSnapshot) {
        match packets::service_info_update(kind, snapshot) {
            Ok(packet) => {
                let peers = self.provider.send_all(&packet);
                debug!(service = %snapshot.name(), ?kind, peers, "Service info published");
            }
            Err(e) => warn!(service = %snapshot.name(), error = %e, "Could not encode service info"),
        }
    }

    /// Delete every local service and close peer channels.
    pub async fn shutdown(&self) {
        let services = self.manager.local_services();
        info!(services = services.len(), "Shutting down node");
        for service in services {
            service.delete().await;
        }
        for server in self.provider.servers() {
            server.close();
        }
    }
}

impl LogEntrySink for Node {
    fn on_log_line(&self, service_id: &ServiceId, line: &str, stream: LogStream) {
        self.hooks.each(|h| h.console_line(service_id, line, stream));
        match packets::console_log_entry(service_id, line, stream) {
            Ok(packet) => {
                self.provider.send_all(&packet);
            }
            Err(e) => debug!(error = %e, "Could not encode console line"),
        }
    }
}
