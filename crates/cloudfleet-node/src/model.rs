// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Value types exchanged between nodes and persisted in snapshots.
//!
//! Every type serializes to camelCase JSON so that peers and wrappers agree on
//! the field names.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in '{}'", s))?;
        if host.is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in '{}'", s))?;
        Ok(Self::new(host, port))
    }
}

/// Identity of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceId {
    pub unique_id: Uuid,
    pub task_name: String,
    pub task_service_id: u32,
    pub node_unique_id: String,
}

impl ServiceId {
    /// Human readable name, `{task}-{id}`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.task_name, self.task_service_id)
    }
}

/// Kind of server software a service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEnvironmentType {
    MinecraftServer,
    Glowstone,
    Nukkit,
    GoMint,
    Bungeecord,
    Velocity,
    ProxProx,
}

impl ServiceEnvironmentType {
    /// Arguments appended after the main class.
    pub fn trailing_arguments(&self) -> &'static [&'static str] {
        match self {
            Self::MinecraftServer => &["nogui"],
            Self::Nukkit => &["disable-ansi"],
            _ => &[],
        }
    }
}

/// Process-level configuration of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfiguration {
    pub environment: ServiceEnvironmentType,
    /// Maximum heap in MiB.
    pub max_heap_memory_size: u32,
    #[serde(default)]
    pub jvm_options: Vec<String>,
}

/// A remote file downloaded into the service directory before start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRemoteInclusion {
    pub url: String,
    pub destination: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ServiceRemoteInclusion {
    pub fn new(url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            properties: Map::new(),
        }
    }

    /// Extra request headers from the `httpHeaders` property.
    pub fn http_headers(&self) -> Vec<(String, String)> {
        match self.properties.get("httpHeaders") {
            Some(Value::Object(headers)) => headers
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A template inside a named storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    pub prefix: String,
    pub name: String,
    pub storage: String,
}

/// True if `value` names something strictly below the directory it is
/// joined onto: relative, no `..`, at least one normal component.
pub fn is_contained_path(value: &str) -> bool {
    let mut named = false;
    for component in Path::new(value).components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    named
}

impl ServiceTemplate {
    pub fn new(
        prefix: impl Into<String>,
        name: impl Into<String>,
        storage: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            storage: storage.into(),
        }
    }

    /// `prefix/name`
    pub fn template_path(&self) -> String {
        format!("{}/{}", self.prefix, self.name)
    }

    /// True when prefix, name and storage are all set.
    pub fn is_complete(&self) -> bool {
        !self.prefix.is_empty() && !self.name.is_empty() && !self.storage.is_empty()
    }

    /// Prefix and name both stay below a storage root.
    pub fn is_contained(&self) -> bool {
        is_contained_path(&self.prefix) && is_contained_path(&self.name)
    }
}

impl fmt::Display for ServiceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage, self.template_path())
    }
}

/// Copy of a service directory back into a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeployment {
    pub template: ServiceTemplate,
    /// Top-level names to skip; directories carry a trailing `/`.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Full configuration of one service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    pub service_id: ServiceId,
    pub runtime: String,
    pub auto_delete_on_stop: bool,
    pub static_service: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub includes: Vec<ServiceRemoteInclusion>,
    #[serde(default)]
    pub templates: Vec<ServiceTemplate>,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
    pub process_config: ProcessConfiguration,
    pub port: u16,
}

/// Named recipe for creating services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTask {
    pub name: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub auto_delete_on_stop: bool,
    #[serde(default)]
    pub static_services: bool,
    /// Nodes allowed to run this task. Empty means every node.
    #[serde(default)]
    pub associated_nodes: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub includes: Vec<ServiceRemoteInclusion>,
    #[serde(default)]
    pub templates: Vec<ServiceTemplate>,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
    pub process_configuration: ProcessConfiguration,
    pub start_port: u16,
    #[serde(default)]
    pub min_service_count: u32,
}

fn default_runtime() -> String {
    "jvm".to_string()
}

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceLifeCycle {
    Defined,
    Prepared,
    Running,
    Stopped,
    Deleted,
}

impl ServiceLifeCycle {
    /// Whether moving from `self` to `next` is a permitted edge.
    pub fn can_transition_to(&self, next: ServiceLifeCycle) -> bool {
        use ServiceLifeCycle::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Defined, Prepared) => true,
            (Prepared, Running) | (Stopped, Running) => true,
            (Running, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceLifeCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Defined => "DEFINED",
            Self::Prepared => "PREPARED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Runtime figures reported by the wrapper. `-1` until reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub heap_usage_memory: i64,
    pub no_heap_usage_memory: i64,
    pub max_heap_memory: i64,
    pub current_loaded_class_count: i64,
    pub total_loaded_class_count: i64,
    pub unloaded_class_count: i64,
    pub cpu_usage: f64,
    pub thread_count: i64,
    pub pid: i64,
}

impl ProcessSnapshot {
    pub fn empty() -> Self {
        Self {
            heap_usage_memory: -1,
            no_heap_usage_memory: -1,
            max_heap_memory: -1,
            current_loaded_class_count: -1,
            total_loaded_class_count: -1,
            unloaded_class_count: -1,
            cpu_usage: -1.0,
            thread_count: -1,
            pid: -1,
        }
    }
}

impl Default for ProcessSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Immutable view of a service at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfoSnapshot {
    /// Milliseconds since the epoch.
    pub creation_time: i64,
    pub service_id: ServiceId,
    pub address: HostAndPort,
    pub connected: bool,
    pub life_cycle: ServiceLifeCycle,
    pub process_snapshot: ProcessSnapshot,
    pub configuration: ServiceConfiguration,
}

impl ServiceInfoSnapshot {
    pub fn name(&self) -> String {
        self.service_id.name()
    }
}

/// A cluster member and the addresses it listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkClusterNode {
    pub unique_id: String,
    #[serde(default)]
    pub listeners: Vec<HostAndPort>,
}

impl NetworkClusterNode {
    pub fn new(unique_id: impl Into<String>, listeners: Vec<HostAndPort>) -> Self {
        Self {
            unique_id: unique_id.into(),
            listeners,
        }
    }
}

/// Resource figures of a node, published to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkClusterNodeInfoSnapshot {
    pub creation_time: i64,
    pub node: NetworkClusterNode,
    pub current_services_count: usize,
    /// MiB of heap used by running services.
    pub used_memory: u64,
    /// MiB of heap reserved by all local services.
    pub reserved_memory: u64,
    pub max_memory: u64,
    pub system_cpu_usage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_id() -> ServiceId {
        ServiceId {
            unique_id: Uuid::nil(),
            task_name: "Lobby".into(),
            task_service_id: 3,
            node_unique_id: "Node-1".into(),
        }
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_id().name(), "Lobby-3");
    }

    #[test]
    fn test_service_id_json_is_camel_case() {
        let value = serde_json::to_value(service_id()).unwrap();
        assert_eq!(value["taskName"], json!("Lobby"));
        assert_eq!(value["taskServiceId"], json!(3));
        assert_eq!(value["nodeUniqueId"], json!("Node-1"));
    }

    #[test]
    fn test_environment_json_names() {
        assert_eq!(
            serde_json::to_value(ServiceEnvironmentType::MinecraftServer).unwrap(),
            json!("MINECRAFT_SERVER")
        );
        assert_eq!(
            serde_json::from_value::<ServiceEnvironmentType>(json!("PROX_PROX")).unwrap(),
            ServiceEnvironmentType::ProxProx
        );
    }

    #[test]
    fn test_life_cycle_edges() {
        use ServiceLifeCycle::*;
        assert!(Defined.can_transition_to(Prepared));
        assert!(Prepared.can_transition_to(Running));
        assert!(Stopped.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Deleted));
        assert!(Defined.can_transition_to(Deleted));

        assert!(!Defined.can_transition_to(Running));
        assert!(!Prepared.can_transition_to(Stopped));
        assert!(!Deleted.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Running));
    }

    #[test]
    fn test_host_and_port_parse() {
        let parsed: HostAndPort = "10.0.0.2:1410".parse().unwrap();
        assert_eq!(parsed, HostAndPort::new("10.0.0.2", 1410));
        assert_eq!(parsed.to_string(), "10.0.0.2:1410");

        assert!("10.0.0.2".parse::<HostAndPort>().is_err());
        assert!(":1410".parse::<HostAndPort>().is_err());
        assert!("host:99999".parse::<HostAndPort>().is_err());
    }

    #[test]
    fn test_template_helpers() {
        let template = ServiceTemplate::new("Lobby", "default", "local");
        assert_eq!(template.template_path(), "Lobby/default");
        assert_eq!(template.to_string(), "local:Lobby/default");
        assert!(template.is_complete());
        assert!(!ServiceTemplate::new("Lobby", "", "local").is_complete());
    }

    #[test]
    fn test_contained_paths() {
        assert!(is_contained_path("plugins/hub.jar"));
        assert!(is_contained_path("./server.jar"));
        assert!(!is_contained_path(""));
        assert!(!is_contained_path("."));
        assert!(!is_contained_path("/etc/passwd"));
        assert!(!is_contained_path("../outside.jar"));
        assert!(!is_contained_path("plugins/../../outside.jar"));
        assert!(!ServiceTemplate::new("Lobby", "..", "local").is_contained());
        assert!(ServiceTemplate::new("Lobby", "default", "local").is_contained());
    }

    #[test]
    fn test_inclusion_http_headers() {
        let mut inclusion = ServiceRemoteInclusion::new("https://example.org/a.jar", "plugins/a.jar");
        assert!(inclusion.http_headers().is_empty());

        inclusion.properties.insert(
            "httpHeaders".into(),
            json!({ "Authorization": "Bearer x", "X-Retry": 2 }),
        );
        let mut headers = inclusion.http_headers();
        headers.sort();
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_string(), "Bearer x".to_string()),
                ("X-Retry".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_task_defaults_from_json() {
        let task: ServiceTask = serde_json::from_value(json!({
            "name": "Lobby",
            "processConfiguration": {
                "environment": "MINECRAFT_SERVER",
                "maxHeapMemorySize": 512
            },
            "startPort": 44955
        }))
        .unwrap();
        assert_eq!(task.runtime, "jvm");
        assert!(task.templates.is_empty());
        assert!(task.process_configuration.jvm_options.is_empty());
        assert_eq!(task.start_port, 44955);
    }
}
