// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for cloudfleet-node integration tests.
//!
//! Provides TestContext: a node rooted in a temp directory, driven by the
//! mock process launcher.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use cloudfleet_node::config::{NodeConfig, StartRetryPolicy};
use cloudfleet_node::hooks::ServiceEventHooks;
use cloudfleet_node::model::{ServiceInfoSnapshot, ServiceTask, ServiceTemplate};
use cloudfleet_node::node::Node;
use cloudfleet_node::process::MockProcessLauncher;
use cloudfleet_node::resources::FixedProbe;

/// A node with its own directories and a mock launcher.
pub struct TestContext {
    pub node: Arc<Node>,
    pub launcher: Arc<MockProcessLauncher>,
    pub root: PathBuf,
    _temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::build(MockProcessLauncher::new(), Vec::new(), |_| {})
    }

    pub fn with_launcher(launcher: MockProcessLauncher) -> Self {
        Self::build(launcher, Vec::new(), |_| {})
    }

    pub fn with_hooks(hooks: Arc<dyn ServiceEventHooks>) -> Self {
        Self::build(MockProcessLauncher::new(), vec![hooks], |_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut NodeConfig)) -> Self {
        Self::build(MockProcessLauncher::new(), Vec::new(), configure)
    }

    pub fn build(
        launcher: MockProcessLauncher,
        hooks: Vec<Arc<dyn ServiceEventHooks>>,
        configure: impl FnOnce(&mut NodeConfig),
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = test_config(&root);
        configure(&mut config);

        let launcher = Arc::new(launcher);
        let mut builder = Node::builder()
            .config(config)
            .launcher(launcher.clone())
            .resource_probe(Arc::new(FixedProbe(0.0)));
        for subscriber in hooks {
            builder = builder.hooks(subscriber);
        }
        let node = builder.build().expect("Failed to build node");

        Self {
            node,
            launcher,
            root,
            _temp_dir: temp_dir,
        }
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.node.config().templates_dir.clone()
    }

    /// Create files under the local template `prefix/name`.
    pub fn write_template(&self, template: &ServiceTemplate, files: &[(&str, &str)]) {
        let dir = self
            .templates_dir()
            .join(&template.prefix)
            .join(&template.name);
        for (name, content) in files {
            let path = dir.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }
}

/// Configuration with short timeouts and every directory under `root`.
pub fn test_config(root: &Path) -> NodeConfig {
    NodeConfig {
        node_id: "Node-1".to_string(),
        listeners: Vec::new(),
        max_memory: 4096,
        max_cpu_usage_to_start_services: 100.0,
        start_retry: StartRetryPolicy {
            enabled: false,
            ..StartRetryPolicy::default()
        },
        temp_dir: root.join("temp"),
        services_dir: root.join("services"),
        templates_dir: root.join("templates"),
        wrapper_jar: root.join("wrapper.jar"),
        stop_grace_period: Duration::from_millis(10),
        stop_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_secs(1),
        ..NodeConfig::default()
    }
}

/// A Minecraft server task named `name` with `heap` MiB.
pub fn task(name: &str, heap: u32) -> ServiceTask {
    serde_json::from_value(json!({
        "name": name,
        "processConfiguration": {
            "environment": "MINECRAFT_SERVER",
            "maxHeapMemorySize": heap
        },
        "startPort": 44955
    }))
    .expect("valid task")
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Records hook invocations and vetoes what it is told to.
#[derive(Default)]
pub struct RecordingHooks {
    pub events: Mutex<Vec<String>>,
    pub veto_templates: bool,
    pub veto_inclusions: bool,
    pub veto_deployments: bool,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }
}

impl ServiceEventHooks for RecordingHooks {
    fn pre_prepare(&self, _service: &ServiceInfoSnapshot) {
        self.record("pre_prepare");
    }
    fn post_prepare(&self, _service: &ServiceInfoSnapshot) {
        self.record("post_prepare");
    }
    fn pre_start_prepare(&self, _service: &ServiceInfoSnapshot) {
        self.record("pre_start_prepare");
    }
    fn post_start_prepare(&self, _service: &ServiceInfoSnapshot) {
        self.record("post_start_prepare");
    }
    fn pre_start(&self, _service: &ServiceInfoSnapshot) {
        self.record("pre_start");
    }
    fn post_start(&self, _service: &ServiceInfoSnapshot) {
        self.record("post_start");
    }
    fn pre_stop(&self, _service: &ServiceInfoSnapshot) {
        self.record("pre_stop");
    }
    fn post_stop(&self, _service: &ServiceInfoSnapshot, exit_code: i32) {
        self.record(format!("post_stop:{}", exit_code));
    }
    fn pre_delete(&self, _service: &ServiceInfoSnapshot) {
        self.record("pre_delete");
    }
    fn post_delete(&self, _service: &ServiceInfoSnapshot) {
        self.record("post_delete");
    }
    fn allow_inclusion(
        &self,
        _service: &ServiceInfoSnapshot,
        _inclusion: &cloudfleet_node::model::ServiceRemoteInclusion,
    ) -> bool {
        !self.veto_inclusions
    }
    fn allow_template(&self, _service: &ServiceInfoSnapshot, _template: &ServiceTemplate) -> bool {
        !self.veto_templates
    }
    fn allow_deployment(
        &self,
        _service: &ServiceInfoSnapshot,
        _deployment: &cloudfleet_node::model::ServiceDeployment,
    ) -> bool {
        !self.veto_deployments
    }
}
