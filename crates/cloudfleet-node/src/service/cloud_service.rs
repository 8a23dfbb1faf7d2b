// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle of one service process.
//!
//! ```text
//! DEFINED ──prepare──► PREPARED ──start──► RUNNING ──stop/kill──► STOPPED
//!                                            ▲                      │
//!                                            └────────start─────────┘
//!             any state ──delete──► DELETED (terminal)
//! ```
//!
//! Public lifecycle operations take the per-service lifecycle lock; the
//! internal `start0`/`stop0`/`delete0` steps never take it again. Short-lived
//! state lives behind a std mutex that is never held across an await.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use cloudfleet_protocol::NetworkChannel;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::environment::{self, Binding};
use super::handoff::{self, HandoffDocument, WRAPPER_DIR};
use super::log_cache::{ConsoleLogCache, LogEntrySink};
use super::staging;
use crate::cluster::packets::ServiceInfoUpdateType;
use crate::error::{Error, Result};
use crate::model::{
    HostAndPort, ProcessSnapshot, ServiceConfiguration, ServiceDeployment, ServiceId,
    ServiceInfoSnapshot, ServiceLifeCycle, ServiceRemoteInclusion, ServiceTemplate,
    is_contained_path,
};
use crate::node::{AdmissionDenied, Node};
use crate::process::{LaunchSpec, ServiceProcess};

const CONNECTION_KEY_LENGTH: usize = 256;

/// How often a running process is checked for an unexpected exit.
const PROCESS_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a start request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// The process was spawned and the service is RUNNING.
    Started,
    /// The service was not PREPARED or STOPPED.
    NotStartable(ServiceLifeCycle),
    /// Admission control refused; another attempt is scheduled.
    Deferred { attempt: u32, delay: Duration },
    /// Admission control refused and no retry is left.
    Rejected,
}

struct ServiceState {
    life_cycle: ServiceLifeCycle,
    configuration: ServiceConfiguration,
    current: ServiceInfoSnapshot,
    previous: ServiceInfoSnapshot,
    waiting_includes: Vec<ServiceRemoteInclusion>,
    waiting_templates: Vec<ServiceTemplate>,
    includes: Vec<ServiceRemoteInclusion>,
    templates: Vec<ServiceTemplate>,
    deployments: Vec<ServiceDeployment>,
    pid: Option<u32>,
    start_attempts: u32,
}

/// A service process managed by this node.
pub struct CloudService {
    node: Arc<Node>,
    service_id: ServiceId,
    directory: PathBuf,
    connection_key: String,
    lifecycle_lock: tokio::sync::Mutex<()>,
    state: Mutex<ServiceState>,
    process: tokio::sync::Mutex<Option<Box<dyn ServiceProcess>>>,
    log_cache: Arc<ConsoleLogCache>,
    restarting: AtomicBool,
    /// Bumped on every spawn; a watcher only acts for its own process.
    process_generation: AtomicU64,
    network_channel: RwLock<Option<Arc<dyn NetworkChannel>>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn random_connection_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONNECTION_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Working directory of a service.
pub fn service_directory(node: &Node, service_id: &ServiceId, static_service: bool) -> PathBuf {
    let config = node.config();
    if static_service {
        config.services_dir.join(service_id.name())
    } else {
        config
            .temp_dir
            .join("services")
            .join(format!("{}#{}", service_id.name(), service_id.unique_id))
    }
}

impl CloudService {
    /// Create the service directory, register the service and prepare it.
    pub(crate) async fn create(
        node: Arc<Node>,
        configuration: ServiceConfiguration,
    ) -> Result<Arc<Self>> {
        let service_id = configuration.service_id.clone();
        let name = service_id.name();
        if !is_contained_path(&name) || name.contains(['/', '\\']) {
            return Err(Error::Other(format!("invalid service name: {}", name)));
        }
        let directory = service_directory(&node, &service_id, configuration.static_service);
        tokio::fs::create_dir_all(&directory).await?;

        let sink: Arc<dyn LogEntrySink> = node.clone();
        let log_cache = Arc::new(ConsoleLogCache::new(
            service_id.clone(),
            node.config().max_service_console_log_cache_size,
            node.config().print_error_stream_lines_from_services,
            Some(sink),
        ));

        let defined = ServiceInfoSnapshot {
            creation_time: now_millis(),
            service_id: service_id.clone(),
            address: HostAndPort::new(node.config().host_address.clone(), configuration.port),
            connected: false,
            life_cycle: ServiceLifeCycle::Defined,
            process_snapshot: ProcessSnapshot::empty(),
            configuration: configuration.clone(),
        };

        let state = ServiceState {
            life_cycle: ServiceLifeCycle::Defined,
            waiting_includes: configuration.includes.clone(),
            waiting_templates: configuration.templates.clone(),
            includes: Vec::new(),
            templates: Vec::new(),
            deployments: configuration.deployments.clone(),
            configuration,
            current: defined.clone(),
            previous: defined,
            pid: None,
            start_attempts: 0,
        };

        let service = Arc::new(Self {
            node: node.clone(),
            service_id,
            directory,
            connection_key: random_connection_key(),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
            process: tokio::sync::Mutex::new(None),
            log_cache,
            restarting: AtomicBool::new(false),
            process_generation: AtomicU64::new(0),
            network_channel: RwLock::new(None),
        });

        node.manager().register_local(service.clone());
        if let Err(e) = service.prepare().await {
            node.manager().unregister_local(&service.unique_id());
            return Err(e);
        }
        Ok(service)
    }

    pub fn unique_id(&self) -> Uuid {
        self.service_id.unique_id
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn name(&self) -> String {
        self.service_id.name()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn connection_key(&self) -> &str {
        &self.connection_key
    }

    pub fn life_cycle(&self) -> ServiceLifeCycle {
        self.lock_state().life_cycle
    }

    pub fn configuration(&self) -> ServiceConfiguration {
        self.lock_state().configuration.clone()
    }

    pub fn snapshot(&self) -> ServiceInfoSnapshot {
        self.lock_state().current.clone()
    }

    pub fn previous_snapshot(&self) -> ServiceInfoSnapshot {
        self.lock_state().previous.clone()
    }

    pub fn installed_templates(&self) -> Vec<ServiceTemplate> {
        self.lock_state().templates.clone()
    }

    pub fn installed_inclusions(&self) -> Vec<ServiceRemoteInclusion> {
        self.lock_state().includes.clone()
    }

    pub fn waiting_templates(&self) -> Vec<ServiceTemplate> {
        self.lock_state().waiting_templates.clone()
    }

    pub fn waiting_inclusions(&self) -> Vec<ServiceRemoteInclusion> {
        self.lock_state().waiting_includes.clone()
    }

    pub fn pending_deployments(&self) -> Vec<ServiceDeployment> {
        self.lock_state().deployments.clone()
    }

    pub fn log_cache(&self) -> &Arc<ConsoleLogCache> {
        &self.log_cache
    }

    pub fn cached_log_lines(&self) -> Vec<String> {
        self.log_cache.cached_lines()
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    /// Attach the wrapper's back-channel and publish the connected snapshot.
    pub fn set_network_channel(&self, channel: Arc<dyn NetworkChannel>) {
        *self
            .network_channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(channel);
        let snapshot = self.refresh_snapshot();
        self.publish(ServiceInfoUpdateType::Update, &snapshot);
    }

    /// Detach the back-channel if it is the one with `channel_id`.
    pub fn clear_network_channel(&self, channel_id: u64) -> bool {
        {
            let mut guard = self
                .network_channel
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if !guard.as_ref().is_some_and(|c| c.id() == channel_id) {
                return false;
            }
            *guard = None;
        }
        if self.life_cycle() != ServiceLifeCycle::Deleted {
            let snapshot = self.refresh_snapshot();
            self.publish(ServiceInfoUpdateType::Update, &snapshot);
        }
        true
    }

    /// True if the attached back-channel has `channel_id`.
    pub fn has_network_channel(&self, channel_id: u64) -> bool {
        self.network_channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| c.id() == channel_id)
    }

    pub fn network_channel(&self) -> Option<Arc<dyn NetworkChannel>> {
        self.network_channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True while DEFINED or PREPARED, or RUNNING with a live process.
    pub async fn is_alive(&self) -> bool {
        match self.life_cycle() {
            ServiceLifeCycle::Defined | ServiceLifeCycle::Prepared => true,
            ServiceLifeCycle::Running => self
                .process
                .lock()
                .await
                .as_mut()
                .is_some_and(|process| process.is_alive()),
            _ => false,
        }
    }

    /// Write `command_line` to the process's stdin. Only while RUNNING.
    pub async fn run_command(&self, command_line: &str) -> bool {
        if self.life_cycle() != ServiceLifeCycle::Running {
            return false;
        }
        let mut process = self.process.lock().await;
        let Some(process) = process.as_mut() else {
            return false;
        };
        match process.write_line(command_line).await {
            Ok(()) => true,
            Err(e) => {
                debug!(service = %self.name(), error = %e, "Could not write command");
                false
            }
        }
    }

    /// Queue a template for the next start.
    pub fn add_template(&self, template: ServiceTemplate) -> ServiceInfoSnapshot {
        self.lock_state().waiting_templates.push(template);
        self.snapshot()
    }

    /// Queue an inclusion for the next start.
    pub fn add_inclusion(&self, inclusion: ServiceRemoteInclusion) -> ServiceInfoSnapshot {
        self.lock_state().waiting_includes.push(inclusion);
        self.snapshot()
    }

    /// Queue a deployment for the next stop or delete.
    pub fn add_deployment(&self, deployment: ServiceDeployment) -> ServiceInfoSnapshot {
        self.lock_state().deployments.push(deployment);
        self.snapshot()
    }

    /// Stage every waiting inclusion now.
    pub async fn include_waiting_inclusions(&self) {
        let (waiting, snapshot) = {
            let mut state = self.lock_state();
            (std::mem::take(&mut state.waiting_includes), state.current.clone())
        };
        let resolved =
            staging::include_inclusions(&self.node, &snapshot, &self.directory, waiting).await;
        self.lock_state().includes.extend(resolved);
    }

    /// Copy every waiting template now.
    pub async fn include_waiting_templates(&self) {
        let (waiting, snapshot) = {
            let mut state = self.lock_state();
            (std::mem::take(&mut state.waiting_templates), state.current.clone())
        };
        let resolved =
            staging::include_templates(&self.node, &snapshot, &self.directory, waiting).await;
        self.lock_state().templates.extend(resolved);
    }

    /// Run every pending deployment now.
    pub async fn deploy_resources(&self) {
        let (pending, snapshot) = {
            let mut state = self.lock_state();
            (std::mem::take(&mut state.deployments), state.current.clone())
        };
        let remaining =
            staging::deploy_resources(&self.node, &snapshot, &self.directory, pending).await;
        let mut state = self.lock_state();
        let added_meanwhile = std::mem::take(&mut state.deployments);
        state.deployments = remaining;
        state.deployments.extend(added_meanwhile);
    }

    /// Move to `life_cycle` through the matching lifecycle operation.
    pub async fn set_life_cycle(self: &Arc<Self>, life_cycle: ServiceLifeCycle) -> Result<()> {
        match life_cycle {
            ServiceLifeCycle::Running => {
                self.start().await?;
            }
            ServiceLifeCycle::Stopped => {
                self.stop().await;
            }
            ServiceLifeCycle::Deleted => self.delete().await,
            other => debug!(service = %self.name(), life_cycle = %other, "Ignoring life cycle request"),
        }
        Ok(())
    }

    /// Start the process (PREPARED or STOPPED → RUNNING).
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome> {
        let _lifecycle = self.lifecycle_lock.lock().await;
        if self.node.config().parallel_service_start_sequence {
            self.start0().await
        } else {
            let _sequence = self.node.start_sequence().lock().await;
            self.start0().await
        }
    }

    /// Graceful stop. Returns the exit code, `-1` if unknown or not running.
    pub async fn stop(&self) -> i32 {
        let exit_code = {
            let _lifecycle = self.lifecycle_lock.lock().await;
            self.stop0(false).await
        };
        self.auto_delete_unless_restarting().await;
        exit_code
    }

    /// Forced stop. Returns the exit code, `-1` if unknown or not running.
    pub async fn kill(&self) -> i32 {
        let exit_code = {
            let _lifecycle = self.lifecycle_lock.lock().await;
            self.stop0(true).await
        };
        self.auto_delete_unless_restarting().await;
        exit_code
    }

    /// Stop then start, without triggering auto-delete.
    pub async fn restart(self: &Arc<Self>) -> Result<StartOutcome> {
        self.restarting.store(true, Ordering::SeqCst);
        self.stop().await;
        let outcome = self.start().await;
        self.restarting.store(false, Ordering::SeqCst);
        outcome
    }

    /// Delete the service. Repeated calls do nothing.
    pub async fn delete(&self) {
        let _lifecycle = self.lifecycle_lock.lock().await;
        self.delete0().await;
    }

    async fn prepare(&self) -> Result<()> {
        if self.life_cycle() != ServiceLifeCycle::Defined {
            return Ok(());
        }

        let snapshot = self.snapshot();
        info!(service = %self.name(), unique_id = %self.unique_id(), "Preparing service");
        self.node.hooks().each(|h| h.pre_prepare(&snapshot));

        tokio::fs::create_dir_all(self.directory.join(WRAPPER_DIR)).await?;
        if self.node.config().ssl.enabled {
            self.copy_ssl_material().await;
        }

        let snapshot = self.transition(ServiceLifeCycle::Prepared);
        self.node.hooks().each(|h| h.post_prepare(&snapshot));
        self.publish(ServiceInfoUpdateType::Register, &snapshot);
        info!(service = %self.name(), unique_id = %self.unique_id(), "Service prepared");
        Ok(())
    }

    async fn copy_ssl_material(&self) {
        let ssl = &self.node.config().ssl;
        let wrapper_dir = self.directory.join(WRAPPER_DIR);
        let files = [
            (&ssl.certificate_path, "certificate"),
            (&ssl.private_key_path, "privateKey"),
            (&ssl.trust_certificate_path, "trustCertificate"),
        ];
        for (source, name) in files {
            let Some(source) = source else { continue };
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                continue;
            }
            if let Err(e) = tokio::fs::copy(source, wrapper_dir.join(name)).await {
                warn!(service = %self.name(), file = name, error = %e, "Failed to copy TLS material");
            }
        }
    }

    async fn start0(self: &Arc<Self>) -> Result<StartOutcome> {
        let life_cycle = self.life_cycle();
        if !matches!(life_cycle, ServiceLifeCycle::Prepared | ServiceLifeCycle::Stopped) {
            return Ok(StartOutcome::NotStartable(life_cycle));
        }

        let heap = self.configuration().process_config.max_heap_memory_size;
        if let Err(denied) = self.node.check_admission(heap) {
            return Ok(self.defer_start(denied));
        }
        self.lock_state().start_attempts = 0;

        let snapshot = self.snapshot();
        info!(service = %self.name(), task = %self.service_id.task_name, "Preparing service start");
        self.node.hooks().each(|h| h.pre_start_prepare(&snapshot));

        self.include_waiting_inclusions().await;
        self.include_waiting_templates().await;

        let configuration = {
            let mut state = self.lock_state();
            state.configuration = ServiceConfiguration {
                includes: state.includes.clone(),
                templates: state.templates.clone(),
                deployments: state.deployments.clone(),
                ..state.configuration.clone()
            };
            state.configuration.clone()
        };
        let snapshot = self.refresh_snapshot();
        self.node.manager().publish_snapshot(snapshot.clone());

        let node_config = self.node.config();
        handoff::write(
            &self.directory,
            &HandoffDocument {
                connection_key: &self.connection_key,
                listener: handoff::choose_listener(&node_config.listeners),
                service_configuration: &configuration,
                service_info_snapshot: &snapshot,
                ssl_config: &node_config.ssl,
            },
        )
        .await?;

        self.node.hooks().each(|h| h.post_start_prepare(&snapshot));
        info!(service = %self.name(), task = %self.service_id.task_name, "Starting service");
        self.node.hooks().each(|h| h.pre_start(&snapshot));

        let service_name = self.name();
        environment::configure(
            &self.directory,
            configuration.process_config.environment,
            &Binding {
                host: &node_config.host_address,
                port: configuration.port,
                service_name: &service_name,
            },
        )
        .await?;

        let spec = self.launch_spec(&configuration).await;
        let mut process = self.node.launcher().spawn(&spec).await?;
        self.log_cache.attach(process.take_output());
        let pid = process.pid();
        *self.process.lock().await = Some(process);
        self.lock_state().pid = pid;
        let generation = self.process_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let snapshot = self.transition(ServiceLifeCycle::Running);
        self.node.hooks().each(|h| h.post_start(&snapshot));
        self.publish(ServiceInfoUpdateType::Started, &snapshot);
        info!(service = %self.name(), pid = ?pid, "Service started");

        self.watch_process(generation);
        Ok(StartOutcome::Started)
    }

    /// Poll the process spawned as `generation` and run the stop path once it
    /// exits on its own.
    fn watch_process(self: &Arc<Self>, generation: u64) {
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROCESS_WATCH_INTERVAL).await;
                let Some(service) = service.upgrade() else {
                    return;
                };
                if service.process_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match service.process.lock().await.as_mut() {
                    None => return,
                    Some(process) => {
                        if process.is_alive() {
                            continue;
                        }
                    }
                }
                service.handle_process_exit(generation).await;
                return;
            }
        });
    }

    async fn handle_process_exit(&self, generation: u64) {
        let exit_code = {
            let _lifecycle = self.lifecycle_lock.lock().await;
            // An explicit stop, kill or restart got here first.
            if self.process_generation.load(Ordering::SeqCst) != generation
                || self.life_cycle() != ServiceLifeCycle::Running
            {
                return;
            }
            warn!(service = %self.name(), "Service process exited unexpectedly");
            self.stop0(false).await
        };
        debug!(service = %self.name(), exit_code, "Exited service stopped");
        self.auto_delete_unless_restarting().await;
    }

    fn defer_start(self: &Arc<Self>, denied: AdmissionDenied) -> StartOutcome {
        let attempt = {
            let mut state = self.lock_state();
            state.start_attempts += 1;
            state.start_attempts
        };

        let policy = &self.node.config().start_retry;
        if !policy.allows(attempt) {
            warn!(service = %self.name(), reason = %denied, "Service start rejected");
            self.lock_state().start_attempts = 0;
            return StartOutcome::Rejected;
        }

        let delay = policy.delay_for(attempt);
        warn!(
            service = %self.name(),
            reason = %denied,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Service start rejected, retrying later"
        );

        let service = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = service.start().await {
                warn!(service = %service.name(), error = %e, "Deferred service start failed");
            }
        });
        StartOutcome::Deferred { attempt, delay }
    }

    async fn launch_spec(&self, configuration: &ServiceConfiguration) -> LaunchSpec {
        let node_config = self.node.config();
        let wrapper_jar = environment::absolute_wrapper_path(node_config);

        let jar = wrapper_jar.clone();
        let main_class = tokio::task::spawn_blocking(move || environment::read_main_class(&jar))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| node_config.wrapper_main_class.clone());

        LaunchSpec {
            service_name: self.name(),
            program: node_config.jvm_command.clone(),
            args: environment::jvm_arguments(
                node_config,
                &configuration.process_config,
                &wrapper_jar,
                &main_class,
            ),
            working_dir: self.directory.clone(),
            env: HashMap::new(),
        }
    }

    async fn stop0(&self, force: bool) -> i32 {
        if self.life_cycle() != ServiceLifeCycle::Running {
            return -1;
        }

        let snapshot = self.snapshot();
        info!(service = %self.name(), force, "Stopping service");
        self.node.hooks().each(|h| h.pre_stop(&snapshot));

        let exit_code = self.stop_process(force).await;

        let channel = self
            .network_channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.close();
        }

        self.lock_state().pid = None;
        let snapshot = self.transition(ServiceLifeCycle::Stopped);
        self.node.hooks().each(|h| h.post_stop(&snapshot, exit_code));
        info!(service = %self.name(), exit_code, "Service stopped");
        self.publish(ServiceInfoUpdateType::Stopped, &snapshot);
        exit_code
    }

    async fn stop_process(&self, force: bool) -> i32 {
        let Some(mut process) = self.process.lock().await.take() else {
            return -1;
        };
        let config = self.node.config();

        if !process.is_alive() {
            return process.wait_for_exit(config.stop_timeout).await.unwrap_or(-1);
        }

        for line in ["stop", "end"] {
            if let Err(e) = process.write_line(line).await {
                debug!(service = %self.name(), error = %e, "Could not send stop command");
            }
        }
        tokio::time::sleep(config.stop_grace_period).await;

        let signalled = if force {
            process.kill().await
        } else {
            process.terminate().await
        };
        if let Err(e) = signalled {
            debug!(service = %self.name(), error = %e, "Signal failed");
        }

        if let Some(code) = process.wait_for_exit(config.stop_timeout).await {
            return code;
        }

        warn!(service = %self.name(), "Process did not exit, killing");
        if let Err(e) = process.kill().await {
            debug!(service = %self.name(), error = %e, "Kill failed");
        }
        process.wait_for_exit(config.stop_timeout).await.unwrap_or(-1)
    }

    async fn auto_delete_unless_restarting(&self) {
        let auto_delete = self.lock_state().configuration.auto_delete_on_stop;
        if auto_delete && !self.is_restarting() {
            self.delete().await;
        }
    }

    async fn delete0(&self) {
        let life_cycle = self.life_cycle();
        if life_cycle == ServiceLifeCycle::Deleted {
            return;
        }
        if life_cycle == ServiceLifeCycle::Running {
            self.stop0(true).await;
        }

        let snapshot = self.snapshot();
        info!(service = %self.name(), unique_id = %self.unique_id(), "Deleting service");
        self.node.hooks().each(|h| h.pre_delete(&snapshot));

        self.deploy_resources().await;

        let is_static = self.lock_state().configuration.static_service;
        if !is_static {
            if let Err(e) = tokio::fs::remove_dir_all(&self.directory).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(service = %self.name(), error = %e, "Failed to remove service directory");
                }
            }
        }

        let snapshot = self.transition(ServiceLifeCycle::Deleted);
        self.node.manager().unregister_local(&self.unique_id());
        self.node.manager().remove_snapshot(&self.unique_id());

        self.node.hooks().each(|h| h.post_delete(&snapshot));
        info!(service = %self.name(), unique_id = %self.unique_id(), "Service deleted");

        self.node.publish_node_info();
        self.node
            .publish_service_info(ServiceInfoUpdateType::Unregister, &snapshot);
    }

    /// Change the life cycle and rotate snapshots.
    fn transition(&self, life_cycle: ServiceLifeCycle) -> ServiceInfoSnapshot {
        let connected = self.is_channel_connected();
        let mut state = self.lock_state();
        debug_assert!(state.life_cycle.can_transition_to(life_cycle));
        state.life_cycle = life_cycle;
        self.rotate_snapshot(&mut state, connected)
    }

    /// Rebuild the current snapshot without changing the life cycle.
    fn refresh_snapshot(&self) -> ServiceInfoSnapshot {
        let connected = self.is_channel_connected();
        let mut state = self.lock_state();
        self.rotate_snapshot(&mut state, connected)
    }

    fn rotate_snapshot(&self, state: &mut ServiceState, connected: bool) -> ServiceInfoSnapshot {
        let creation_time = now_millis().max(state.current.creation_time + 1);
        let mut process_snapshot = ProcessSnapshot::empty();
        if let Some(pid) = state.pid {
            process_snapshot.pid = i64::from(pid);
        }

        let snapshot = ServiceInfoSnapshot {
            creation_time,
            service_id: self.service_id.clone(),
            address: HostAndPort::new(
                self.node.config().host_address.clone(),
                state.configuration.port,
            ),
            connected,
            life_cycle: state.life_cycle,
            process_snapshot,
            configuration: state.configuration.clone(),
        };
        state.previous = std::mem::replace(&mut state.current, snapshot.clone());
        snapshot
    }

    fn is_channel_connected(&self) -> bool {
        self.network_channel().is_some_and(|c| c.is_connected())
    }

    fn publish(&self, kind: ServiceInfoUpdateType, snapshot: &ServiceInfoSnapshot) {
        self.node.manager().publish_snapshot(snapshot.clone());
        self.node.publish_service_info(kind, snapshot);
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
