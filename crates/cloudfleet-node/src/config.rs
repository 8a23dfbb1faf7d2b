// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for cloudfleet-node.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::model::{HostAndPort, NetworkClusterNode};

/// Bounded exponential backoff for starts rejected by admission control.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRetryPolicy {
    /// Reschedule rejected starts automatically.
    pub enabled: bool,
    /// Retries after the first rejection before giving up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl StartRetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Whether retry number `attempt` (1-based) may still be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt <= self.max_attempts
    }
}

impl Default for StartRetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// TLS material handed to services through the wrapper document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    pub enabled: bool,
    pub client_auth: bool,
    pub certificate_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub trust_certificate_path: Option<PathBuf>,
}

/// Node configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique id of this node in the cluster
    pub node_id: String,
    /// Addresses this node accepts connections on
    pub listeners: Vec<HostAndPort>,
    /// Other cluster members
    pub cluster_peers: Vec<NetworkClusterNode>,
    /// Address announced to services and players
    pub host_address: String,
    /// Heap budget for all services in MiB
    pub max_memory: u64,
    /// System CPU usage (percent) at or above which starts are rejected
    pub max_cpu_usage_to_start_services: f64,
    /// Allow starts to run concurrently instead of one at a time
    pub parallel_service_start_sequence: bool,
    pub start_retry: StartRetryPolicy,
    /// Lines kept per service console
    pub max_service_console_log_cache_size: usize,
    /// Largest amount accepted by one batch creation request
    pub max_services_per_request: u32,
    /// Echo stderr lines of services into the node log
    pub print_error_stream_lines_from_services: bool,
    /// Prepend the default JVM tuning flags
    pub default_jvm_options_parameters: bool,
    /// Executable used to launch services
    pub jvm_command: String,
    pub temp_dir: PathBuf,
    /// Directory of static services
    pub services_dir: PathBuf,
    /// Root of the local template storage
    pub templates_dir: PathBuf,
    /// Wrapper jar injected into every service
    pub wrapper_jar: PathBuf,
    /// Main class used when the wrapper manifest has none
    pub wrapper_main_class: String,
    /// Classpath entries the wrapper depends on
    pub driver_classpath: String,
    /// Wait between stop commands and process termination
    pub stop_grace_period: Duration,
    /// Wait for the process to exit after termination
    pub stop_timeout: Duration,
    /// Timeout of one cluster request
    pub request_timeout: Duration,
    pub ssl: SslConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "Node-1".to_string(),
            listeners: vec![HostAndPort::new("127.0.0.1", 1410)],
            cluster_peers: Vec::new(),
            host_address: "127.0.0.1".to_string(),
            max_memory: 2048,
            max_cpu_usage_to_start_services: 100.0,
            parallel_service_start_sequence: false,
            start_retry: StartRetryPolicy::default(),
            max_service_console_log_cache_size: 64,
            max_services_per_request: 64,
            print_error_stream_lines_from_services: true,
            default_jvm_options_parameters: true,
            jvm_command: "java".to_string(),
            temp_dir: PathBuf::from("temp"),
            services_dir: PathBuf::from("local/services"),
            templates_dir: PathBuf::from("local/templates"),
            wrapper_jar: PathBuf::from("temp/caches/wrapper.jar"),
            wrapper_main_class: "cloudfleet.wrapper.Main".to_string(),
            driver_classpath: String::new(),
            stop_grace_period: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ssl: SslConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let temp_dir = path_var("CLOUDFLEET_TEMP_DIR").unwrap_or(defaults.temp_dir);
        let wrapper_jar = path_var("CLOUDFLEET_WRAPPER_JAR")
            .unwrap_or_else(|| temp_dir.join("caches").join("wrapper.jar"));

        let listeners = match var("CLOUDFLEET_LISTENERS") {
            Some(raw) => parse_listeners(&raw)
                .ok_or(ConfigError::Invalid("CLOUDFLEET_LISTENERS", raw))?,
            None => defaults.listeners,
        };

        let cluster_peers = match var("CLOUDFLEET_CLUSTER_PEERS") {
            Some(raw) => parse_peers(&raw)
                .ok_or(ConfigError::Invalid("CLOUDFLEET_CLUSTER_PEERS", raw))?,
            None => Vec::new(),
        };

        let start_retry = StartRetryPolicy {
            enabled: bool_var("CLOUDFLEET_START_RETRY", defaults.start_retry.enabled),
            max_attempts: parsed(
                "CLOUDFLEET_START_RETRY_MAX_ATTEMPTS",
                defaults.start_retry.max_attempts,
            )?,
            initial_delay: millis(
                "CLOUDFLEET_START_RETRY_INITIAL_DELAY_MS",
                defaults.start_retry.initial_delay,
            )?,
            max_delay: millis(
                "CLOUDFLEET_START_RETRY_MAX_DELAY_MS",
                defaults.start_retry.max_delay,
            )?,
        };

        let ssl = SslConfig {
            enabled: bool_var("CLOUDFLEET_SSL_ENABLED", false),
            client_auth: bool_var("CLOUDFLEET_SSL_CLIENT_AUTH", false),
            certificate_path: path_var("CLOUDFLEET_SSL_CERTIFICATE"),
            private_key_path: path_var("CLOUDFLEET_SSL_PRIVATE_KEY"),
            trust_certificate_path: path_var("CLOUDFLEET_SSL_TRUST_CERTIFICATE"),
        };
        if ssl.enabled {
            if ssl.certificate_path.is_none() {
                return Err(ConfigError::Missing("CLOUDFLEET_SSL_CERTIFICATE"));
            }
            if ssl.private_key_path.is_none() {
                return Err(ConfigError::Missing("CLOUDFLEET_SSL_PRIVATE_KEY"));
            }
        }

        Ok(Self {
            node_id: var("CLOUDFLEET_NODE_ID").unwrap_or(defaults.node_id),
            listeners,
            cluster_peers,
            host_address: var("CLOUDFLEET_HOST_ADDRESS").unwrap_or(defaults.host_address),
            max_memory: parsed("CLOUDFLEET_MAX_MEMORY", defaults.max_memory)?,
            max_cpu_usage_to_start_services: parsed(
                "CLOUDFLEET_MAX_CPU_USAGE",
                defaults.max_cpu_usage_to_start_services,
            )?,
            parallel_service_start_sequence: bool_var(
                "CLOUDFLEET_PARALLEL_START",
                defaults.parallel_service_start_sequence,
            ),
            start_retry,
            max_service_console_log_cache_size: parsed(
                "CLOUDFLEET_LOG_CACHE_SIZE",
                defaults.max_service_console_log_cache_size,
            )?,
            max_services_per_request: parsed(
                "CLOUDFLEET_MAX_SERVICES_PER_REQUEST",
                defaults.max_services_per_request,
            )?,
            print_error_stream_lines_from_services: bool_var(
                "CLOUDFLEET_PRINT_SERVICE_ERRORS",
                defaults.print_error_stream_lines_from_services,
            ),
            default_jvm_options_parameters: bool_var(
                "CLOUDFLEET_DEFAULT_JVM_FLAGS",
                defaults.default_jvm_options_parameters,
            ),
            jvm_command: var("CLOUDFLEET_JVM_COMMAND").unwrap_or(defaults.jvm_command),
            temp_dir,
            services_dir: path_var("CLOUDFLEET_SERVICES_DIR").unwrap_or(defaults.services_dir),
            templates_dir: path_var("CLOUDFLEET_TEMPLATES_DIR").unwrap_or(defaults.templates_dir),
            wrapper_jar,
            wrapper_main_class: var("CLOUDFLEET_WRAPPER_MAIN_CLASS")
                .unwrap_or(defaults.wrapper_main_class),
            driver_classpath: var("CLOUDFLEET_DRIVER_CLASSPATH")
                .unwrap_or(defaults.driver_classpath),
            stop_grace_period: millis("CLOUDFLEET_STOP_GRACE_MS", defaults.stop_grace_period)?,
            stop_timeout: millis("CLOUDFLEET_STOP_TIMEOUT_MS", defaults.stop_timeout)?,
            request_timeout: millis("CLOUDFLEET_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            ssl,
        })
    }

    /// Identity of this node as announced to peers.
    pub fn identity(&self) -> NetworkClusterNode {
        NetworkClusterNode::new(self.node_id.clone(), self.listeners.clone())
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn path_var(key: &str) -> Option<PathBuf> {
    var(key).map(PathBuf::from)
}

fn bool_var(key: &str, default: bool) -> bool {
    var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

fn millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

/// `host:port,host:port`
fn parse_listeners(raw: &str) -> Option<Vec<HostAndPort>> {
    let listeners: Option<Vec<_>> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect();
    listeners.filter(|l| !l.is_empty())
}

/// `Node-2@10.0.0.2:1410;10.0.0.2:1411,Node-3@10.0.0.3:1410`
fn parse_peers(raw: &str) -> Option<Vec<NetworkClusterNode>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, addresses) = entry.split_once('@')?;
            if id.is_empty() {
                return None;
            }
            let listeners: Option<Vec<HostAndPort>> = addresses
                .split(';')
                .map(|a| a.trim().parse().ok())
                .collect();
            Some(NetworkClusterNode::new(id, listeners?))
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {0}: '{1}'")]
    Invalid(&'static str, String),
}
