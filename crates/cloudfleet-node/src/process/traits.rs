// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process launcher trait definitions.
//!
//! Defines the abstract interface between the service lifecycle and the
//! operating system process running the service.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Errors from launcher and process operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The process could not be spawned.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// The process has no stdin or already exited.
    #[error("Process not running")]
    NotRunning,

    /// Sending a signal failed.
    #[error("Signal failed: {0}")]
    Signal(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Everything needed to spawn a service process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// Service name, used for logging
    pub service_name: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

/// Output streams of a spawned process, taken once by the log cache.
#[derive(Default)]
pub struct ProcessOutput {
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

/// A running service process.
#[async_trait]
pub trait ServiceProcess: Send {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Write one line (newline appended) to stdin.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Whether the process has not exited yet.
    fn is_alive(&mut self) -> bool;

    /// Ask the process to terminate (SIGTERM).
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process (SIGKILL).
    async fn kill(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns the exit code, `-1` for exits without a code, or `None` if the
    /// process is still running after the timeout.
    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<i32>;

    /// Take stdout/stderr. Subsequent calls return empty output.
    fn take_output(&mut self) -> ProcessOutput;
}

/// Spawns service processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launcher type identifier (e.g., "native", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Spawn a process described by `spec`.
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ServiceProcess>>;
}
