// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! Simulates service processes without spawning anything. Every spawned
//! process is recorded as a [`MockProcessHandle`] through which tests can feed
//! console output, inspect stdin and end the process.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};

use super::traits::*;

/// Shared view of one mock process.
pub struct MockProcessHandle {
    spec: LaunchSpec,
    pid: u32,
    alive: AtomicBool,
    exit_code: AtomicI32,
    stdin: Mutex<Vec<String>>,
    stdout: tokio::sync::Mutex<Option<DuplexStream>>,
    stderr: tokio::sync::Mutex<Option<DuplexStream>>,
    exit_on_stop_command: bool,
    ignore_terminate: bool,
}

impl MockProcessHandle {
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Lines written to stdin so far.
    pub fn stdin_lines(&self) -> Vec<String> {
        self.stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write raw text to the process's stdout.
    pub async fn emit_stdout(&self, text: &str) {
        if let Some(stream) = self.stdout.lock().await.as_mut() {
            let _ = stream.write_all(text.as_bytes()).await;
        }
    }

    /// Write raw text to the process's stderr.
    pub async fn emit_stderr(&self, text: &str) {
        if let Some(stream) = self.stderr.lock().await.as_mut() {
            let _ = stream.write_all(text.as_bytes()).await;
        }
    }

    /// End the process with `code`, closing its output streams.
    pub async fn exit(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        self.stdout.lock().await.take();
        self.stderr.lock().await.take();
    }
}

/// Mock launcher for testing.
pub struct MockProcessLauncher {
    processes: Mutex<Vec<Arc<MockProcessHandle>>>,
    next_pid: AtomicU32,
    /// If true, spawning fails
    pub fail_spawn: bool,
    /// If true, writing `stop` to stdin ends the process with exit code 0
    pub exit_on_stop_command: bool,
    /// If true, SIGTERM is ignored and only a kill ends the process
    pub ignore_terminate: bool,
}

impl Default for MockProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessLauncher {
    /// Create a mock launcher whose processes exit on `stop`.
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1000),
            fail_spawn: false,
            exit_on_stop_command: true,
            ignore_terminate: false,
        }
    }

    /// Create a mock launcher that refuses to spawn.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new()
        }
    }

    /// Create a mock launcher whose processes only die when killed.
    pub fn stubborn() -> Self {
        Self {
            exit_on_stop_command: false,
            ignore_terminate: true,
            ..Self::new()
        }
    }

    /// All processes spawned so far, oldest first.
    pub fn processes(&self) -> Vec<Arc<MockProcessHandle>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently spawned process.
    pub fn last(&self) -> Option<Arc<MockProcessHandle>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn spawn_count(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ProcessLauncher for MockProcessLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ServiceProcess>> {
        if self.fail_spawn {
            return Err(LaunchError::SpawnFailed("Mock failure".to_string()));
        }

        let (stdout_writer, stdout_reader) = tokio::io::duplex(64 * 1024);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(64 * 1024);

        let handle = Arc::new(MockProcessHandle {
            spec: spec.clone(),
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
            exit_code: AtomicI32::new(0),
            stdin: Mutex::new(Vec::new()),
            stdout: tokio::sync::Mutex::new(Some(stdout_writer)),
            stderr: tokio::sync::Mutex::new(Some(stderr_writer)),
            exit_on_stop_command: self.exit_on_stop_command,
            ignore_terminate: self.ignore_terminate,
        });

        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());

        Ok(Box::new(MockProcess {
            handle,
            output: Some((stdout_reader, stderr_reader)),
        }))
    }
}

struct MockProcess {
    handle: Arc<MockProcessHandle>,
    output: Option<(DuplexStream, DuplexStream)>,
}

#[async_trait]
impl ServiceProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.handle.pid)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.handle.is_alive() {
            return Err(LaunchError::NotRunning);
        }
        self.handle
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        if self.handle.exit_on_stop_command && line == "stop" {
            self.handle.exit(0).await;
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    async fn terminate(&mut self) -> Result<()> {
        if !self.handle.ignore_terminate && self.handle.is_alive() {
            self.handle.exit(143).await;
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        if self.handle.is_alive() {
            self.handle.exit(137).await;
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<i32> {
        let poll_interval = Duration::from_millis(5);
        let waited = tokio::time::timeout(timeout, async {
            while self.handle.is_alive() {
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await;
        waited
            .ok()
            .map(|_| self.handle.exit_code.load(Ordering::SeqCst))
    }

    fn take_output(&mut self) -> ProcessOutput {
        match self.output.take() {
            Some((stdout, stderr)) => ProcessOutput {
                stdout: Some(Box::new(stdout)),
                stderr: Some(Box::new(stderr)),
            },
            None => ProcessOutput::default(),
        }
    }
}
