// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process launcher backed by `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

use super::traits::*;

/// Spawns services as direct child processes of the node.
#[derive(Debug, Default, Clone)]
pub struct NativeProcessLauncher;

impl NativeProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for NativeProcessLauncher {
    fn launcher_type(&self) -> &'static str {
        "native"
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ServiceProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::SpawnFailed(format!("{}: {}", spec.program, e)))?;
        let stdin = child.stdin.take();

        info!(
            service = %spec.service_name,
            pid = ?child.id(),
            dir = %spec.working_dir.display(),
            "Spawned service process"
        );

        Ok(Box::new(NativeProcess {
            pid: child.id(),
            child,
            stdin,
        }))
    }
}

struct NativeProcess {
    pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl NativeProcess {
    fn signal(&self, sig: Signal) -> Result<()> {
        let Some(pid) = self.pid else {
            return Err(LaunchError::NotRunning);
        };
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid, "Process already gone");
                Ok(())
            }
            Err(e) => Err(LaunchError::Signal(e.to_string())),
        }
    }
}

#[async_trait]
impl ServiceProcess for NativeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(LaunchError::NotRunning)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<i32> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status.code().unwrap_or(-1)),
            Ok(Err(e)) => {
                debug!(pid = ?self.pid, error = %e, "Waiting for process failed");
                Some(-1)
            }
            Err(_) => None,
        }
    }

    fn take_output(&mut self) -> ProcessOutput {
        ProcessOutput {
            stdout: self
                .child
                .stdout
                .take()
                .map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
            stderr: self
                .child
                .stderr
                .take()
                .map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    fn spec(program: &str, args: &[&str], dir: &std::path::Path) -> LaunchSpec {
        LaunchSpec {
            service_name: "Test-1".into(),
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: dir.to_path_buf(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = NativeProcessLauncher::new();
        let result = launcher
            .spawn(&spec("/definitely/not/a/program", &[], dir.path()))
            .await;
        assert!(matches!(result, Err(LaunchError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_stdin_echo_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = NativeProcessLauncher::new();
        let mut process = launcher
            .spawn(&spec("sh", &["-c", "read line; echo \"got $line\""], dir.path()))
            .await
            .unwrap();

        let mut output = process.take_output();
        process.write_line("stop").await.unwrap();

        let exit = process.wait_for_exit(Duration::from_secs(5)).await;
        assert_eq!(exit, Some(0));
        assert!(!process.is_alive());

        let mut text = String::new();
        output
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut text)
            .await
            .unwrap();
        assert_eq!(text.trim(), "got stop");
    }

    #[tokio::test]
    async fn test_terminate_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = NativeProcessLauncher::new();
        let mut process = launcher
            .spawn(&spec("sleep", &["30"], dir.path()))
            .await
            .unwrap();
        assert!(process.is_alive());
        assert!(process.pid().is_some());

        process.terminate().await.unwrap();
        let exit = process.wait_for_exit(Duration::from_secs(5)).await;
        // Killed by signal: no exit code
        assert_eq!(exit, Some(-1));
    }
}
