// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded capture of a service's console output.
//!
//! One drain task per stream reads whatever bytes are available and feeds
//! them to [`ConsoleLogCache::push_chunk`], which reassembles lines (`\n` and
//! `\r` both terminate a line) and keeps only the newest `capacity` lines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::model::ServiceId;
use crate::process::ProcessOutput;

const READ_BUFFER_SIZE: usize = 1024;

/// Which console stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Observer of every cached line.
pub trait LogEntrySink: Send + Sync {
    fn on_log_line(&self, service_id: &ServiceId, line: &str, stream: LogStream);
}

#[derive(Default)]
struct CacheState {
    lines: VecDeque<String>,
    stdout_buffer: Vec<u8>,
    stderr_buffer: Vec<u8>,
}

impl CacheState {
    fn buffer(&mut self, stream: LogStream) -> &mut Vec<u8> {
        match stream {
            LogStream::Stdout => &mut self.stdout_buffer,
            LogStream::Stderr => &mut self.stderr_buffer,
        }
    }
}

/// Thread-safe, bounded FIFO of console lines.
pub struct ConsoleLogCache {
    service_id: ServiceId,
    capacity: usize,
    print_error_lines: bool,
    auto_print: AtomicBool,
    state: Mutex<CacheState>,
    /// Held across caching and announcing a chunk so the sink sees lines in
    /// cache order. Readers only take `state`.
    notify: Mutex<()>,
    sink: Option<Arc<dyn LogEntrySink>>,
}

impl ConsoleLogCache {
    pub fn new(
        service_id: ServiceId,
        capacity: usize,
        print_error_lines: bool,
        sink: Option<Arc<dyn LogEntrySink>>,
    ) -> Self {
        Self {
            service_id,
            capacity: capacity.max(1),
            print_error_lines,
            auto_print: AtomicBool::new(false),
            state: Mutex::new(CacheState::default()),
            notify: Mutex::new(()),
            sink,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Echo every new line into the node log.
    pub fn set_auto_print(&self, enabled: bool) {
        self.auto_print.store(enabled, Ordering::Relaxed);
    }

    pub fn is_auto_print(&self) -> bool {
        self.auto_print.load(Ordering::Relaxed)
    }

    /// Cached lines, oldest first.
    pub fn cached_lines(&self) -> Vec<String> {
        self.lock().lines.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.lines.clear();
        state.stdout_buffer.clear();
        state.stderr_buffer.clear();
    }

    /// Feed a chunk read from `stream`.
    ///
    /// Complete lines are cached and announced; an unterminated tail stays
    /// buffered until the next chunk of the same stream.
    pub fn push_chunk(&self, stream: LogStream, chunk: &[u8]) {
        let _notify = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let completed = {
            let mut state = self.lock();
            let buffer = state.buffer(stream);
            buffer.extend_from_slice(chunk);

            let Some(end) = buffer.iter().rposition(|b| *b == b'\n' || *b == b'\r') else {
                return;
            };
            let terminated: Vec<u8> = buffer.drain(..=end).collect();

            let lines: Vec<String> = String::from_utf8_lossy(&terminated)
                .split('\r')
                .flat_map(|part| part.split('\n'))
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();

            for line in &lines {
                while state.lines.len() >= self.capacity {
                    state.lines.pop_front();
                }
                state.lines.push_back(line.clone());
            }
            lines
        };

        for line in &completed {
            self.announce(line, stream);
        }
    }

    /// Drop whatever is buffered for `stream`.
    pub fn discard_buffer(&self, stream: LogStream) {
        self.lock().buffer(stream).clear();
    }

    /// Start one drain task per available output stream.
    pub fn attach(self: &Arc<Self>, output: ProcessOutput) {
        if let Some(stdout) = output.stdout {
            self.spawn_drain(LogStream::Stdout, stdout);
        }
        if let Some(stderr) = output.stderr {
            self.spawn_drain(LogStream::Stderr, stderr);
        }
    }

    fn spawn_drain(self: &Arc<Self>, stream: LogStream, mut reader: Box<dyn AsyncRead + Send + Unpin>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => cache.push_chunk(stream, &buf[..n]),
                    Err(e) => {
                        debug!(service = %cache.service_id.name(), ?stream, error = %e, "Console stream failed");
                        cache.discard_buffer(stream);
                        break;
                    }
                }
            }
        });
    }

    fn announce(&self, line: &str, stream: LogStream) {
        if let Some(sink) = &self.sink {
            sink.on_log_line(&self.service_id, line, stream);
        }

        if self.is_auto_print() {
            info!(service = %self.service_id.name(), "{}", line);
        } else if stream == LogStream::Stderr && self.print_error_lines {
            warn!(service = %self.service_id.name(), "{}", line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
