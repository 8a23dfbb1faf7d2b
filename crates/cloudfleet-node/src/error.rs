// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cloudfleet-node.

use thiserror::Error;
use uuid::Uuid;

/// Node errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sending on a network channel failed.
    #[error("Channel error: {0}")]
    Channel(#[from] cloudfleet_protocol::ChannelError),

    /// Spawning or controlling a service process failed.
    #[error("Launch error: {0}")]
    Launch(#[from] crate::process::LaunchError),

    /// Template storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::template::StorageError),

    /// Downloading a remote inclusion failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading or writing a zip archive failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Service was not found on this node.
    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    /// Service task was not found.
    #[error("Service task not found: {0}")]
    TaskNotFound(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the node Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        assert_eq!(
            format!("{}", Error::ServiceNotFound(id)),
            format!("Service not found: {}", id)
        );
        assert_eq!(
            format!("{}", Error::TaskNotFound("Lobby".into())),
            "Service task not found: Lobby"
        );

        let io = std::io::Error::other("disk full");
        let err: Error = io.into();
        assert!(format!("{}", err).contains("IO error"));
    }
}
