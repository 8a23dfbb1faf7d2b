// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `.wrapper/wrapper.json`, read by the wrapper inside the service process
//! to connect back to its node.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::config::SslConfig;
use crate::error::Result;
use crate::model::{HostAndPort, ServiceConfiguration, ServiceInfoSnapshot};

pub const WRAPPER_DIR: &str = ".wrapper";
pub const HANDOFF_FILE: &str = "wrapper.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffDocument<'a> {
    pub connection_key: &'a str,
    /// Node listener the wrapper should connect to.
    pub listener: Option<&'a HostAndPort>,
    pub service_configuration: &'a ServiceConfiguration,
    pub service_info_snapshot: &'a ServiceInfoSnapshot,
    pub ssl_config: &'a SslConfig,
}

/// Pick one of the node's listeners at random.
pub fn choose_listener(listeners: &[HostAndPort]) -> Option<&HostAndPort> {
    listeners.choose(&mut rand::thread_rng())
}

pub fn handoff_path(directory: &Path) -> PathBuf {
    directory.join(WRAPPER_DIR).join(HANDOFF_FILE)
}

/// Write the document into `directory/.wrapper/wrapper.json`.
pub async fn write(directory: &Path, document: &HandoffDocument<'_>) -> Result<()> {
    let path = handoff_path(directory);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(document)?;
    tokio::fs::write(&path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ProcessConfiguration, ProcessSnapshot, ServiceEnvironmentType, ServiceId, ServiceLifeCycle,
    };
    use serde_json::Value;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_document_has_all_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let service_id = ServiceId {
            unique_id: Uuid::new_v4(),
            task_name: "Lobby".into(),
            task_service_id: 1,
            node_unique_id: "Node-1".into(),
        };
        let configuration = ServiceConfiguration {
            service_id: service_id.clone(),
            runtime: "jvm".into(),
            auto_delete_on_stop: false,
            static_service: false,
            groups: vec![],
            includes: vec![],
            templates: vec![],
            deployments: vec![],
            process_config: ProcessConfiguration {
                environment: ServiceEnvironmentType::MinecraftServer,
                max_heap_memory_size: 512,
                jvm_options: vec![],
            },
            port: 44955,
        };
        let snapshot = ServiceInfoSnapshot {
            creation_time: 1,
            service_id,
            address: HostAndPort::new("127.0.0.1", 44955),
            connected: false,
            life_cycle: ServiceLifeCycle::Prepared,
            process_snapshot: ProcessSnapshot::empty(),
            configuration: configuration.clone(),
        };
        let listeners = vec![HostAndPort::new("127.0.0.1", 1410)];

        write(
            dir.path(),
            &HandoffDocument {
                connection_key: "secret",
                listener: choose_listener(&listeners),
                service_configuration: &configuration,
                service_info_snapshot: &snapshot,
                ssl_config: &SslConfig::default(),
            },
        )
        .await
        .unwrap();

        let raw = std::fs::read(handoff_path(dir.path())).unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["connectionKey"], "secret");
        assert_eq!(value["listener"]["port"], 1410);
        assert_eq!(value["serviceConfiguration"]["port"], 44955);
        assert_eq!(value["serviceInfoSnapshot"]["lifeCycle"], "PREPARED");
        assert_eq!(value["sslConfig"]["enabled"], false);
    }
}
