// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Packet builders and header vocabulary shared by nodes.

use bytes::Bytes;
use cloudfleet_protocol::{Header, Packet, SYNC_OPERATION_PROPERTY, channels};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::model::{
    NetworkClusterNode, NetworkClusterNodeInfoSnapshot, ProcessConfiguration, ServiceDeployment,
    ServiceId, ServiceInfoSnapshot, ServiceRemoteInclusion, ServiceTemplate,
};
use crate::service::log_cache::LogStream;

/// Sync operation tags.
pub mod ops {
    pub const CREATE_BY_SERVICE_TASK: &str = "create_cloud_service_by_service_task";
    pub const CREATE_BY_CONFIGURATION: &str = "create_cloud_service_by_configuration";
    pub const CREATE_CUSTOM: &str = "create_cloud_service_custom";
    pub const CREATE_CUSTOM_SELECTED_NODE_AND_AMOUNT: &str =
        "create_cloud_service_custom_selected_node_and_amount";
    pub const SEND_COMMAND_LINE: &str = "send_command_line";
    pub const SEND_COMMAND_LINE_TO_SERVICE: &str = "send_commandline_to_cloud_service";
    pub const ADD_TEMPLATE: &str = "add_service_template_to_cloud_service";
    pub const ADD_INCLUSION: &str = "add_service_remote_inclusion_to_cloud_service";
    pub const ADD_DEPLOYMENT: &str = "add_service_deployment_to_cloud_service";
    pub const GET_CACHED_LOG_MESSAGES: &str = "get_cached_log_messages_from_service";
    pub const SET_LIFE_CYCLE: &str = "set_service_life_cycle";
    pub const RESTART: &str = "restart_cloud_service";
    pub const KILL: &str = "kill_cloud_service";
    pub const RUN_COMMAND: &str = "run_command_cloud_service";
    pub const INCLUDE_WAITING_INCLUSIONS: &str = "include_all_waiting_service_inclusions";
    pub const INCLUDE_WAITING_TEMPLATES: &str = "include_all_waiting_service_templates";
    pub const DEPLOY_RESOURCES: &str = "deploy_resources_from_service";
    pub const GET_RESERVED_TASK_IDS: &str = "get_reserved_task_ids";
}

/// Header field names of requests and responses.
pub mod fields {
    pub const SERVICE_TASK: &str = "serviceTask";
    pub const SERVICE_CONFIGURATION: &str = "serviceConfiguration";
    pub const SERVICE_INFO_SNAPSHOT: &str = "serviceInfoSnapshot";
    pub const SERVICE_INFO_SNAPSHOTS: &str = "serviceInfoSnapshots";
    pub const SERVICE_TEMPLATE: &str = "serviceTemplate";
    pub const SERVICE_REMOTE_INCLUSION: &str = "serviceRemoteInclusion";
    pub const SERVICE_DEPLOYMENT: &str = "serviceDeployment";
    pub const UNIQUE_ID: &str = "uniqueId";
    pub const NODE_UNIQUE_ID: &str = "nodeUniqueId";
    pub const AMOUNT: &str = "amount";
    pub const COMMAND_LINE: &str = "commandLine";
    pub const COMMAND: &str = "command";
    pub const RESPONSE_MESSAGES: &str = "responseMessages";
    pub const CACHED_LOG_MESSAGES: &str = "cachedLogMessages";
    pub const LIFE_CYCLE: &str = "lifeCycle";
    pub const TASK: &str = "task";
    pub const TASK_IDS: &str = "taskIds";
    pub const SERVICE_TEMPLATE_ZIP: &str = "serviceTemplate";
}

/// Kind of a service snapshot publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceInfoUpdateType {
    Register,
    Started,
    Stopped,
    Update,
    Unregister,
}

/// Body of a [`channels::SERVICE_INFO_PUBLISHER`] packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfoUpdate {
    #[serde(rename = "type")]
    pub kind: ServiceInfoUpdateType,
    pub service_info_snapshot: ServiceInfoSnapshot,
}

/// Body of a [`channels::CONSOLE_LOG_ENTRY`] packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    pub service_id: ServiceId,
    pub message: String,
    pub stream: LogStream,
}

/// Body of a [`channels::CHANNEL_MESSAGE`] packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// First packet on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthPayload {
    /// A peer node announcing itself.
    #[serde(rename_all = "camelCase")]
    Node { node: NetworkClusterNode },
    /// The wrapper inside a service process.
    #[serde(rename_all = "camelCase")]
    Service {
        unique_id: Uuid,
        connection_key: String,
    },
}

/// Fields of a service created from explicit resource lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomServiceRequest {
    pub name: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub auto_delete_on_stop: bool,
    #[serde(default)]
    pub static_service: bool,
    #[serde(default)]
    pub includes: Vec<ServiceRemoteInclusion>,
    #[serde(default)]
    pub templates: Vec<ServiceTemplate>,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub process_configuration: ProcessConfiguration,
    pub port: u16,
}

impl CustomServiceRequest {
    pub fn new(name: impl Into<String>, process_configuration: ProcessConfiguration, port: u16) -> Self {
        Self {
            name: name.into(),
            runtime: default_runtime(),
            auto_delete_on_stop: false,
            static_service: false,
            includes: Vec::new(),
            templates: Vec::new(),
            deployments: Vec::new(),
            groups: Vec::new(),
            process_configuration,
            port,
        }
    }
}

fn default_runtime() -> String {
    "jvm".to_string()
}

/// Build a sync request for `operation` carrying the fields of `payload`.
///
/// `payload` must serialize to a JSON object (or `null` for no fields).
pub fn sync_request(operation: &str, payload: Value) -> Packet {
    let mut header = match payload {
        Value::Object(map) => map,
        _ => Header::new(),
    };
    header.insert(SYNC_OPERATION_PROPERTY.to_string(), json!(operation));
    Packet::new(channels::SYNC_REQUEST, header)
}

pub fn service_info_update(
    kind: ServiceInfoUpdateType,
    snapshot: &ServiceInfoSnapshot,
) -> Result<Packet, serde_json::Error> {
    Packet::from_value(
        channels::SERVICE_INFO_PUBLISHER,
        &ServiceInfoUpdate {
            kind,
            service_info_snapshot: snapshot.clone(),
        },
    )
}

pub fn console_log_entry(
    service_id: &ServiceId,
    line: &str,
    stream: LogStream,
) -> Result<Packet, serde_json::Error> {
    Packet::from_value(
        channels::CONSOLE_LOG_ENTRY,
        &ConsoleLogEntry {
            service_id: service_id.clone(),
            message: line.to_string(),
            stream,
        },
    )
}

pub fn node_info_update(
    snapshot: &NetworkClusterNodeInfoSnapshot,
) -> Result<Packet, serde_json::Error> {
    Packet::from_value(
        channels::NODE_INFO_UPDATE,
        &json!({ "clusterNodeInfoSnapshot": snapshot }),
    )
}

/// A zipped template in the body, the template description in the header.
pub fn deploy_template(
    template: &ServiceTemplate,
    zip: Bytes,
) -> Result<Packet, serde_json::Error> {
    Ok(Packet::from_value(
        channels::DEPLOY_TEMPLATE,
        &json!({ fields::SERVICE_TEMPLATE_ZIP: template }),
    )?
    .with_body(zip))
}

pub fn channel_message(
    channel: &str,
    message: &str,
    data: Value,
) -> Result<Packet, serde_json::Error> {
    Packet::from_value(
        channels::CHANNEL_MESSAGE,
        &ChannelMessage {
            channel: channel.to_string(),
            message: message.to_string(),
            data,
        },
    )
}

pub fn auth(payload: &AuthPayload) -> Result<Packet, serde_json::Error> {
    Packet::from_value(channels::AUTH, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_carries_operation_and_fields() {
        let packet = sync_request(ops::GET_RESERVED_TASK_IDS, json!({ "task": "Lobby" }));
        assert_eq!(packet.channel, channels::SYNC_REQUEST);
        assert_eq!(packet.sync_operation(), Some(ops::GET_RESERVED_TASK_IDS));
        assert_eq!(packet.field::<String>(fields::TASK).unwrap().as_deref(), Some("Lobby"));
    }

    #[test]
    fn test_sync_request_without_fields() {
        let packet = sync_request(ops::SEND_COMMAND_LINE, Value::Null);
        assert_eq!(packet.header.len(), 1);
    }

    #[test]
    fn test_auth_payload_shapes() {
        let node = AuthPayload::Node {
            node: NetworkClusterNode::new("Node-2", vec![]),
        };
        let packet = auth(&node).unwrap();
        assert_eq!(packet.header["type"], json!("node"));
        assert_eq!(packet.header_as::<AuthPayload>().unwrap(), node);

        let service = AuthPayload::Service {
            unique_id: Uuid::nil(),
            connection_key: "k".into(),
        };
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(value["type"], json!("service"));
        assert_eq!(value["connectionKey"], json!("k"));
    }

    #[test]
    fn test_custom_request_ignores_extra_fields() {
        let request: CustomServiceRequest = serde_json::from_value(json!({
            "nodeUniqueId": "Node-2",
            "amount": 3,
            "name": "Lobby",
            "processConfiguration": { "environment": "NUKKIT", "maxHeapMemorySize": 256 },
            "port": 19132
        }))
        .unwrap();
        assert_eq!(request.runtime, "jvm");
        assert_eq!(request.port, 19132);
        assert!(!request.static_service);
    }

    #[test]
    fn test_deploy_template_body() {
        let template = ServiceTemplate::new("Lobby", "default", "local");
        let packet = deploy_template(&template, Bytes::from_static(b"PK")).unwrap();
        assert_eq!(&packet.body[..], b"PK");
        assert_eq!(
            packet.field::<ServiceTemplate>(fields::SERVICE_TEMPLATE_ZIP).unwrap(),
            Some(template)
        );
    }
}
