// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync request handlers.
//!
//! Runs operations requested by peer nodes on the local node and builds the
//! response header. A failed operation answers with an empty header, so the
//! caller sees the expected field as absent.

use std::sync::Arc;

use cloudfleet_protocol::{Header, Packet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cluster::packets::{CustomServiceRequest, fields, ops};
use crate::commands;
use crate::error::{Error, Result};
use crate::model::{
    ServiceConfiguration, ServiceDeployment, ServiceInfoSnapshot, ServiceLifeCycle,
    ServiceRemoteInclusion, ServiceTask, ServiceTemplate,
};
use crate::node::Node;
use crate::service::CloudService;

/// Run `request` and build its response packet.
pub async fn handle_sync_request(node: &Arc<Node>, request: &Packet) -> Packet {
    let operation = request.sync_operation().unwrap_or_default().to_string();
    let header = match dispatch(node, &operation, request).await {
        Ok(header) => header,
        Err(e) => {
            warn!(operation = %operation, error = %e, "Sync request failed");
            Header::new()
        }
    };
    Packet::response_to(request, header)
}

async fn dispatch(node: &Arc<Node>, operation: &str, request: &Packet) -> Result<Header> {
    debug!(operation, "Handling sync request");
    match operation {
        ops::CREATE_BY_SERVICE_TASK => handle_create_by_task(node, request).await,
        ops::CREATE_BY_CONFIGURATION => handle_create_by_configuration(node, request).await,
        ops::CREATE_CUSTOM => handle_create_custom(node, request).await,
        ops::CREATE_CUSTOM_SELECTED_NODE_AND_AMOUNT => {
            handle_create_custom_amount(node, request).await
        }
        ops::SEND_COMMAND_LINE => handle_send_command_line(node, request),
        ops::SEND_COMMAND_LINE_TO_SERVICE => handle_command_line_to_service(node, request).await,
        ops::ADD_TEMPLATE => {
            let template: ServiceTemplate = required(request, fields::SERVICE_TEMPLATE)?;
            let service = service_by_id(node, request)?;
            reply(fields::SERVICE_INFO_SNAPSHOT, service.add_template(template))
        }
        ops::ADD_INCLUSION => {
            let inclusion: ServiceRemoteInclusion =
                required(request, fields::SERVICE_REMOTE_INCLUSION)?;
            let service = service_by_id(node, request)?;
            reply(fields::SERVICE_INFO_SNAPSHOT, service.add_inclusion(inclusion))
        }
        ops::ADD_DEPLOYMENT => {
            let deployment: ServiceDeployment = required(request, fields::SERVICE_DEPLOYMENT)?;
            let service = service_by_id(node, request)?;
            reply(fields::SERVICE_INFO_SNAPSHOT, service.add_deployment(deployment))
        }
        ops::GET_CACHED_LOG_MESSAGES => {
            let service = service_by_id(node, request)?;
            reply(fields::CACHED_LOG_MESSAGES, service.cached_log_lines())
        }
        ops::SET_LIFE_CYCLE => handle_set_life_cycle(node, request).await,
        ops::RESTART => {
            let service = service_by_snapshot(node, request)?;
            service.restart().await?;
            Ok(Header::new())
        }
        ops::KILL => {
            let service = service_by_snapshot(node, request)?;
            service.kill().await;
            Ok(Header::new())
        }
        ops::RUN_COMMAND => {
            let command: String = required(request, fields::COMMAND)?;
            let service = service_by_snapshot(node, request)?;
            service.run_command(&command).await;
            Ok(Header::new())
        }
        ops::INCLUDE_WAITING_INCLUSIONS => {
            service_by_id(node, request)?.include_waiting_inclusions().await;
            Ok(Header::new())
        }
        ops::INCLUDE_WAITING_TEMPLATES => {
            service_by_id(node, request)?.include_waiting_templates().await;
            Ok(Header::new())
        }
        ops::DEPLOY_RESOURCES => {
            service_by_id(node, request)?.deploy_resources().await;
            Ok(Header::new())
        }
        ops::GET_RESERVED_TASK_IDS => {
            let task: String = required(request, fields::TASK)?;
            reply(fields::TASK_IDS, node.manager().reserved_task_ids(&task))
        }
        other => {
            debug!(operation = other, "Unknown sync operation");
            Ok(Header::new())
        }
    }
}

async fn handle_create_by_task(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let task: ServiceTask = required(request, fields::SERVICE_TASK)?;
    let service = node.create_cloud_service_by_task(&task).await?;
    reply(fields::SERVICE_INFO_SNAPSHOT, service.snapshot())
}

async fn handle_create_by_configuration(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let configuration: ServiceConfiguration = required(request, fields::SERVICE_CONFIGURATION)?;
    let service = node.create_cloud_service(configuration).await?;
    reply(fields::SERVICE_INFO_SNAPSHOT, service.snapshot())
}

async fn handle_create_custom(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let custom: CustomServiceRequest = request.header_as()?;
    let service = node.create_cloud_service_custom(&custom).await?;
    reply(fields::SERVICE_INFO_SNAPSHOT, service.snapshot())
}

async fn handle_create_custom_amount(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let target: String = required(request, fields::NODE_UNIQUE_ID)?;
    if target != node.node_id() {
        return Err(Error::Other(format!(
            "request addressed to {} reached {}",
            target,
            node.node_id()
        )));
    }
    let amount: u32 = required(request, fields::AMOUNT)?;
    let custom: CustomServiceRequest = request.header_as()?;

    let services = node.create_cloud_services_custom(amount, &custom).await?;
    let snapshots: Vec<ServiceInfoSnapshot> = services.iter().map(|s| s.snapshot()).collect();
    reply(fields::SERVICE_INFO_SNAPSHOTS, snapshots)
}

fn handle_send_command_line(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let command_line: String = required(request, fields::COMMAND_LINE)?;
    reply(
        fields::RESPONSE_MESSAGES,
        commands::execute(node, &command_line),
    )
}

async fn handle_command_line_to_service(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let command_line: String = required(request, fields::COMMAND_LINE)?;
    let service = service_by_id(node, request)?;
    service.run_command(&command_line).await;
    reply(fields::SERVICE_INFO_SNAPSHOT, service.snapshot())
}

async fn handle_set_life_cycle(node: &Arc<Node>, request: &Packet) -> Result<Header> {
    let life_cycle: ServiceLifeCycle = required(request, fields::LIFE_CYCLE)?;
    let service = service_by_snapshot(node, request)?;
    service.set_life_cycle(life_cycle).await?;
    Ok(Header::new())
}

fn required<T: DeserializeOwned>(request: &Packet, key: &str) -> Result<T> {
    request
        .field(key)?
        .ok_or_else(|| Error::Other(format!("missing field {}", key)))
}

fn reply(key: &str, value: impl Serialize) -> Result<Header> {
    let mut header = Header::new();
    header.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(header)
}

fn local_service(node: &Node, unique_id: Uuid) -> Result<Arc<CloudService>> {
    node.manager()
        .local_service(&unique_id)
        .ok_or(Error::ServiceNotFound(unique_id))
}

fn service_by_id(node: &Node, request: &Packet) -> Result<Arc<CloudService>> {
    let unique_id: Uuid = required(request, fields::UNIQUE_ID)?;
    local_service(node, unique_id)
}

fn service_by_snapshot(node: &Node, request: &Packet) -> Result<Arc<CloudService>> {
    let snapshot: ServiceInfoSnapshot = required(request, fields::SERVICE_INFO_SNAPSHOT)?;
    local_service(node, snapshot.service_id.unique_id)
}
