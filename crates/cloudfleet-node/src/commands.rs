// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node command line. Every command answers with a list of lines.

use crate::node::Node;

const HELP: &[&str] = &[
    "help      - show this list",
    "services  - every service known in the cluster",
    "tasks     - service tasks known to this node",
    "nodes     - this node and its peers",
];

/// Run one command line and return its output.
pub fn execute(node: &Node, command_line: &str) -> Vec<String> {
    match command_line.split_whitespace().next() {
        Some("help") => HELP.iter().map(|line| line.to_string()).collect(),
        Some("services") => services(node),
        Some("tasks") => tasks(node),
        Some("nodes") => nodes(node),
        _ => vec![format!("unknown command: {}", command_line.trim())],
    }
}

fn services(node: &Node) -> Vec<String> {
    let snapshots = node.manager().snapshots();
    if snapshots.is_empty() {
        return vec!["no services".to_string()];
    }
    snapshots
        .iter()
        .map(|s| {
            format!(
                "{} | {} | {} | {} | {}",
                s.name(),
                s.service_id.unique_id,
                s.life_cycle,
                s.service_id.node_unique_id,
                s.address
            )
        })
        .collect()
}

fn tasks(node: &Node) -> Vec<String> {
    let tasks = node.manager().tasks();
    if tasks.is_empty() {
        return vec!["no tasks".to_string()];
    }
    tasks
        .iter()
        .map(|t| {
            format!(
                "{} | {:?} | {} MiB | port {}",
                t.name,
                t.process_configuration.environment,
                t.process_configuration.max_heap_memory_size,
                t.start_port
            )
        })
        .collect()
}

fn nodes(node: &Node) -> Vec<String> {
    let local = node.node_info_snapshot();
    let mut lines = vec![format!(
        "{} (local) | services {} | memory {}/{} MiB | cpu {:.1}%",
        local.node.unique_id,
        local.current_services_count,
        local.used_memory,
        local.max_memory,
        local.system_cpu_usage
    )];
    for server in node.provider().servers() {
        let state = if server.is_connected() { "connected" } else { "disconnected" };
        let line = match server.node_info_snapshot() {
            Some(info) => format!(
                "{} ({}) | services {} | memory {}/{} MiB | cpu {:.1}%",
                server.node_id(),
                state,
                info.current_services_count,
                info.used_memory,
                info.max_memory,
                info.system_cpu_usage
            ),
            None => format!("{} ({})", server.node_id(), state),
        };
        lines.push(line);
    }
    lines
}
