// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Staging of inclusions and templates into a service directory, and
//! deployment of the directory back into templates.
//!
//! Every item is handled on its own: a failure is logged and the next item
//! is processed.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::handoff::WRAPPER_DIR;
use crate::error::{Error, Result};
use crate::model::{
    ServiceDeployment, ServiceInfoSnapshot, ServiceRemoteInclusion, ServiceTemplate,
    is_contained_path,
};
use crate::node::Node;

/// File name of the bootstrap jar inside a service directory.
pub const WRAPPER_JAR_NAME: &str = "wrapper.jar";

const USER_AGENT: &str = concat!("cloudfleet-node/", env!("CARGO_PKG_VERSION"));

/// `temp_dir/includes/{base64url(sha256(url))}`
pub fn inclusion_cache_path(temp_dir: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    temp_dir.join("includes").join(URL_SAFE_NO_PAD.encode(digest))
}

/// Top-level entries to deploy, given `(name, is_dir)` pairs.
///
/// The bootstrap jar and the wrapper directory are never deployed. An exclude
/// matches a file by name and a directory by `name/`.
pub fn filter_deployment_entries(entries: &[(String, bool)], excludes: &[String]) -> Vec<String> {
    entries
        .iter()
        .filter(|(name, _)| name != WRAPPER_JAR_NAME && name != WRAPPER_DIR)
        .filter(|(name, is_dir)| {
            let key = if *is_dir {
                format!("{}/", name)
            } else {
                name.clone()
            };
            !excludes.contains(&key)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

async fn list_entries(directory: &Path) -> io::Result<Vec<(String, bool)>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = dir.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    entries.sort();
    Ok(entries)
}

async fn download(
    client: &reqwest::Client,
    inclusion: &ServiceRemoteInclusion,
    target: &Path,
) -> Result<()> {
    let mut request = client
        .get(&inclusion.url)
        .header(reqwest::header::USER_AGENT, USER_AGENT);
    for (name, value) in inclusion.http_headers() {
        request = request.header(name, value);
    }

    let body = request.send().await?.error_for_status()?.bytes().await?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = target.with_extension("part");
    tokio::fs::write(&partial, &body).await?;
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}

async fn include_one(
    node: &Node,
    service: &ServiceInfoSnapshot,
    directory: &Path,
    inclusion: &ServiceRemoteInclusion,
) -> Result<bool> {
    if !is_contained_path(&inclusion.destination) {
        return Err(Error::Other(format!(
            "inclusion destination leaves the service directory: {}",
            inclusion.destination
        )));
    }
    let cache = inclusion_cache_path(&node.config().temp_dir, &inclusion.url);

    if !tokio::fs::try_exists(&cache).await? {
        if !node.hooks().allow(|h| h.allow_inclusion(service, inclusion)) {
            return Ok(false);
        }
        download(node.http(), inclusion, &cache).await?;
    }

    let target = directory.join(&inclusion.destination);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&cache, &target).await?;
    Ok(true)
}

/// Download (or take from cache) each inclusion and copy it into `directory`.
/// Returns the inclusions that were staged.
pub async fn include_inclusions(
    node: &Node,
    service: &ServiceInfoSnapshot,
    directory: &Path,
    waiting: Vec<ServiceRemoteInclusion>,
) -> Vec<ServiceRemoteInclusion> {
    let mut resolved = Vec::new();
    for inclusion in waiting {
        if inclusion.url.is_empty() || inclusion.destination.is_empty() {
            continue;
        }
        info!(
            service = %service.name(),
            url = %inclusion.url,
            destination = %inclusion.destination,
            "Including remote file"
        );
        match include_one(node, service, directory, &inclusion).await {
            Ok(true) => resolved.push(inclusion),
            Ok(false) => debug!(service = %service.name(), url = %inclusion.url, "Inclusion vetoed"),
            Err(e) => warn!(
                service = %service.name(),
                url = %inclusion.url,
                error = %e,
                "Failed to include remote file"
            ),
        }
    }
    resolved
}

/// Copy each template into `directory`. Returns the templates that were copied.
pub async fn include_templates(
    node: &Node,
    service: &ServiceInfoSnapshot,
    directory: &Path,
    waiting: Vec<ServiceTemplate>,
) -> Vec<ServiceTemplate> {
    let mut resolved = Vec::new();
    for template in waiting {
        if !template.is_complete() {
            continue;
        }
        let Some(storage) = node.storages().resolve(&template.storage) else {
            warn!(service = %service.name(), %template, "No template storage available");
            continue;
        };
        if !storage.has(&template).await {
            warn!(service = %service.name(), %template, "Template does not exist");
            continue;
        }
        if !node.hooks().allow(|h| h.allow_template(service, &template)) {
            debug!(service = %service.name(), %template, "Template vetoed");
            continue;
        }

        info!(service = %service.name(), %template, "Including template");
        match storage.copy(&template, directory).await {
            Ok(()) => resolved.push(template),
            Err(e) => warn!(service = %service.name(), %template, error = %e, "Failed to copy template"),
        }
    }
    resolved
}

async fn deploy_one(
    node: &Node,
    service: &ServiceInfoSnapshot,
    directory: &Path,
    deployment: &ServiceDeployment,
) -> Result<bool> {
    let template = &deployment.template;
    let storage = node
        .storages()
        .resolve(&template.storage)
        .ok_or_else(|| Error::Other(format!("no storage for {}", template)))?;

    if !node.hooks().allow(|h| h.allow_deployment(service, deployment)) {
        return Ok(false);
    }

    info!(service = %service.name(), %template, "Deploying service resources");
    let entries = list_entries(directory).await?;
    let files = filter_deployment_entries(&entries, &deployment.excludes);
    storage.deploy(directory, &files, template).await?;

    if storage.is_local() {
        let zip = storage.to_zip_bytes(template).await?;
        let peers = node.provider().deploy_template_in_cluster(template, zip);
        debug!(%template, peers, "Template pushed to cluster");
    }
    Ok(true)
}

/// Deploy `directory` into each deployment's template. Returns the
/// deployments that are still pending.
pub async fn deploy_resources(
    node: &Node,
    service: &ServiceInfoSnapshot,
    directory: &Path,
    pending: Vec<ServiceDeployment>,
) -> Vec<ServiceDeployment> {
    let mut remaining = Vec::new();
    for deployment in pending {
        if !deployment.template.is_complete() {
            remaining.push(deployment);
            continue;
        }
        match deploy_one(node, service, directory, &deployment).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(service = %service.name(), template = %deployment.template, "Deployment vetoed");
                remaining.push(deployment);
            }
            Err(e) => {
                warn!(
                    service = %service.name(),
                    template = %deployment.template,
                    error = %e,
                    "Failed to deploy service resources"
                );
                remaining.push(deployment);
            }
        }
    }
    remaining
}
