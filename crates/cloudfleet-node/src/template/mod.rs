// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template storage backends.
//!
//! A storage holds templates under `prefix/name` and can copy them into a
//! service directory, receive files deployed back from a service, and move
//! whole templates around as zip archives.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::model::ServiceTemplate;

pub mod local;

pub use local::LocalTemplateStorage;

/// Name of the storage every node has.
pub const LOCAL_STORAGE: &str = "local";

/// Errors from template storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Template path leaves the storage: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A place templates live in.
#[async_trait]
pub trait TemplateStorage: Send + Sync {
    fn name(&self) -> &str;

    /// Whether deployments to this storage should be pushed to peers.
    fn is_local(&self) -> bool {
        false
    }

    async fn has(&self, template: &ServiceTemplate) -> bool;

    /// Copy the template's contents into `target`.
    async fn copy(&self, template: &ServiceTemplate, target: &Path) -> Result<()>;

    /// Copy the top-level entries `files` of `source` into the template.
    async fn deploy(&self, source: &Path, files: &[String], template: &ServiceTemplate)
    -> Result<()>;

    async fn to_zip_bytes(&self, template: &ServiceTemplate) -> Result<Bytes>;

    /// Unpack `zip` into the template, overwriting existing files.
    async fn deploy_zip(&self, template: &ServiceTemplate, zip: Bytes) -> Result<()>;
}

/// Storages by name.
#[derive(Default)]
pub struct TemplateStorageRegistry {
    storages: RwLock<HashMap<String, Arc<dyn TemplateStorage>>>,
}

impl TemplateStorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, storage: Arc<dyn TemplateStorage>) {
        self.storages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(storage.name().to_string(), storage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateStorage>> {
        self.storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The storage called `name`, or the local one if none is registered.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn TemplateStorage>> {
        self.get(name).or_else(|| self.local())
    }

    pub fn local(&self) -> Option<Arc<dyn TemplateStorage>> {
        self.get(LOCAL_STORAGE)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
