// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Templates stored on this node's disk under `{root}/{prefix}/{name}`.

use std::fs;
use std::io::{self, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{LOCAL_STORAGE, Result, StorageError, TemplateStorage};
use crate::model::ServiceTemplate;

pub struct LocalTemplateStorage {
    root: PathBuf,
}

impl LocalTemplateStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{prefix}/{name}`; prefixes and names that would leave the
    /// root are refused.
    pub fn template_dir(&self, template: &ServiceTemplate) -> Result<PathBuf> {
        if !template.is_contained() {
            return Err(StorageError::InvalidPath(template.to_string()));
        }
        Ok(self.root.join(&template.prefix).join(&template.name))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

/// Copy a file or a directory tree, creating parents as needed.
pub(crate) fn copy_recursive(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)?;
    }
    Ok(())
}

fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        add_directory(&mut zip, dir, "", options)?;
        zip.finish()?;
    }
    Ok(buffer.into_inner())
}

fn add_directory<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        let path = entry.path();
        if path.is_dir() {
            let dir_name = format!("{}/", name);
            zip.add_directory(dir_name.clone(), options)?;
            add_directory(zip, &path, &dir_name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut file = fs::File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }
    Ok(())
}

#[async_trait]
impl TemplateStorage for LocalTemplateStorage {
    fn name(&self) -> &str {
        LOCAL_STORAGE
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn has(&self, template: &ServiceTemplate) -> bool {
        let Ok(dir) = self.template_dir(template) else {
            return false;
        };
        tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn copy(&self, template: &ServiceTemplate, target: &Path) -> Result<()> {
        let source = self.template_dir(template)?;
        if !self.has(template).await {
            return Err(StorageError::NotFound(template.to_string()));
        }
        let target = target.to_path_buf();
        debug!(%template, target = %target.display(), "Copying template");
        blocking(move || Ok(copy_recursive(&source, &target)?)).await
    }

    async fn deploy(
        &self,
        source: &Path,
        files: &[String],
        template: &ServiceTemplate,
    ) -> Result<()> {
        let source = source.to_path_buf();
        let target = self.template_dir(template)?;
        let files = files.to_vec();
        debug!(%template, count = files.len(), "Deploying files into template");
        blocking(move || {
            fs::create_dir_all(&target)?;
            for file in &files {
                let name = file.trim_end_matches('/');
                copy_recursive(&source.join(name), &target.join(name))?;
            }
            Ok(())
        })
        .await
    }

    async fn to_zip_bytes(&self, template: &ServiceTemplate) -> Result<Bytes> {
        if !self.has(template).await {
            return Err(StorageError::NotFound(template.to_string()));
        }
        let dir = self.template_dir(template)?;
        let bytes = blocking(move || zip_directory(&dir)).await?;
        Ok(Bytes::from(bytes))
    }

    async fn deploy_zip(&self, template: &ServiceTemplate, zip: Bytes) -> Result<()> {
        let target = self.template_dir(template)?;
        blocking(move || {
            fs::create_dir_all(&target)?;
            let mut archive = ZipArchive::new(Cursor::new(zip))?;
            archive.extract(&target)?;
            Ok(())
        })
        .await
    }
}
