//! Local Filesystem Backend
//!
//! Keys map to paths under a root directory. Uploads never overwrite: the
//! destination is created with `create_new`, and a failed copy removes the
//! partial file.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs::OpenOptions;
use tracing::debug;
use walkdir::WalkDir;

use super::{BackendKind, Bucket, ByteStream, Download, Downloader, FeedAuthorization, Uploader};
use crate::context::Context;
use crate::copy::{copy_with_integrity, CopyLimits};
use crate::error::TransferError;

#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Provider rooted at the directory containing `path`, plus the file name as key
    pub fn for_file(path: &str) -> Result<(Self, String), TransferError> {
        let path = Path::new(path);
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::invalid_url(&path.to_string_lossy(), "no file name"))?
            .to_string();
        let root = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((Self::new(root), key))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`; leading `/` is ignored and `..` is rejected
    pub fn path_for(&self, key: &str) -> Result<PathBuf, TransferError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(TransferError::InvalidConfig(format!(
                        "key '{}' escapes the storage root",
                        key
                    )))
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl Downloader for LocalProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        _auth: &FeedAuthorization,
    ) -> Result<Download, TransferError> {
        let path = self.path_for(key)?;
        let file = match ctx.run(tokio::fs::File::open(&path)).await? {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(TransferError::NotFound(key.to_string()));
        }
        Ok(Download {
            reader: Box::pin(file),
            status: 0,
            content_length: Some(meta.len()),
        })
    }
}

#[async_trait]
impl Uploader for LocalProvider {
    async fn upload(&self, ctx: &Context, key: &str, mut reader: ByteStream) -> Result<(), TransferError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(TransferError::AlreadyExists(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        match copy_with_integrity(ctx, &mut reader, &mut file, CopyLimits::default()).await {
            Ok(summary) => {
                debug!("Wrote {} bytes to {}", summary.bytes, path.display());
                Ok(())
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Bucket for LocalProvider {
    async fn list_keys(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>, TransferError> {
        let root = self.root.clone();
        let prefix = prefix.trim_start_matches('/').to_string();
        let walk = tokio::task::spawn_blocking(move || -> Result<Vec<String>, TransferError> {
            let mut keys = Vec::new();
            if !root.exists() {
                return Ok(keys);
            }
            for entry in WalkDir::new(&root).follow_links(true) {
                let entry = entry.map_err(|e| TransferError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        });
        ctx.run(walk)
            .await?
            .map_err(|e| TransferError::TransferFailed(format!("directory walk failed: {}", e)))?
    }

    async fn exists(&self, ctx: &Context, key: &str) -> Result<bool, TransferError> {
        let path = self.path_for(key)?;
        match ctx.run(tokio::fs::metadata(&path)).await? {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
