//! Backend-agnostic bucket facade
//!
//! Opens a [`Bucket`] by URL scheme and offers whole-tree transfers on top of
//! the per-key download/upload/list operations.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::copy::{copy_with_integrity, CopyLimits};
use crate::error::TransferError;
use crate::providers::{
    join_key, AzureProvider, Bucket, Downloader, LocalProvider, S3Provider, Secret, SecretSetter, Uploader,
};

/// Open the bucket addressed by `url`: `s3://`, `az://`, `file://` or a bare path
pub fn open_store(url: &str) -> Result<Box<dyn Bucket>, TransferError> {
    open_store_with_secret(url, None)
}

/// Like [`open_store`], with credentials that take precedence over the environment
pub fn open_store_with_secret(url: &str, secret: Option<&Secret>) -> Result<Box<dyn Bucket>, TransferError> {
    if url.starts_with("s3://") {
        let mut provider = S3Provider::from_url(url)?;
        if let Some(secret) = secret {
            provider.set_secret(secret.clone())?;
        }
        return Ok(Box::new(provider));
    }
    if url.starts_with("az://") {
        let mut provider = AzureProvider::from_url(url)?;
        if let Some(secret) = secret {
            provider.set_secret(secret.clone())?;
        }
        return Ok(Box::new(provider));
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(LocalProvider::new(path)));
    }
    if let Some((scheme, _)) = url.split_once("://") {
        return Err(TransferError::SchemeNotAllowed(scheme.to_string()));
    }
    Ok(Box::new(LocalProvider::new(url)))
}

/// Key relative to `prefix`, or `None` when `key` lies outside it
fn relative_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(key.trim_start_matches('/'));
    }
    let rest = key.trim_start_matches('/').strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    rest.strip_prefix('/')
}

/// Download every key under `prefix` accepted by `predicate` into `dest_dir`.
///
/// The predicate sees keys relative to `prefix`; the same relative path is
/// used beneath `dest_dir`. Returns the relative keys written.
pub async fn download_all<P>(
    ctx: &Context,
    bucket: &dyn Bucket,
    prefix: &str,
    dest_dir: &Path,
    predicate: P,
) -> Result<Vec<String>, TransferError>
where
    P: Fn(&str) -> bool + Send + Sync,
{
    let keys = bucket.list_keys(ctx, prefix).await?;
    let staging = LocalProvider::new(dest_dir);
    let mut written = Vec::new();

    for key in keys {
        let Some(relative) = relative_key(prefix, &key) else {
            continue;
        };
        if !predicate(relative) {
            debug!("Skipping {}", key);
            continue;
        }
        let path = staging.path_for(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let download = bucket.download(ctx, &key).await?;
        let mut reader = download.reader;
        let mut file = tokio::fs::File::create(&path).await?;
        let limits = CopyLimits::new(0, download.content_length);
        let summary = match copy_with_integrity(ctx, &mut reader, &mut file, limits).await {
            Ok(summary) => summary,
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove partial download {}: {}", path.display(), rm);
                }
                return Err(e);
            }
        };
        debug!("Downloaded {} ({} bytes) to {}", key, summary.bytes, path.display());
        written.push(relative.to_string());
    }

    info!(
        "Downloaded {} {} from {} to {}",
        written.len(),
        if written.len() == 1 { "file" } else { "files" },
        bucket.kind(),
        dest_dir.display()
    );
    Ok(written)
}

/// Upload every file under `src_dir` accepted by `predicate` to `prefix`.
///
/// The predicate sees paths relative to `src_dir`, joined with `/`. Returns the
/// bucket keys written.
pub async fn upload_all<P>(
    ctx: &Context,
    bucket: &dyn Bucket,
    src_dir: &Path,
    prefix: &str,
    predicate: P,
) -> Result<Vec<String>, TransferError>
where
    P: Fn(&str) -> bool + Send + Sync,
{
    let source = LocalProvider::new(src_dir);
    let files = source.list_keys(ctx, "").await?;
    let mut written = Vec::new();

    for relative in files {
        if !predicate(&relative) {
            debug!("Skipping {}", relative);
            continue;
        }
        let file = tokio::fs::File::open(source.path_for(&relative)?).await?;
        let key = join_key(prefix, &relative);
        bucket.upload(ctx, &key, Box::pin(file)).await?;
        debug!("Uploaded {} as {}", relative, key);
        written.push(key);
    }

    info!(
        "Uploaded {} {} from {} to {}",
        written.len(),
        if written.len() == 1 { "file" } else { "files" },
        src_dir.display(),
        bucket.kind()
    );
    Ok(written)
}

/// Presigned read URL for `key`, if the bucket supports presigning.
///
/// An empty `filename` uses the last path segment of `key`.
pub async fn create_signed_url(
    ctx: &Context,
    bucket: &dyn Bucket,
    key: &str,
    filename: &str,
) -> Result<String, TransferError> {
    let presigner = bucket.presigner().ok_or_else(|| {
        TransferError::NotSupported(format!("{} backend cannot create signed URLs", bucket.kind()))
    })?;
    let filename = if filename.is_empty() {
        key.rsplit('/').next().unwrap_or(key)
    } else {
        filename
    };
    let url = presigner.create_signed_url(ctx, key, filename).await?;
    info!("Created signed URL for {} on {}", key, bucket.kind());
    Ok(url)
}
