//! Request dispatch and the authenticated fetch entry points
//!
//! A [`Request`] names one transfer: the URL, which non-HTTP schemes the caller
//! permits, a size cap and the credentials to apply. The dispatcher turns it
//! into a concrete [`Backend`] and a backend-relative key.

use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::context::Context;
use crate::copy::{copy_with_integrity, CopyLimits};
use crate::error::TransferError;
use crate::providers::{
    Backend, Download, FeedAuthorization, FtpProvider, HttpProvider, LocalProvider, S3Config, S3Provider, Secret,
};

/// One transfer intent
#[derive(Debug, Clone, Default)]
pub struct Request {
    url: String,
    allow_ftp: bool,
    allow_local: bool,
    allow_s3: bool,
    max_size: u64,
    secret: Secret,
    auth: FeedAuthorization,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn allow_ftp(mut self, allow: bool) -> Self {
        self.allow_ftp = allow;
        self
    }

    pub fn allow_local(mut self, allow: bool) -> Self {
        self.allow_local = allow;
        self
    }

    pub fn allow_s3(mut self, allow: bool) -> Self {
        self.allow_s3 = allow;
        self
    }

    /// Maximum body size in bytes; 0 means unlimited
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn secret(mut self, secret: Secret) -> Self {
        self.secret = secret;
        self
    }

    pub fn auth(mut self, auth: FeedAuthorization) -> Self {
        self.auth = auth;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pick the backend for this request's URL and inject the secret.
    ///
    /// Scheme and capability failures are returned before any I/O happens.
    pub fn backend(&self, config: &FetchConfig) -> Result<(Backend, String), TransferError> {
        let url = self.url.as_str();
        let (mut backend, key) = if url.starts_with("http://") || url.starts_with("https://") {
            (Backend::Http(HttpProvider::new(config)?), url.to_string())
        } else if url.starts_with("ftp://") {
            if !self.allow_ftp {
                return Err(TransferError::SchemeNotAllowed("ftp".to_string()));
            }
            let (provider, key) = FtpProvider::from_url(url)?;
            (Backend::Ftp(provider), key)
        } else if url.starts_with("s3://") {
            if !self.allow_s3 {
                return Err(TransferError::SchemeNotAllowed("s3".to_string()));
            }
            let mut s3 = S3Config::from_url(url)?;
            let key = std::mem::take(&mut s3.prefix);
            if key.is_empty() {
                return Err(TransferError::invalid_url(url, "missing object key"));
            }
            (Backend::S3(S3Provider::new(s3)?), key)
        } else {
            if !self.allow_local {
                let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or("file");
                return Err(TransferError::SchemeNotAllowed(scheme.to_string()));
            }
            let path = url.strip_prefix("file://").unwrap_or(url);
            let (provider, key) = LocalProvider::for_file(path)?;
            (Backend::Local(provider), key)
        };

        if let Some(setter) = backend.secret_setter() {
            setter.set_secret(self.secret.clone())?;
        }
        debug!("Dispatching {} request for key {}", backend.kind(), key);
        Ok((backend, key))
    }

    /// One authenticated download through the matching backend
    pub async fn download(&self, ctx: &Context, config: &FetchConfig) -> Result<Download, TransferError> {
        let (backend, key) = self.backend(config)?;
        backend.downloader().download_auth(ctx, &key, &self.auth).await
    }
}

/// Summary of one fetch.
///
/// `fetch_error` holds a backend or transfer failure; when it is set,
/// `response_size` and `response_sha1` are zeroed and must not be used.
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub url: String,
    /// HTTP status, or 0 where the protocol has none
    pub response_code: u16,
    /// Bytes written to the destination
    pub response_size: u64,
    /// Lowercase hex SHA-1 of the body
    pub response_sha1: String,
    pub fetch_time_ms: u64,
    /// Time to first byte
    pub ttfb_ms: u64,
    pub fetch_error: Option<TransferError>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.fetch_error.is_none()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}

async fn fetch_into<W>(
    ctx: &Context,
    out: &mut W,
    request: &Request,
    backend: &Backend,
    key: &str,
    result: &mut FetchResponse,
    started: Instant,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let download = backend.downloader().download_auth(ctx, key, &request.auth).await?;
    result.response_code = download.status;
    result.ttfb_ms = elapsed_ms(started);

    let limits = CopyLimits::new(request.max_size, download.content_length);
    let mut reader = download.reader;
    let summary = copy_with_integrity(ctx, &mut reader, out, limits).await?;
    result.response_size = summary.bytes;
    result.response_sha1 = summary.sha1;
    Ok(())
}

/// Fetch `request` into `out` under the configured overall deadline.
///
/// Configuration, capability and context failures are returned as `Err`.
/// Anything else is recorded in [`FetchResponse::fetch_error`].
pub async fn authenticated_request<W>(
    ctx: &Context,
    out: &mut W,
    request: &Request,
    config: &FetchConfig,
) -> Result<FetchResponse, TransferError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let (backend, key) = request.backend(config)?;
    run_fetch(ctx, out, request, &backend, &key, config).await
}

async fn run_fetch<W>(
    ctx: &Context,
    out: &mut W,
    request: &Request,
    backend: &Backend,
    key: &str,
    config: &FetchConfig,
) -> Result<FetchResponse, TransferError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let ctx = ctx.with_timeout(config.request_timeout);
    let started = Instant::now();
    let mut result = FetchResponse {
        url: request.url.clone(),
        ..Default::default()
    };

    match fetch_into(&ctx, out, request, backend, key, &mut result, started).await {
        Ok(()) => {}
        Err(e) if e.is_fatal_to_caller() => return Err(e),
        Err(e) => {
            if let Some(status) = e.status() {
                result.response_code = status;
            }
            result.response_size = 0;
            result.response_sha1.clear();
            result.fetch_error = Some(e);
        }
    }
    result.fetch_time_ms = elapsed_ms(started);
    Ok(result)
}

/// Like [`authenticated_request`], writing to `path` only when the fetch succeeds.
///
/// The body goes to a temp file beside `path` which is renamed into place on
/// success and removed otherwise.
pub async fn authenticated_request_to_file(
    ctx: &Context,
    path: impl AsRef<Path>,
    request: &Request,
    config: &FetchConfig,
) -> Result<FetchResponse, TransferError> {
    let path = path.as_ref();
    let (backend, key) = request.backend(config)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let (std_file, temp_path) = tempfile::NamedTempFile::new_in(&dir)?.into_parts();
    let mut file = tokio::fs::File::from_std(std_file);

    let result = run_fetch(ctx, &mut file, request, &backend, &key, config).await?;
    if !result.is_success() {
        return Ok(result);
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    temp_path.persist(path).map_err(|e| TransferError::Io(e.error))?;
    info!(
        "Fetched {} ({} bytes, sha1 {}) to {}",
        result.url,
        result.response_size,
        result.response_sha1,
        path.display()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::BackendKind;

    #[test]
    fn test_dispatch_by_scheme() {
        let config = FetchConfig::default();

        let (backend, key) = Request::new("https://example.com/feed.zip").backend(&config).unwrap();
        assert_eq!(backend.kind(), BackendKind::Http);
        assert_eq!(key, "https://example.com/feed.zip");

        let (backend, key) = Request::new("ftp://ftp.example.com/pub/feed.zip")
            .allow_ftp(true)
            .backend(&config)
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Ftp);
        assert_eq!(key, "/pub/feed.zip");

        let (backend, key) = Request::new("s3://bucket/path/feed.zip?region=us-east-2")
            .allow_s3(true)
            .backend(&config)
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::S3);
        assert_eq!(key, "path/feed.zip");

        let (backend, key) = Request::new("file:///tmp/feeds/feed.zip")
            .allow_local(true)
            .backend(&config)
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
        assert_eq!(key, "feed.zip");
    }

    #[test]
    fn test_dispatch_capability_gates() {
        let config = FetchConfig::default();
        for (url, scheme) in [
            ("ftp://ftp.example.com/feed.zip", "ftp"),
            ("s3://bucket/feed.zip", "s3"),
            ("/tmp/feed.zip", "file"),
            ("az://acct/container/feed.zip", "az"),
        ] {
            match Request::new(url).backend(&config) {
                Err(TransferError::SchemeNotAllowed(s)) => assert_eq!(s, scheme),
                other => panic!("{url}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_disallowed_scheme_is_returned_not_recorded() {
        let mut out = Vec::new();
        let err = authenticated_request(
            &Context::background(),
            &mut out,
            &Request::new("ftp://ftp.example.com/feed.zip"),
            &FetchConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::SchemeNotAllowed(_)));
    }

    #[tokio::test]
    async fn test_disallowed_scheme_leaves_no_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/deeper/feed.zip");
        let err = authenticated_request_to_file(
            &Context::background(),
            &dest,
            &Request::new("ftp://ftp.example.com/feed.zip"),
            &FetchConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::SchemeNotAllowed(_)), "{err:?}");
        assert!(!dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_local_fetch_records_hash() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("feed.txt");
        std::fs::write(&source, b"hello world").unwrap();

        let mut out = Vec::new();
        let request = Request::new(source.to_string_lossy().to_string()).allow_local(true);
        let result = authenticated_request(&Context::background(), &mut out, &request, &FetchConfig::default())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.response_size, 11);
        assert_eq!(result.response_sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new(dir.path().join("nope.zip").to_string_lossy().to_string()).allow_local(true);
        let dest = dir.path().join("out/feed.zip");
        let result = authenticated_request_to_file(&Context::background(), &dest, &request, &FetchConfig::default())
            .await
            .unwrap();
        assert!(matches!(result.fetch_error, Some(TransferError::NotFound(_))));
        assert_eq!(result.response_size, 0);
        assert!(result.response_sha1.is_empty());
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }
}
