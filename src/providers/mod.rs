//! Transfer Backends Module
//!
//! Every protocol implements the same minimal contract so callers can move
//! bytes without knowing where they live.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │          Downloader / Uploader traits         │
//! │   download, download_auth, upload             │
//! └───────────────────────────────────────────────┘
//!                        │
//!    ┌───────┬───────────┼──────────┬──────────┐
//!    ▼       ▼           ▼          ▼          ▼
//! ┌──────┐ ┌─────┐ ┌──────────┐ ┌───────┐ ┌───────┐
//! │ HTTP │ │ FTP │ │    S3    │ │ Azure │ │ Local │
//! └──────┘ └─────┘ └──────────┘ └───────┘ └───────┘
//! ```
//!
//! Optional capabilities are separate traits queried at runtime:
//! [`SecretSetter`] for credential injection, [`Bucket`] for listing, and
//! [`Presigner`] for time-limited URLs.

pub mod types;
pub mod http_retry;
pub mod http;
pub mod ftp;
pub mod s3;
pub mod azure;
pub mod local;
mod xml;

pub use types::*;
pub use http_retry::{parse_retry_after, send_with_retry, RetryConfig};
pub use http::HttpProvider;
pub use ftp::FtpProvider;
pub use s3::S3Provider;
pub use azure::AzureProvider;
pub use local::LocalProvider;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::fmt;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tokio_util::io::StreamReader;

use crate::context::Context;
use crate::copy::{copy_with_integrity, CopyLimits};
use crate::error::TransferError;

/// Readable body handed back by a download
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// An open download: the body plus what the backend knows about it
pub struct Download {
    pub reader: ByteStream,
    /// HTTP status, or the protocol's closest equivalent (0 when not applicable)
    pub status: u16,
    /// Declared length, used for truncation checks
    pub content_length: Option<u64>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open `key` for reading with no extra authorization
    async fn download(&self, ctx: &Context, key: &str) -> Result<Download, TransferError> {
        self.download_auth(ctx, key, &FeedAuthorization::default()).await
    }

    /// Open `key` for reading, applying the injected secret as `auth` describes
    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        auth: &FeedAuthorization,
    ) -> Result<Download, TransferError>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Store everything readable from `reader` under `key`
    async fn upload(&self, ctx: &Context, key: &str, reader: ByteStream) -> Result<(), TransferError>;
}

/// Credential injection capability
pub trait SecretSetter {
    fn set_secret(&mut self, secret: Secret) -> Result<(), TransferError>;
}

/// Presigned URL capability
#[async_trait]
pub trait Presigner: Send + Sync {
    /// Read-only URL for `key`, served as an attachment named `filename`
    async fn create_signed_url(
        &self,
        ctx: &Context,
        key: &str,
        filename: &str,
    ) -> Result<String, TransferError>;
}

/// A keyed object namespace: download, upload and enumerate
#[async_trait]
pub trait Bucket: Downloader + Uploader {
    /// Keys under `prefix`, relative to the bucket root
    async fn list_keys(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>, TransferError>;

    async fn exists(&self, ctx: &Context, key: &str) -> Result<bool, TransferError>;

    /// Presigning support, if this backend has it
    fn presigner(&self) -> Option<&dyn Presigner> {
        None
    }
}

/// Concrete backend chosen by the dispatcher
pub enum Backend {
    Http(HttpProvider),
    Ftp(FtpProvider),
    S3(S3Provider),
    Azure(AzureProvider),
    Local(LocalProvider),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        self.downloader().kind()
    }

    pub fn downloader(&self) -> &dyn Downloader {
        match self {
            Backend::Http(p) => p,
            Backend::Ftp(p) => p,
            Backend::S3(p) => p,
            Backend::Azure(p) => p,
            Backend::Local(p) => p,
        }
    }

    /// Credential injection, when the backend accepts it
    pub fn secret_setter(&mut self) -> Option<&mut dyn SecretSetter> {
        match self {
            Backend::Http(p) => Some(p),
            Backend::Ftp(p) => Some(p),
            Backend::S3(p) => Some(p),
            Backend::Azure(p) => Some(p),
            Backend::Local(_) => None,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.kind())
    }
}

/// Join a caller key onto a backend prefix.
///
/// Leading slashes on the key are dropped and runs of `/` collapse, so `"/a"`
/// and `"a"` address the same object.
pub fn join_key(prefix: &str, key: &str) -> String {
    prefix
        .split('/')
        .chain(key.split('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Adapt a response body into a [`ByteStream`]
pub(crate) fn response_reader(response: reqwest::Response) -> ByteStream {
    let body = response.bytes_stream().map_err(body_error);
    Box::pin(StreamReader::new(body))
}

/// Body errors keep the kind of the underlying I/O failure. A connection that
/// ends mid-body surfaces as `UnexpectedEof` so the copy can report truncation.
fn body_error(err: reqwest::Error) -> io::Error {
    if err.is_timeout() {
        return io::Error::new(io::ErrorKind::TimedOut, err);
    }
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return io::Error::new(io_err.kind(), err.to_string());
        }
        source = cause.source();
    }
    io::Error::new(io::ErrorKind::UnexpectedEof, err)
}

/// Copy `reader` into an anonymous temp file and rewind it.
///
/// Used where the protocol needs the full length up front (S3, Azure uploads)
/// or the transfer must be finished before the body is handed out (FTP).
pub(crate) async fn spool_to_tempfile(
    ctx: &Context,
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<(tokio::fs::File, u64), TransferError> {
    let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
    let summary = copy_with_integrity(ctx, reader, &mut file, CopyLimits::default()).await?;
    file.seek(io::SeekFrom::Start(0)).await?;
    Ok((file, summary.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_join_key_normalizes_slashes() {
        assert_eq!(join_key("feeds", "/a/b"), join_key("feeds", "a/b"));
        assert_eq!(join_key("feeds/", "//a//b"), "feeds/a/b");
        assert_eq!(join_key("", "/a"), "a");
        assert_eq!(join_key("/root/", ""), "root");
    }

    #[tokio::test]
    async fn test_spool_rewinds() {
        let mut source: &[u8] = b"spooled bytes";
        let (mut file, len) = spool_to_tempfile(&Context::background(), &mut source).await.unwrap();
        assert_eq!(len, 13);
        let mut back = String::new();
        file.read_to_string(&mut back).await.unwrap();
        assert_eq!(back, "spooled bytes");
    }
}
