//! FTP Backend
//!
//! One connection per download using the suppaftp crate. The RETR data
//! connection is handed to the caller as it arrives; once it reaches EOF the
//! transfer is finalized on the control connection and the session closed.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::io;
use suppaftp::tokio::AsyncFtpStream;
use suppaftp::types::FileType;
use suppaftp::{FtpError, Status};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use super::{AuthType, BackendKind, Download, Downloader, FeedAuthorization, Secret, SecretSetter};
use crate::context::Context;
use crate::error::TransferError;

const DEFAULT_PORT: u16 = 21;
const ANONYMOUS: &str = "anonymous";
const READ_CHUNK: usize = 32 * 1024;

pub struct FtpProvider {
    host: String,
    port: u16,
    secret: Secret,
}

impl FtpProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secret: Secret::default(),
        }
    }

    /// Provider for the server in `url` plus the remote path to fetch
    pub fn from_url(url: &str) -> Result<(Self, String), TransferError> {
        let parsed = Url::parse(url).map_err(|e| TransferError::invalid_url(url, e))?;
        if parsed.scheme() != "ftp" {
            return Err(TransferError::invalid_url(url, "expected ftp scheme"));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransferError::invalid_url(url, "missing host"))?;
        let path = urlencoding::decode(parsed.path())
            .map_err(|e| TransferError::invalid_url(url, e))?
            .into_owned();
        Ok((Self::new(host, parsed.port().unwrap_or(DEFAULT_PORT)), path))
    }

    fn credentials<'a>(&'a self, auth: &FeedAuthorization) -> (&'a str, &'a str) {
        match auth.auth_type {
            AuthType::BasicAuth => (self.secret.username.as_str(), self.secret.password.expose_secret()),
            _ => (ANONYMOUS, ANONYMOUS),
        }
    }

    async fn connect(&self, ctx: &Context, auth: &FeedAuthorization) -> Result<AsyncFtpStream, TransferError> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = ctx
            .run(AsyncFtpStream::connect(&addr))
            .await?
            .map_err(|e| TransferError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        let (user, pass) = self.credentials(auth);
        ctx.run(stream.login(user, pass))
            .await?
            .map_err(|e| TransferError::ConnectionFailed(format!("login to {} failed: {}", addr, e)))?;

        ctx.run(stream.transfer_type(FileType::Binary))
            .await?
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;
        Ok(stream)
    }
}

fn retr_error(path: &str, err: FtpError) -> TransferError {
    match err {
        FtpError::UnexpectedResponse(ref resp) if resp.status == Status::FileUnavailable => {
            TransferError::NotFound(path.to_string())
        }
        other => TransferError::TransferFailed(other.to_string()),
    }
}

impl SecretSetter for FtpProvider {
    fn set_secret(&mut self, secret: Secret) -> Result<(), TransferError> {
        self.secret = secret;
        Ok(())
    }
}

#[async_trait]
impl Downloader for FtpProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Ftp
    }

    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        auth: &FeedAuthorization,
    ) -> Result<Download, TransferError> {
        let mut stream = self.connect(ctx, auth).await?;

        // SIZE is optional; without it truncation cannot be detected
        let content_length = match ctx.run(stream.size(key)).await? {
            Ok(size) => Some(size as u64),
            Err(e) => {
                debug!("FTP SIZE {} on {} unavailable: {}", key, self.host, e);
                None
            }
        };

        debug!("FTP RETR {} from {}", key, self.host);
        let data_stream = ctx
            .run(stream.retr_as_stream(key))
            .await?
            .map_err(|e| retr_error(key, e))?;

        let host = self.host.clone();
        let body = futures_util::stream::try_unfold(
            (stream, data_stream, host),
            |(mut control, mut data, host)| async move {
                let mut buf = vec![0u8; READ_CHUNK];
                let n = match data.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => return Err(e),
                };
                if n > 0 {
                    buf.truncate(n);
                    return Ok(Some((VecDeque::from(buf), (control, data, host))));
                }

                if let Err(e) = control.finalize_retr_stream(data).await {
                    return Err(io::Error::other(format!("FTP transfer did not complete: {}", e)));
                }
                if let Err(e) = control.quit().await {
                    warn!("FTP QUIT to {} failed: {}", host, e);
                }
                Ok(None)
            },
        );

        Ok(Download {
            reader: Box::pin(StreamReader::new(body)),
            status: 0,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let (provider, key) = FtpProvider::from_url("ftp://ftp.example.com/pub/gtfs%20feed.zip").unwrap();
        assert_eq!(provider.host, "ftp.example.com");
        assert_eq!(provider.port, 21);
        assert_eq!(key, "/pub/gtfs feed.zip");

        let (provider, _) = FtpProvider::from_url("ftp://ftp.example.com:2121/x").unwrap();
        assert_eq!(provider.port, 2121);
    }

    #[test]
    fn test_anonymous_unless_basic_auth() {
        let mut provider = FtpProvider::new("ftp.example.com", 21);
        provider.set_secret(Secret::with_login("alice", "pw")).unwrap();
        assert_eq!(provider.credentials(&FeedAuthorization::default()), (ANONYMOUS, ANONYMOUS));
        let basic = FeedAuthorization::new(AuthType::BasicAuth, "");
        assert_eq!(provider.credentials(&basic), ("alice", "pw"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let provider = FtpProvider::new("127.0.0.1", port);
        let err = provider
            .download(&Context::background(), "/feed.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ConnectionFailed(_)), "{err:?}");
    }
}
