//! HTTP(S) Backend
//!
//! Authenticated GET with 429 retry/backoff. The secret is applied according
//! to the feed's [`FeedAuthorization`]: query parameter, `{}` path segment,
//! header, Basic auth, or a full replacement URL.
//!
//! `url::Url` drops default ports (`:443` for https, `:80` for http) when it
//! parses special-scheme URLs, and reqwest derives the `Host` header from the
//! URL of every hop, so pre-signed redirect targets see the canonical host.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use super::{
    response_reader, send_with_retry, AuthType, BackendKind, Download, Downloader, FeedAuthorization,
    RetryConfig, Secret, SecretSetter,
};
use crate::config::FetchConfig;
use crate::context::Context;
use crate::error::TransferError;

pub const MAX_REDIRECTS: usize = 10;

/// Prefers archive payloads while still accepting anything
const ACCEPT_VALUE: &str =
    "application/zip,application/x-zip-compressed,application/octet-stream;q=0.9,*/*;q=0.8";

pub struct HttpProvider {
    client: Client,
    retry: RetryConfig,
    secret: Secret,
}

impl HttpProvider {
    pub fn new(config: &FetchConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self::with_client(client, config.retry))
    }

    pub fn with_client(client: Client, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            secret: Secret::default(),
        }
    }

    /// Final request URL for `raw` after URL-level auth is applied
    pub fn prepare_url(&self, raw: &str, auth: &FeedAuthorization) -> Result<Url, TransferError> {
        let raw = match auth.auth_type {
            AuthType::ReplaceUrl => self.secret.replace_url.expose_secret(),
            _ => raw,
        };
        let mut url = Url::parse(raw).map_err(|e| TransferError::invalid_url(raw, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::invalid_url(raw, "expected http or https"));
        }

        let key = self.secret.key.expose_secret();
        match auth.auth_type {
            AuthType::QueryParam => {
                let name = required_param_name(auth)?;
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != name)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(name, key);
            }
            AuthType::PathSegment => {
                let encoded = urlencoding::encode(key);
                let path = url
                    .path()
                    .replace("%7B%7D", &encoded)
                    .replace("{}", &encoded);
                url.set_path(&path);
            }
            _ => {}
        }
        Ok(url)
    }

    fn build_request(&self, url: Url, auth: &FeedAuthorization) -> Result<reqwest::Request, TransferError> {
        let mut builder = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE))
            .header(ACCEPT_LANGUAGE, HeaderValue::from_static(""));

        match auth.auth_type {
            AuthType::Header => {
                let name = HeaderName::from_bytes(required_param_name(auth)?.as_bytes())
                    .map_err(|e| TransferError::InvalidConfig(format!("Invalid header name: {}", e)))?;
                let mut value = HeaderValue::from_str(self.secret.key.expose_secret())
                    .map_err(|e| TransferError::InvalidConfig(format!("Invalid header value: {}", e)))?;
                value.set_sensitive(true);
                builder = builder.header(name, value);
            }
            AuthType::BasicAuth => {
                builder = builder.basic_auth(&self.secret.username, Some(self.secret.password.expose_secret()));
            }
            _ => {}
        }
        Ok(builder.build()?)
    }
}

fn required_param_name(auth: &FeedAuthorization) -> Result<&str, TransferError> {
    let name = auth.param_name.trim();
    if name.is_empty() {
        return Err(TransferError::InvalidConfig(format!(
            "authorization type '{}' requires param_name",
            auth.auth_type
        )));
    }
    Ok(name)
}

impl SecretSetter for HttpProvider {
    fn set_secret(&mut self, secret: Secret) -> Result<(), TransferError> {
        self.secret = secret;
        Ok(())
    }
}

#[async_trait]
impl Downloader for HttpProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        auth: &FeedAuthorization,
    ) -> Result<Download, TransferError> {
        let url = self.prepare_url(key, auth)?;
        debug!("HTTP GET {} (auth: {:?})", url.host_str().unwrap_or_default(), auth.auth_type);
        let request = self.build_request(url, auth)?;
        let response = send_with_retry(ctx, &self.client, request, &self.retry).await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        Ok(Download {
            reader: response_reader(response),
            status,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(secret: Secret) -> HttpProvider {
        let mut p = HttpProvider::new(&FetchConfig::default()).unwrap();
        p.set_secret(secret).unwrap();
        p
    }

    #[test]
    fn test_query_param_replaces_existing_value() {
        let p = provider(Secret::with_key("s3cret"));
        let auth = FeedAuthorization::new(AuthType::QueryParam, "api_key");
        let url = p
            .prepare_url("https://example.com/feed.zip?api_key=old&v=2", &auth)
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed.zip?v=2&api_key=s3cret");
    }

    #[test]
    fn test_query_param_requires_name() {
        let p = provider(Secret::with_key("s3cret"));
        let auth = FeedAuthorization::new(AuthType::QueryParam, "");
        let err = p.prepare_url("https://example.com/feed.zip", &auth).unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfig(_)));
    }

    #[test]
    fn test_path_segment_substitution() {
        let p = provider(Secret::with_key("abc 123"));
        let auth = FeedAuthorization::new(AuthType::PathSegment, "");
        let url = p.prepare_url("https://example.com/keys/{}/gtfs.zip", &auth).unwrap();
        assert_eq!(url.as_str(), "https://example.com/keys/abc%20123/gtfs.zip");
    }

    #[test]
    fn test_replace_url() {
        let p = provider(Secret::with_replace_url("https://mirror.example.org/real.zip"));
        let auth = FeedAuthorization::new(AuthType::ReplaceUrl, "");
        let url = p.prepare_url("https://example.com/placeholder.zip", &auth).unwrap();
        assert_eq!(url.as_str(), "https://mirror.example.org/real.zip");

        let bad = provider(Secret::with_replace_url("not a url"));
        let err = bad.prepare_url("https://example.com/placeholder.zip", &auth).unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl { .. }));
    }

    #[test]
    fn test_default_port_is_dropped() {
        let p = provider(Secret::default());
        let auth = FeedAuthorization::default();
        let url = p.prepare_url("https://example.com:443/feed.zip", &auth).unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed.zip");
        let url = p.prepare_url("http://example.com:80/feed.zip", &auth).unwrap();
        assert_eq!(url.as_str(), "http://example.com/feed.zip");
        let url = p.prepare_url("http://example.com:8080/feed.zip", &auth).unwrap();
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_request_headers() {
        let p = provider(Secret::with_key("tok"));
        let auth = FeedAuthorization::new(AuthType::Header, "x-api-key");
        let url = p.prepare_url("https://example.com/feed.zip", &auth).unwrap();
        let request = p.build_request(url, &auth).unwrap();
        assert_eq!(request.headers()["x-api-key"], "tok");
        assert_eq!(request.headers()[ACCEPT], ACCEPT_VALUE);
        assert_eq!(request.headers()[ACCEPT_LANGUAGE], "");
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let p = provider(Secret::default());
        let err = p
            .prepare_url("ftp://example.com/feed.zip", &FeedAuthorization::default())
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl { .. }));
    }
}
