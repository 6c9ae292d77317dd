//! Azure Blob Storage Backend
//!
//! REST API over reqwest. Supports Shared Key, SAS token and OAuth bearer
//! authentication. Presigned URLs are user delegation SAS when a bearer token
//! is available, otherwise service SAS signed with the account key.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use sha2::Sha256;
use tracing::{debug, info};
use url::Url;

use super::xml::{parse_fields, parse_listing};
use super::{
    join_key, response_reader, spool_to_tempfile, AzureConfig, BackendKind, Bucket, ByteStream, Download,
    Downloader, FeedAuthorization, Presigner, Secret, SecretSetter, Uploader,
};
use crate::context::Context;
use crate::error::TransferError;

type HmacSha256 = Hmac<Sha256>;

/// REST API version
const API_VERSION: &str = "2024-11-04";

/// Signed version used for SAS tokens
const SAS_VERSION: &str = "2020-12-06";

pub const PRESIGN_EXPIRY_SECS: i64 = 3600;

/// Start time is backdated to tolerate clock skew
const PRESIGN_SKEW_SECS: i64 = 10;

const SAS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn invalid_header(e: impl std::fmt::Display) -> TransferError {
    TransferError::InvalidConfig(format!("Invalid header value: {}", e))
}

fn sign_base64(key_b64: &str, data: &str) -> Result<String, TransferError> {
    let key = BASE64
        .decode(key_b64.trim())
        .map_err(|e| TransferError::InvalidConfig(format!("Invalid access key: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| TransferError::InvalidConfig(format!("HMAC error: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Parameters shared by both SAS flavours
struct SasWindow {
    start: String,
    expiry: String,
    disposition: String,
}

impl SasWindow {
    fn new(now: DateTime<Utc>, filename: &str) -> Self {
        Self {
            start: (now - chrono::Duration::seconds(PRESIGN_SKEW_SECS))
                .format(SAS_TIME_FORMAT)
                .to_string(),
            expiry: (now + chrono::Duration::seconds(PRESIGN_EXPIRY_SECS))
                .format(SAS_TIME_FORMAT)
                .to_string(),
            disposition: format!("attachment; filename=\"{}\"", filename),
        }
    }
}

/// Key returned by Get User Delegation Key
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelegationKey {
    object_id: String,
    tenant_id: String,
    start: String,
    expiry: String,
    service: String,
    version: String,
    value: String,
}

impl DelegationKey {
    fn from_xml(xml: &str) -> Result<Self, TransferError> {
        let mut fields = parse_fields(
            xml,
            &[
                "SignedOid",
                "SignedTid",
                "SignedStart",
                "SignedExpiry",
                "SignedService",
                "SignedVersion",
                "Value",
            ],
        )?;
        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| TransferError::Parse(format!("user delegation key missing {}", name)))
        };
        Ok(Self {
            object_id: take("SignedOid")?,
            tenant_id: take("SignedTid")?,
            start: take("SignedStart")?,
            expiry: take("SignedExpiry")?,
            service: take("SignedService")?,
            version: take("SignedVersion")?,
            value: take("Value")?,
        })
    }
}

pub struct AzureProvider {
    config: AzureConfig,
    client: Client,
}

impl AzureProvider {
    pub fn new(config: AzureConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(crate::config::DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn from_url(url: &str) -> Result<Self, TransferError> {
        Self::new(AzureConfig::from_url(url)?)
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    pub fn full_key(&self, key: &str) -> String {
        join_key(&self.config.prefix, key)
    }

    /// Build the full blob URL (container URL when `blob_path` is empty)
    fn blob_url(&self, blob_path: &str) -> Result<Url, TransferError> {
        let endpoint = self.config.blob_endpoint();
        let encoded = blob_path
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let raw = if encoded.is_empty() {
            format!("{}/{}", endpoint, self.config.container)
        } else {
            format!("{}/{}/{}", endpoint, self.config.container, encoded)
        };
        Url::parse(&raw).map_err(|e| TransferError::invalid_url(&raw, e))
    }

    /// Build canonicalized headers string: every `x-ms-*` header, lowercased and sorted
    fn build_canonical_headers(headers: &HeaderMap) -> String {
        let mut x_ms_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or("").trim().to_string(),
                )
            })
            .collect();
        x_ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
        x_ms_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect()
    }

    /// Shared Key `Authorization` value
    fn shared_key_auth(
        &self,
        key: &str,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        content_length: u64,
    ) -> Result<String, TransferError> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let mut query_parts: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        query_parts.sort();
        let query_str: String = query_parts
            .iter()
            .map(|(k, v)| format!("\n{}:{}", k, v))
            .collect();

        let string_to_sign = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}/{}{}{}",
            method.as_str(),
            if content_length > 0 { content_length.to_string() } else { String::new() },
            content_type,
            Self::build_canonical_headers(headers),
            self.config.account_name,
            url.path(),
            query_str,
        );
        let signature = sign_base64(key, &string_to_sign)?;
        Ok(format!("SharedKey {}:{}", self.config.account_name, signature))
    }

    /// Send one request with whichever credential is configured
    async fn send(
        &self,
        ctx: &Context,
        method: Method,
        mut url: Url,
        mut headers: HeaderMap,
        body: Option<(reqwest::Body, u64)>,
    ) -> Result<reqwest::Response, TransferError> {
        let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        headers.insert("x-ms-date", HeaderValue::from_str(&now).map_err(invalid_header)?);
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        let content_length = body.as_ref().map(|(_, len)| *len).unwrap_or(0);
        if body.is_some() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        }

        if let Some(ref sas) = self.config.sas_token {
            let query = match url.query() {
                Some(q) if !q.is_empty() => format!("{}&{}", q, sas.expose_secret()),
                _ => sas.expose_secret().to_string(),
            };
            url.set_query(Some(&query));
        } else if let Some(ref key) = self.config.access_key {
            let auth = self.shared_key_auth(key.expose_secret(), &method, &url, &headers, content_length)?;
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth).map_err(invalid_header)?);
        } else if let Some(ref token) = self.config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(invalid_header)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        debug!("Azure {} {}", method, url.path());
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some((body, _)) = body {
            builder = builder.body(body);
        }
        let request = builder.build()?;
        Ok(ctx.run(self.client.execute(request)).await??)
    }

    fn status_error(status: StatusCode, url: &Url) -> TransferError {
        let mut url = url.clone();
        url.set_query(None);
        TransferError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }

    /// Get User Delegation Key, valid for the SAS window
    async fn user_delegation_key(&self, ctx: &Context, window: &SasWindow) -> Result<DelegationKey, TransferError> {
        let raw = format!("{}/?restype=service&comp=userdelegationkey", self.config.blob_endpoint());
        let url = Url::parse(&raw).map_err(|e| TransferError::invalid_url(&raw, e))?;
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>",
            window.start, window.expiry
        );
        let len = body.len() as u64;

        // Only the bearer token may request a delegation key
        let token = self
            .config
            .bearer_token
            .as_ref()
            .ok_or_else(|| TransferError::NotSupported("user delegation SAS without a bearer token".to_string()))?;
        let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())).map_err(invalid_header)?;
        auth.set_sensitive(true);

        let request = self
            .client
            .post(url.clone())
            .header("x-ms-date", HeaderValue::from_str(&now).map_err(invalid_header)?)
            .header("x-ms-version", API_VERSION)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .build()?;
        let response = ctx.run(self.client.execute(request)).await??;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, &url));
        }
        let xml = ctx.run(response.text()).await??;
        DelegationKey::from_xml(&xml)
    }

    fn canonical_sas_resource(&self, full_key: &str) -> String {
        format!("/blob/{}/{}/{}", self.config.account_name, self.config.container, full_key)
    }

    fn service_sas(&self, full_key: &str, account_key: &str, window: &SasWindow) -> Result<String, TransferError> {
        let string_to_sign = [
            "r",
            &window.start,
            &window.expiry,
            &self.canonical_sas_resource(full_key),
            "", // signedIdentifier
            "", // signedIP
            "https",
            SAS_VERSION,
            "b",
            "", // snapshot time
            "", // encryption scope
            "", // rscc
            &window.disposition,
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n");
        let signature = sign_base64(account_key, &string_to_sign)?;

        Ok(format!(
            "sp=r&st={}&se={}&spr=https&sv={}&sr=b&rscd={}&sig={}",
            urlencoding::encode(&window.start),
            urlencoding::encode(&window.expiry),
            SAS_VERSION,
            urlencoding::encode(&window.disposition),
            urlencoding::encode(&signature),
        ))
    }

    fn user_delegation_sas(
        &self,
        full_key: &str,
        key: &DelegationKey,
        window: &SasWindow,
    ) -> Result<String, TransferError> {
        let string_to_sign = [
            "r",
            &window.start,
            &window.expiry,
            &self.canonical_sas_resource(full_key),
            &key.object_id,
            &key.tenant_id,
            &key.start,
            &key.expiry,
            &key.service,
            &key.version,
            "", // authorized user object id
            "", // unauthorized user object id
            "", // correlation id
            "", // signedIP
            "https",
            SAS_VERSION,
            "b",
            "", // snapshot time
            "", // encryption scope
            "", // rscc
            &window.disposition,
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n");
        let signature = sign_base64(&key.value, &string_to_sign)?;

        Ok(format!(
            "sp=r&st={}&se={}&skoid={}&sktid={}&skt={}&ske={}&sks={}&skv={}&spr=https&sv={}&sr=b&rscd={}&sig={}",
            urlencoding::encode(&window.start),
            urlencoding::encode(&window.expiry),
            urlencoding::encode(&key.object_id),
            urlencoding::encode(&key.tenant_id),
            urlencoding::encode(&key.start),
            urlencoding::encode(&key.expiry),
            urlencoding::encode(&key.service),
            urlencoding::encode(&key.version),
            SAS_VERSION,
            urlencoding::encode(&window.disposition),
            urlencoding::encode(&signature),
        ))
    }
}

impl SecretSetter for AzureProvider {
    fn set_secret(&mut self, secret: Secret) -> Result<(), TransferError> {
        self.config.apply_secret(&secret);
        Ok(())
    }
}

#[async_trait]
impl Downloader for AzureProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Azure
    }

    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        _auth: &FeedAuthorization,
    ) -> Result<Download, TransferError> {
        let url = self.blob_url(&self.full_key(key))?;
        let response = self
            .send(ctx, Method::GET, url.clone(), HeaderMap::new(), None)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, &url));
        }
        let content_length = response.content_length();
        Ok(Download {
            reader: response_reader(response),
            status: status.as_u16(),
            content_length,
        })
    }
}

#[async_trait]
impl Uploader for AzureProvider {
    async fn upload(&self, ctx: &Context, key: &str, mut reader: ByteStream) -> Result<(), TransferError> {
        let url = self.blob_url(&self.full_key(key))?;
        let (file, len) = spool_to_tempfile(ctx, &mut reader).await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
        let response = self
            .send(ctx, Method::PUT, url.clone(), headers, Some((body, len)))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, &url));
        }
        debug!("Azure uploaded {} bytes to {}", len, url.path());
        Ok(())
    }
}

#[async_trait]
impl Bucket for AzureProvider {
    async fn list_keys(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>, TransferError> {
        let root = self.config.prefix.as_str();
        let mut list_prefix = join_key(root, prefix);
        if !list_prefix.is_empty() && (prefix.is_empty() || prefix.ends_with('/')) {
            list_prefix.push('/');
        }

        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.blob_url("")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container").append_pair("comp", "list");
                if !list_prefix.is_empty() {
                    query.append_pair("prefix", &list_prefix);
                }
                if let Some(ref m) = marker {
                    query.append_pair("marker", m);
                }
            }

            let response = self
                .send(ctx, Method::GET, url.clone(), HeaderMap::new(), None)
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Self::status_error(status, &url));
            }
            let body = ctx.run(response.text()).await??;
            let page = parse_listing(&body, "Blob", "Name", "NextMarker")?;

            for full in page.names {
                let relative = if root.is_empty() {
                    full.as_str()
                } else {
                    match full.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
                        Some(rel) => rel,
                        None => continue,
                    }
                };
                if !relative.is_empty() {
                    keys.push(relative.to_string());
                }
            }

            match page.next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn exists(&self, ctx: &Context, key: &str) -> Result<bool, TransferError> {
        let url = self.blob_url(&self.full_key(key))?;
        let response = self
            .send(ctx, Method::HEAD, url.clone(), HeaderMap::new(), None)
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Self::status_error(s, &url)),
        }
    }

    fn presigner(&self) -> Option<&dyn Presigner> {
        Some(self)
    }
}

#[async_trait]
impl Presigner for AzureProvider {
    async fn create_signed_url(
        &self,
        ctx: &Context,
        key: &str,
        filename: &str,
    ) -> Result<String, TransferError> {
        let full_key = self.full_key(key);
        let window = SasWindow::new(Utc::now(), filename);

        let sas = if self.config.bearer_token.is_some() {
            let delegation = self.user_delegation_key(ctx, &window).await?;
            self.user_delegation_sas(&full_key, &delegation, &window)?
        } else if let Some(ref account_key) = self.config.access_key {
            self.service_sas(&full_key, account_key.expose_secret(), &window)?
        } else {
            return Err(TransferError::NotSupported(
                "Azure presigning needs an account key or bearer token".to_string(),
            ));
        };

        let mut url = self.blob_url(&full_key)?;
        url.set_query(Some(&sas));
        info!("Created SAS URL for {} (expires: {})", full_key, window.expiry);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;
    use secrecy::SecretString;

    const TEST_KEY: &str = "c2VjcmV0LWFjY291bnQta2V5LWZvci10ZXN0cw==";

    fn config(endpoint: Option<String>) -> AzureConfig {
        AzureConfig {
            account_name: "acct".to_string(),
            container: "feeds".to_string(),
            prefix: "daily".to_string(),
            access_key: Some(SecretString::from(TEST_KEY.to_string())),
            sas_token: None,
            bearer_token: None,
            endpoint,
        }
    }

    #[test]
    fn test_blob_url_encodes_segments() {
        let provider = AzureProvider::new(config(None)).unwrap();
        let url = provider.blob_url(&provider.full_key("/a b/c.zip")).unwrap();
        assert_eq!(url.as_str(), "https://acct.blob.core.windows.net/feeds/daily/a%20b/c.zip");
        assert_eq!(provider.full_key("/x"), provider.full_key("x"));
    }

    #[test]
    fn test_sas_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let window = SasWindow::new(now, "feed.zip");
        assert_eq!(window.start, "2024-03-01T11:59:50Z");
        assert_eq!(window.expiry, "2024-03-01T13:00:00Z");
        assert_eq!(window.disposition, "attachment; filename=\"feed.zip\"");
    }

    #[test]
    fn test_service_sas_parameters() {
        let provider = AzureProvider::new(config(None)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let window = SasWindow::new(now, "feed.zip");
        let sas = provider.service_sas("daily/feed.zip", TEST_KEY, &window).unwrap();
        assert!(sas.starts_with("sp=r&st=2024-03-01T11%3A59%3A50Z&se=2024-03-01T13%3A00%3A00Z&spr=https"));
        assert!(sas.contains("&sv=2020-12-06&sr=b&"));
        assert!(sas.contains("rscd=attachment%3B%20filename%3D%22feed.zip%22"));
        // Same inputs, same signature
        assert_eq!(sas, provider.service_sas("daily/feed.zip", TEST_KEY, &window).unwrap());
        assert_ne!(sas, provider.service_sas("daily/other.zip", TEST_KEY, &window).unwrap());
    }

    #[tokio::test]
    async fn test_presign_with_sas_credential_not_supported() {
        let mut cfg = config(None);
        cfg.access_key = None;
        cfg.sas_token = Some(SecretString::from("sv=2020&sig=x".to_string()));
        let provider = AzureProvider::new(cfg).unwrap();
        let err = provider
            .create_signed_url(&Context::background(), "feed.zip", "feed.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_presign_with_user_delegation_key() {
        let server = MockServer::start_async().await;
        let key_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .query_param("restype", "service")
                    .query_param("comp", "userdelegationkey")
                    .header("authorization", "Bearer token-123");
                then.status(200).body(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?><UserDelegationKey>\
                     <SignedOid>oid-1</SignedOid><SignedTid>tid-1</SignedTid>\
                     <SignedStart>2024-03-01T11:59:50Z</SignedStart><SignedExpiry>2024-03-01T13:00:00Z</SignedExpiry>\
                     <SignedService>b</SignedService><SignedVersion>2020-12-06</SignedVersion>\
                     <Value>c2VjcmV0</Value></UserDelegationKey>",
                );
            })
            .await;

        let mut cfg = config(Some(server.base_url()));
        cfg.access_key = None;
        cfg.bearer_token = Some(SecretString::from("token-123".to_string()));
        let provider = AzureProvider::new(cfg).unwrap();
        let url = provider
            .create_signed_url(&Context::background(), "feed.zip", "gtfs.zip")
            .await
            .unwrap();

        key_mock.assert_async().await;
        assert!(url.starts_with(&format!("{}/feeds/daily/feed.zip?sp=r&", server.base_url())));
        assert!(url.contains("skoid=oid-1&sktid=tid-1"));
        assert!(url.contains("&spr=https&sv=2020-12-06&sr=b&"));
        assert!(url.contains("rscd=attachment%3B%20filename%3D%22gtfs.zip%22"));
    }

    #[tokio::test]
    async fn test_download_and_exists_with_shared_key() {
        let server = MockServer::start_async().await;
        let get_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/feeds/daily/feed.zip")
                    .header("x-ms-version", API_VERSION)
                    .header_exists("authorization");
                then.status(200).body("zipdata");
            })
            .await;
        let head_mock = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/feeds/daily/missing.zip");
                then.status(404);
            })
            .await;

        let provider = AzureProvider::new(config(Some(server.base_url()))).unwrap();
        let ctx = Context::background();
        let mut download = provider.download(&ctx, "/feed.zip").await.unwrap();
        let mut body = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut download.reader, &mut body)
            .await
            .unwrap();
        assert_eq!(body, "zipdata");
        assert_eq!(download.status, 200);
        assert!(!provider.exists(&ctx, "missing.zip").await.unwrap());

        get_mock.assert_async().await;
        head_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_keys_follows_marker() {
        let server = MockServer::start_async().await;
        let page2 = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/feeds")
                    .query_param("comp", "list")
                    .query_param("marker", "m2");
                then.status(200).body(
                    "<EnumerationResults><Blobs><Blob><Name>daily/b.zip</Name></Blob></Blobs><NextMarker/></EnumerationResults>",
                );
            })
            .await;
        let page1 = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/feeds")
                    .query_param("comp", "list")
                    .query_param("prefix", "daily/")
                    .matches(|req| {
                        !req.query_params
                            .as_ref()
                            .map(|q| q.iter().any(|(k, _)| k == "marker"))
                            .unwrap_or(false)
                    });
                then.status(200).body(
                    "<EnumerationResults><Blobs><Blob><Name>daily/a.zip</Name></Blob></Blobs><NextMarker>m2</NextMarker></EnumerationResults>",
                );
            })
            .await;

        let provider = AzureProvider::new(config(Some(server.base_url()))).unwrap();
        let keys = provider.list_keys(&Context::background(), "").await.unwrap();
        assert_eq!(keys, vec!["a.zip", "b.zip"]);
        page1.assert_async().await;
        page2.assert_async().await;
    }
}
