//! S3 Backend
//!
//! Amazon S3 and S3-compatible storage (MinIO, R2, Wasabi, ...) over reqwest
//! with AWS Signature Version 4. Requests are sent once; callers own retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

use super::xml::parse_listing;
use super::{
    join_key, response_reader, spool_to_tempfile, BackendKind, Bucket, ByteStream, Download, Downloader,
    FeedAuthorization, Presigner, S3Config, Secret, SecretSetter, Uploader,
};
use crate::context::Context;
use crate::error::TransferError;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty payload
const EMPTY_PAYLOAD_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

pub const PRESIGN_EXPIRY_SECS: u64 = 3600;

/// AWS URI encoding: everything but unreserved characters, optionally keeping `/`
fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Sorted, encoded query string used both for signing and on the wire
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, false), uri_encode(v, false)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransferError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TransferError::InvalidConfig(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

pub struct S3Provider {
    config: S3Config,
    client: Client,
}

impl S3Provider {
    pub fn new(config: S3Config) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(crate::config::DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn from_url(url: &str) -> Result<Self, TransferError> {
        Self::new(S3Config::from_url(url)?)
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Get the S3 endpoint URL
    fn endpoint(&self) -> String {
        match self.config.endpoint {
            Some(ref endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.config.region),
        }
    }

    /// Backend key for a caller key
    pub fn full_key(&self, key: &str) -> String {
        join_key(&self.config.prefix, key)
    }

    /// URL addressing `full_key` (or the bucket itself when empty)
    fn object_url(&self, full_key: &str) -> Result<Url, TransferError> {
        let endpoint = self.endpoint();
        let path = uri_encode(full_key, true);
        let raw = if self.config.path_style {
            format!("{}/{}/{}", endpoint, self.config.bucket, path)
        } else {
            let (scheme, host) = match endpoint.split_once("://") {
                Some((scheme, host)) => (scheme, host),
                None => ("https", endpoint.as_str()),
            };
            format!("{}://{}.{}/{}", scheme, self.config.bucket, host, path)
        };
        Url::parse(&raw).map_err(|e| TransferError::invalid_url(&raw, e))
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/s3/aws4_request", date_stamp, self.config.region)
    }

    fn signature(&self, date_stamp: &str, string_to_sign: &str) -> Result<String, TransferError> {
        let secret = format!("AWS4{}", self.config.secret_access_key.expose_secret());
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.config.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, b"s3")?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        Ok(hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?))
    }

    /// Headers (including Authorization) for a Signature V4 request
    fn signed_headers(
        &self,
        method: &Method,
        url: &Url,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>, TransferError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host_header(url));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(ref token) = self.config.session_token {
            headers.insert("x-amz-security-token".to_string(), token.expose_secret().to_string());
        }

        let signed_names = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            url.path(),
            url.query().unwrap_or(""),
            canonical_headers,
            signed_names,
            payload_hash
        );

        let scope = self.credential_scope(&date_stamp);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = self.signature(&date_stamp, &string_to_sign)?;

        headers.insert(
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.config.access_key_id, scope, signed_names, signature
            ),
        );
        // reqwest sets Host itself
        headers.remove("host");
        Ok(headers)
    }

    /// Send one request, signing it when credentials are configured
    async fn send(
        &self,
        ctx: &Context,
        method: Method,
        url: Url,
        body: Option<(reqwest::Body, u64)>,
    ) -> Result<reqwest::Response, TransferError> {
        let payload_hash = if body.is_some() { UNSIGNED_PAYLOAD } else { EMPTY_PAYLOAD_HASH };
        let mut builder = self.client.request(method.clone(), url.clone());

        if self.config.has_credentials() {
            for (name, value) in self.signed_headers(&method, &url, payload_hash, Utc::now())? {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| TransferError::InvalidConfig(format!("Invalid header value: {}", e)))?;
                builder = builder.header(name, value);
            }
        }
        if let Some((body, len)) = body {
            builder = builder.header(CONTENT_LENGTH, len).body(body);
        }

        let request = builder.build()?;
        debug!("S3 {} {}", method, url.path());
        let response = ctx.run(self.client.execute(request)).await??;
        Ok(response)
    }

    fn status_error(status: StatusCode, url: &Url) -> TransferError {
        let mut url = url.clone();
        url.set_query(None);
        TransferError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }

    /// Presigned GET URL for `full_key`, with extra query parameters signed in
    fn presign_url(
        &self,
        full_key: &str,
        expires_secs: u64,
        extra: &[(&str, &str)],
        now: DateTime<Utc>,
    ) -> Result<String, TransferError> {
        if !self.config.has_credentials() {
            return Err(TransferError::InvalidConfig(
                "S3 presigning requires credentials".to_string(),
            ));
        }
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = self.credential_scope(&date_stamp);

        let mut url = self.object_url(full_key)?;
        let mut params = BTreeMap::new();
        params.insert("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string());
        params.insert(
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.config.access_key_id, scope),
        );
        params.insert("X-Amz-Date".to_string(), amz_date.clone());
        params.insert("X-Amz-Expires".to_string(), expires_secs.to_string());
        if let Some(ref token) = self.config.session_token {
            params.insert("X-Amz-Security-Token".to_string(), token.expose_secret().to_string());
        }
        params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());
        for (k, v) in extra {
            params.insert(k.to_string(), v.to_string());
        }
        let query = canonical_query(&params);

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            url.path(),
            query,
            host_header(&url),
            UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = self.signature(&date_stamp, &string_to_sign)?;

        url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));
        Ok(url.to_string())
    }
}

impl SecretSetter for S3Provider {
    fn set_secret(&mut self, secret: Secret) -> Result<(), TransferError> {
        self.config.apply_secret(&secret);
        Ok(())
    }
}

#[async_trait]
impl Downloader for S3Provider {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn download_auth(
        &self,
        ctx: &Context,
        key: &str,
        _auth: &FeedAuthorization,
    ) -> Result<Download, TransferError> {
        let url = self.object_url(&self.full_key(key))?;
        let response = self.send(ctx, Method::GET, url.clone(), None).await?;
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
impl Uploader for S3Provider {
    async fn upload(&self, ctx: &Context, key: &str, mut reader: ByteStream) -> Result<(), TransferError> {
        let url = self.object_url(&self.full_key(key))?;
        let (file, len) = spool_to_tempfile(ctx, &mut reader).await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let response = self.send(ctx, Method::PUT, url.clone(), Some((body, len))).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, &url));
        }
        debug!("S3 uploaded {} bytes to {}", len, url.path());
        Ok(())
    }
}

#[async_trait]
impl Bucket for S3Provider {
    async fn list_keys(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>, TransferError> {
        let root = self.config.prefix.as_str();
        let mut list_prefix = join_key(root, prefix);
        if !list_prefix.is_empty() && (prefix.is_empty() || prefix.ends_with('/')) {
            list_prefix.push('/');
        }

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = BTreeMap::new();
            params.insert("list-type".to_string(), "2".to_string());
            if !list_prefix.is_empty() {
                params.insert("prefix".to_string(), list_prefix.clone());
            }
            if let Some(ref t) = token {
                params.insert("continuation-token".to_string(), t.clone());
            }
            let mut url = self.object_url("")?;
            url.set_query(Some(&canonical_query(&params)));

            let response = self.send(ctx, Method::GET, url.clone(), None).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Self::status_error(status, &url));
            }
            let body = ctx.run(response.text()).await??;
            let page = parse_listing(&body, "Contents", "Key", "NextContinuationToken")?;

            for full in page.names {
                let relative = if root.is_empty() {
                    full.as_str()
                } else {
                    match full.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
                        Some(rel) => rel,
                        None => continue,
                    }
                };
                if !relative.is_empty() && !relative.ends_with('/') {
                    keys.push(relative.to_string());
                }
            }

            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn exists(&self, ctx: &Context, key: &str) -> Result<bool, TransferError> {
        let url = self.object_url(&self.full_key(key))?;
        let response = self.send(ctx, Method::HEAD, url.clone(), None).await?;
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
impl Presigner for S3Provider {
    async fn create_signed_url(
        &self,
        _ctx: &Context,
        key: &str,
        filename: &str,
    ) -> Result<String, TransferError> {
        let full_key = self.full_key(key);
        let disposition = format!("attachment; filename=\"{}\"", filename);
        let url = self.presign_url(
            &full_key,
            PRESIGN_EXPIRY_SECS,
            &[("response-content-disposition", disposition.as_str())],
            Utc::now(),
        )?;
        info!("Created presigned S3 URL for {} (expires in {}s)", full_key, PRESIGN_EXPIRY_SECS);
        Ok(url)
    }
}
