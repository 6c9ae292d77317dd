//! Shared types for transfer backends
//!
//! Credential bundles, authorization descriptors and the per-backend
//! configuration structs built from `s3://` and `az://` URLs.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransferError;

/// Backend variants reachable through the dispatcher or a store URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    Ftp,
    S3,
    Azure,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Http => write!(f, "HTTP"),
            BackendKind::Ftp => write!(f, "FTP"),
            BackendKind::S3 => write!(f, "S3"),
            BackendKind::Azure => write!(f, "Azure Blob"),
            BackendKind::Local => write!(f, "Local"),
        }
    }
}

/// How a [`Secret`] is applied to an outgoing request.
///
/// Parsed from the external string tokens; anything unrecognised is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthType {
    #[default]
    None,
    QueryParam,
    PathSegment,
    Header,
    BasicAuth,
    ReplaceUrl,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "",
            AuthType::QueryParam => "query_param",
            AuthType::PathSegment => "path_segment",
            AuthType::Header => "header",
            AuthType::BasicAuth => "basic_auth",
            AuthType::ReplaceUrl => "replace_url",
        }
    }
}

impl From<&str> for AuthType {
    fn from(value: &str) -> Self {
        match value {
            "query_param" => AuthType::QueryParam,
            "path_segment" => AuthType::PathSegment,
            "header" => AuthType::Header,
            "basic_auth" => AuthType::BasicAuth,
            "replace_url" => AuthType::ReplaceUrl,
            _ => AuthType::None,
        }
    }
}

impl From<String> for AuthType {
    fn from(value: String) -> Self {
        AuthType::from(value.as_str())
    }
}

impl From<AuthType> for String {
    fn from(value: AuthType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes which authentication mechanism applies to a feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedAuthorization {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Query parameter or header name for `query_param` / `header`
    pub param_name: String,
    /// Where a publisher documents how to obtain credentials
    pub info_url: String,
}

impl FeedAuthorization {
    pub fn new(auth_type: AuthType, param_name: impl Into<String>) -> Self {
        Self {
            auth_type,
            param_name: param_name.into(),
            info_url: String::new(),
        }
    }
}

/// Credential bundle supplied per request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub key: SecretString,
    pub username: String,
    pub password: SecretString,
    pub replace_url: SecretString,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: SecretString,
    pub aws_session_token: SecretString,
    pub azure_account_key: SecretString,
    pub azure_sas_token: SecretString,
    /// Matching hints for secret resolution; not used for transfers
    pub filename: String,
    pub feed_id: String,
    pub url_type: String,
}

impl Secret {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
            ..Default::default()
        }
    }

    pub fn with_login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            ..Default::default()
        }
    }

    pub fn with_replace_url(url: impl Into<String>) -> Self {
        Self {
            replace_url: SecretString::from(url.into()),
            ..Default::default()
        }
    }

    pub fn has_aws_credentials(&self) -> bool {
        !self.aws_access_key_id.is_empty() && !self.aws_secret_access_key.expose_secret().is_empty()
    }
}

/// `Some` unless the secret is empty
pub(crate) fn non_empty(secret: &SecretString) -> Option<SecretString> {
    (!secret.expose_secret().is_empty()).then(|| secret.clone())
}

/// Split `?name=value` options off a store URL
fn take_query(parsed: &url::Url, name: &str) -> Option<String> {
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn clean_prefix(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// S3 configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix within the bucket (no leading or trailing slash)
    pub prefix: String,
    pub region: String,
    /// S3-compatible endpoint URL (None for AWS S3)
    pub endpoint: Option<String>,
    /// Use path-style addressing (MinIO and most custom endpoints)
    pub path_style: bool,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

impl S3Config {
    /// Parse `s3://bucket[/prefix][?region=..&endpoint=..]`, filling gaps from the process environment
    pub fn from_url(url: &str) -> Result<Self, TransferError> {
        Self::from_url_with_env(url, |name| std::env::var(name).ok())
    }

    pub fn from_url_with_env<F>(url: &str, env: F) -> Result<Self, TransferError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = url::Url::parse(url).map_err(|e| TransferError::invalid_url(url, e))?;
        if parsed.scheme() != "s3" {
            return Err(TransferError::invalid_url(url, "expected s3:// scheme"));
        }
        let bucket = parsed.host_str().unwrap_or_default().trim().to_string();
        if bucket.is_empty() {
            return Err(TransferError::InvalidConfig("S3 bucket name is required".to_string()));
        }

        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let region = take_query(&parsed, "region")
            .or_else(|| env("AWS_REGION"))
            .or_else(|| env("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| "us-east-1".to_string());

        let endpoint = take_query(&parsed, "endpoint")
            .or_else(|| env("AWS_ENDPOINT_URL"))
            .map(|ep| {
                let ep = ep.trim().trim_end_matches('/');
                if ep.starts_with("http://") || ep.starts_with("https://") {
                    ep.to_string()
                } else {
                    format!("https://{}", ep)
                }
            });
        let path_style = endpoint.is_some();

        Ok(Self {
            bucket,
            prefix: clean_prefix(parsed.path()),
            region,
            endpoint,
            path_style,
            access_key_id: env("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: SecretString::from(env("AWS_SECRET_ACCESS_KEY").unwrap_or_default()),
            session_token: env("AWS_SESSION_TOKEN").map(SecretString::from),
        })
    }

    /// Replace ambient credentials with the secret's, when it carries any
    pub fn apply_secret(&mut self, secret: &Secret) {
        if !secret.has_aws_credentials() {
            return;
        }
        self.access_key_id = secret.aws_access_key_id.clone();
        self.secret_access_key = secret.aws_secret_access_key.clone();
        self.session_token = non_empty(&secret.aws_session_token);
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.expose_secret().is_empty()
    }
}

/// Azure Blob Storage configuration
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub account_name: String,
    pub container: String,
    /// Blob name prefix (no leading or trailing slash)
    pub prefix: String,
    /// Shared Key for HMAC signing
    pub access_key: Option<SecretString>,
    /// SAS token appended to every request (alternative to access_key)
    pub sas_token: Option<SecretString>,
    /// OAuth bearer token; enables user delegation SAS
    pub bearer_token: Option<SecretString>,
    /// Custom endpoint (Azure Stack, Azurite emulator, etc.)
    pub endpoint: Option<String>,
}

impl AzureConfig {
    /// Parse `az://account/container[/prefix]`, filling credentials from the process environment
    pub fn from_url(url: &str) -> Result<Self, TransferError> {
        Self::from_url_with_env(url, |name| std::env::var(name).ok())
    }

    pub fn from_url_with_env<F>(url: &str, env: F) -> Result<Self, TransferError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = url::Url::parse(url).map_err(|e| TransferError::invalid_url(url, e))?;
        if parsed.scheme() != "az" {
            return Err(TransferError::invalid_url(url, "expected az:// scheme"));
        }
        let account_name = parsed.host_str().unwrap_or_default().to_string();
        if account_name.is_empty() {
            return Err(TransferError::InvalidConfig("Account name required for Azure".to_string()));
        }
        let path = parsed.path().trim_start_matches('/');
        let (container, prefix) = match path.split_once('/') {
            Some((c, p)) => (c.to_string(), clean_prefix(p)),
            None => (path.to_string(), String::new()),
        };
        if container.is_empty() {
            return Err(TransferError::InvalidConfig("Container name required for Azure".to_string()));
        }

        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        Ok(Self {
            account_name,
            container,
            prefix,
            access_key: env("AZURE_STORAGE_KEY").map(SecretString::from),
            sas_token: env("AZURE_STORAGE_SAS_TOKEN")
                .map(|t| SecretString::from(t.trim_start_matches('?').to_string())),
            bearer_token: env("AZURE_STORAGE_TOKEN").map(SecretString::from),
            endpoint: env("AZURE_STORAGE_ENDPOINT"),
        })
    }

    /// Secret credentials take precedence over the environment
    pub fn apply_secret(&mut self, secret: &Secret) {
        if let Some(sas) = non_empty(&secret.azure_sas_token) {
            let token = sas.expose_secret().trim_start_matches('?').to_string();
            self.sas_token = Some(SecretString::from(token));
            self.access_key = None;
        } else if let Some(key) = non_empty(&secret.azure_account_key) {
            self.access_key = Some(key);
            self.sas_token = None;
        }
    }

    /// Get the blob service endpoint URL
    pub fn blob_endpoint(&self) -> String {
        if let Some(ref ep) = self.endpoint {
            let ep = ep.trim_end_matches('/');
            if ep.starts_with("http://") || ep.starts_with("https://") {
                ep.to_string()
            } else {
                format!("https://{}", ep)
            }
        } else {
            format!("https://{}.blob.core.windows.net", self.account_name)
        }
    }
}
