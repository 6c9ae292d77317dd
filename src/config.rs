//! Fetch configuration
//!
//! Tuning is carried by explicit values with defaults applied when the struct
//! is built, never inferred mid-call. `FetchConfig::from_env` layers the
//! `FEEDFETCH_*` environment overrides on top of the defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::providers::RetryConfig;

/// Overall deadline wrapping one authenticated request, retries included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// `User-Agent` sent on every HTTP request
pub const DEFAULT_USER_AGENT: &str = concat!("feedfetch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// HTTP 429 retry tuning
    pub retry: RetryConfig,
    /// Deadline for a whole authenticated request
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Defaults plus `FEEDFETCH_*` environment overrides
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup. Unparseable values are ignored
    /// with a warning; zero values fall back to the defaults.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring {}={:?}: not a number", name, raw);
                    None
                }
            }
        };

        let max_retries = number("FEEDFETCH_MAX_RETRIES")
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(self.retry.max_retries);
        let initial = number("FEEDFETCH_INITIAL_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(self.retry.initial_backoff);
        let max = number("FEEDFETCH_MAX_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(self.retry.max_backoff);
        self.retry = RetryConfig::new(max_retries, initial, max);

        if let Some(secs) = number("FEEDFETCH_TIMEOUT_SECS").filter(|s| *s > 0) {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = lookup("FEEDFETCH_USER_AGENT").filter(|a| !a.trim().is_empty()) {
            self.user_agent = agent;
        }
        self
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
