//! HTTP 429 retry loop with exponential backoff and Retry-After support.
//!
//! `send_with_retry()` stands in for `client.execute(request)` and adds:
//! - Exponential backoff with up to 25% jitter on 429 (Too Many Requests)
//! - Retry-After header parsing (both seconds and HTTP-date formats)
//! - Cancellation: every send and every sleep runs under the caller's `Context`
//!
//! Other statuses are never retried here: anything below 400 is handed back to
//! the caller, anything else becomes `TransferError::HttpStatus`.

use reqwest::{Client, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::duration_ms;
use crate::context::Context;
use crate::error::TransferError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for HTTP retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RetryConfigRepr")]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
}

#[derive(Deserialize)]
#[serde(default)]
struct RetryConfigRepr {
    max_retries: u32,
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    max_backoff: Duration,
}

impl Default for RetryConfigRepr {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl From<RetryConfigRepr> for RetryConfig {
    fn from(repr: RetryConfigRepr) -> Self {
        RetryConfig::new(repr.max_retries, repr.initial_backoff, repr.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryConfig {
    /// Build a config, substituting the defaults for any zero value
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: if max_retries == 0 { defaults.max_retries } else { max_retries },
            initial_backoff: if initial_backoff.is_zero() {
                defaults.initial_backoff
            } else {
                initial_backoff
            },
            max_backoff: if max_backoff.is_zero() { defaults.max_backoff } else { max_backoff },
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// A positive `retry_after` wins outright, capped at `max_backoff` and
    /// without jitter. Otherwise `initial_backoff * 2^attempt` clamped to
    /// `max_backoff`, plus up to 25% jitter.
    pub fn calculate_backoff(&self, attempt: u32, retry_after: Duration) -> Duration {
        if !retry_after.is_zero() {
            return retry_after.min(self.max_backoff);
        }

        let base = 1u32
            .checked_shl(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff);

        let jitter = base.mul_f64(rand::random::<f64>() * 0.25);
        let ceiling = self.max_backoff.saturating_add(self.max_backoff / 4);
        base.saturating_add(jitter).min(ceiling)
    }
}

/// Parse a Retry-After value as integer seconds or an HTTP-date.
/// Non-positive, past, or unparseable values yield zero.
pub fn parse_retry_after(value: &str) -> Duration {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return if secs > 0 { Duration::from_secs(secs as u64) } else { Duration::ZERO };
    }
    match chrono::DateTime::parse_from_rfc2822(value) {
        Ok(when) => (when.with_timezone(&chrono::Utc) - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO),
        Err(_) => Duration::ZERO,
    }
}

fn retry_after_header(response: &Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(parse_retry_after)
        .unwrap_or(Duration::ZERO)
}

/// Send `request`, retrying on 429 until `max_retries` is exhausted.
///
/// The request must be clonable (no streaming body). The previous response
/// body is drained before the next attempt starts.
pub async fn send_with_retry(
    ctx: &Context,
    client: &Client,
    request: Request,
    config: &RetryConfig,
) -> Result<Response, TransferError> {
    // Query strings can carry the feed key
    let url = {
        let mut url = request.url().clone();
        url.set_query(None);
        url.to_string()
    };
    let mut attempt: u32 = 0;

    loop {
        let this_try = request.try_clone().ok_or_else(|| {
            TransferError::InvalidConfig("request body cannot be retried".to_string())
        })?;
        let response = ctx.run(client.execute(this_try)).await??;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            if attempt >= config.max_retries {
                debug!("HTTP 429 from {} after {} attempts, giving up", url, attempt + 1);
                return Err(TransferError::HttpStatus { status: status.as_u16(), url });
            }
            let delay = config.calculate_backoff(attempt, retry_after_header(&response));
            // Finish with this response before the next attempt goes out
            let _ = ctx.run(response.bytes()).await?;

            debug!(
                "HTTP 429 from {}. Retry {}/{} after {:?}",
                url,
                attempt + 1,
                config.max_retries,
                delay
            );
            ctx.sleep(delay).await?;
            attempt += 1;
            continue;
        }

        if status.as_u16() < 400 {
            return Ok(response);
        }
        return Err(TransferError::HttpStatus { status: status.as_u16(), url });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    #[test]
    fn test_zero_values_use_defaults() {
        let config = RetryConfig::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(config, RetryConfig::default());
        let config = RetryConfig::new(7, Duration::ZERO, Duration::from_secs(5));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.initial_backoff, DEFAULT_INITIAL_BACKOFF);
        assert_eq!(config.max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_calculate_backoff_bounded() {
        let config = config(100, 10_000);
        for attempt in 0..6u32 {
            let expected = Duration::from_millis(100 * (1 << attempt));
            for _ in 0..20 {
                let delay = config.calculate_backoff(attempt, Duration::ZERO);
                assert!(delay >= expected, "attempt {attempt}: {delay:?} < {expected:?}");
                assert!(delay <= expected.mul_f64(1.25), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_calculate_backoff_capped_at_max() {
        let config = config(1000, 5000);
        for _ in 0..20 {
            let delay = config.calculate_backoff(10, Duration::ZERO);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(6250));
        }
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let config = config(1000, 60_000);
        assert_eq!(config.calculate_backoff(0, Duration::from_secs(7)), Duration::from_secs(7));
        assert_eq!(config.calculate_backoff(5, Duration::from_secs(600)), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_overflow_safety() {
        let day = Duration::from_secs(24 * 3600);
        let config = RetryConfig::new(3, Duration::from_secs(1), day);
        for attempt in [31, 32, 64, 100, u32::MAX] {
            let delay = config.calculate_backoff(attempt, Duration::ZERO);
            assert!(delay > Duration::ZERO);
            assert!(delay <= day + Duration::from_secs(6 * 3600));
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("120"), Duration::from_secs(120));
        assert_eq!(parse_retry_after(" 3 "), Duration::from_secs(3));
        assert_eq!(parse_retry_after("0"), Duration::ZERO);
        assert_eq!(parse_retry_after("-5"), Duration::ZERO);
        assert_eq!(parse_retry_after("soon"), Duration::ZERO);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Duration::ZERO);

        let future = (chrono::Utc::now() + chrono::Duration::seconds(90))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let parsed = parse_retry_after(&future);
        assert!(parsed > Duration::from_secs(80) && parsed <= Duration::from_secs(90));
    }

    #[test]
    fn test_deserialize_replaces_zeros() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_retries":0,"initial_backoff_ms":20}"#).unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.initial_backoff, Duration::from_millis(20));
        assert_eq!(config.max_backoff, DEFAULT_MAX_BACKOFF);
    }
}
