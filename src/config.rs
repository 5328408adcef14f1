//! Service configuration
//!
//! Loaded from the environment at startup. The provider credentials are the
//! only secrets; everything else has a sensible default. When no provider
//! URL is configured the binary falls back to the in-process mock gateway,
//! which is what local development and the test suite want.
//!
//! | Variable                        | Default   | Meaning                         |
//! |---------------------------------|-----------|---------------------------------|
//! | `COURSEPAY_PROVIDER_URL`        | *(unset)* | Paylink API base URL            |
//! | `COURSEPAY_PROVIDER_TOKEN`      | *(unset)* | Paylink API bearer token        |
//! | `COURSEPAY_INVOICE_TTL_HOURS`   | `24`      | Payment window per invoice      |
//! | `COURSEPAY_REQUEST_TIMEOUT_MS`  | `10000`   | Per-request gateway deadline    |
//! | `COURSEPAY_RETRY_ATTEMPTS`      | `3`       | Attempts for idempotent calls   |
//! | `COURSEPAY_EXPIRY_SWEEP_SECS`   | `60`      | Period of the expiry sweep task |

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::error::{Error, Result};
use crate::gateway::RetryPolicy;

/// Runtime configuration for the service
#[derive(Debug, Clone)]
pub struct Config {
    /// Paylink API base URL; `None` selects the mock gateway
    pub provider_url: Option<String>,
    /// Paylink API bearer token
    pub provider_token: String,
    /// Payment window granted to each invoice
    pub invoice_ttl: Duration,
    /// Deadline for each individual gateway request
    pub request_timeout: StdDuration,
    /// Attempt budget for idempotent gateway calls
    pub retry_attempts: u32,
    /// How often the expiry sweep runs
    pub expiry_sweep_interval: StdDuration,
}

impl Config {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self> {
        let provider_url = std::env::var("COURSEPAY_PROVIDER_URL").ok();
        let provider_token = std::env::var("COURSEPAY_PROVIDER_TOKEN").unwrap_or_default();
        if provider_url.is_some() && provider_token.is_empty() {
            return Err(Error::Config(
                "COURSEPAY_PROVIDER_TOKEN is required when COURSEPAY_PROVIDER_URL is set".into(),
            ));
        }

        let invoice_ttl_hours = parse_env("COURSEPAY_INVOICE_TTL_HOURS", 24i64)?;
        if invoice_ttl_hours <= 0 {
            return Err(Error::Config(
                "COURSEPAY_INVOICE_TTL_HOURS must be positive".into(),
            ));
        }

        Ok(Self {
            provider_url,
            provider_token,
            invoice_ttl: Duration::hours(invoice_ttl_hours),
            request_timeout: StdDuration::from_millis(parse_env(
                "COURSEPAY_REQUEST_TIMEOUT_MS",
                10_000u64,
            )?),
            retry_attempts: parse_env("COURSEPAY_RETRY_ATTEMPTS", 3u32)?,
            expiry_sweep_interval: StdDuration::from_secs(parse_env(
                "COURSEPAY_EXPIRY_SWEEP_SECS",
                60u64,
            )?),
        })
    }

    /// The retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            ..RetryPolicy::default()
        }
    }

    /// Configuration used by tests: mock gateway, short windows, no retries
    /// to keep tests fast.
    pub fn test_config() -> Self {
        Self {
            provider_url: None,
            provider_token: String::new(),
            invoice_ttl: Duration::hours(24),
            request_timeout: StdDuration::from_millis(100),
            retry_attempts: 1,
            expiry_sweep_interval: StdDuration::from_secs(1),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}
