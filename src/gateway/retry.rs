//! Retry policy for idempotent gateway calls
//!
//! Exponential backoff with jitter and a bounded attempt count. Applied
//! only to operations that are idempotent at the provider (`check_paid`,
//! `cancel_invoice`); invoice creation goes through at most once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::GatewayError;

/// Backoff schedule for retrying transient gateway failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped,
    /// with up to 20% random jitter to avoid synchronized retries.
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let jitter = rand::rng().random_range(0.0..0.2);
        exp.mul_f64(1.0 + jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget
    /// runs out. Only [`GatewayError::is_retryable`] failures are retried.
    pub async fn run<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.delay(attempt - 1);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying gateway call"
                );
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        // max_attempts >= 1, so at least one error was recorded
        Err(last_err.unwrap_or_else(|| GatewayError::Transient("retry budget empty".into())))
    }
}
