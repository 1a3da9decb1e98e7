//! Retry with capped exponential backoff and jitter
//!
//! Delay before retry `i` (0-indexed) is `min(5s, base * 2^i)` plus a
//! uniform jitter in `[0, base]`. The executor knows nothing about rate
//! limits or circuit state; callers compose it inside the breaker.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Upper bound on the exponential part of the delay
pub const MAX_BACKOFF: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Total number of calls, including the first
    pub attempts: u32,
    #[serde(rename = "base_delay_ms", with = "crate::common::duration_ms")]
    pub base_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl BackoffConfig {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }
}

/// Exponential part of the delay before retry `retry` (0-indexed)
pub fn backoff_delay(retry: u32, base: Duration) -> Duration {
    let factor = 2u64.saturating_pow(retry);
    let exp = (base.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(exp).min(MAX_BACKOFF)
}

fn jittered_delay(retry: u32, base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=base_ms)
    };
    backoff_delay(retry, base) + Duration::from_millis(jitter)
}

/// Call `operation` up to `attempts` times, sleeping between failures
///
/// The error from the final attempt is returned as-is.
pub async fn with_backoff<F, Fut, T, E>(
    mut operation: F,
    attempts: u32,
    base: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retry + 1 >= attempts => return Err(e),
            Err(e) => {
                let delay = jittered_delay(retry, base);
                tracing::warn!(
                    "Request failed (attempt {}/{}): {}; retrying after {}ms",
                    retry + 1,
                    attempts,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                retry += 1;
            }
        }
    }
}

/// Retry executor bound to a [`BackoffConfig`]
#[derive(Debug, Clone, Default)]
pub struct BackoffExecutor {
    config: BackoffConfig,
}

impl BackoffExecutor {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        with_backoff(operation, self.config.attempts, self.config.base_delay).await
    }
}
