//! Common utilities shared across exchange clients
//!
//! This module contains reusable components for all exchange integrations:
//! - Circuit breaker pattern for fault tolerance
//! - Rate limiter using token bucket algorithm
//! - Retry logic with exponential backoff
//! - An injectable clock driving the first two

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;

/// Serde adapter storing a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub use backoff::{with_backoff, BackoffConfig, BackoffExecutor};
pub use circuit_breaker::{
    resolve_state, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limiter::{PerEndpointRateLimiter, RateLimitConfig, TokenBucket, DEFAULT_PATTERN};
