//! Circuit Breaker pattern implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by temporarily
//! stopping requests to a failing service.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service is failing, requests are rejected
//! - HalfOpen: Testing if service has recovered
//!
//! The Open -> HalfOpen transition is pulled, not pushed: it happens on the
//! first state read after the recovery timeout, see [`resolve_state`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::clock::{system_clock, Clock};
use crate::error::{ExchangeError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    #[default]
    Closed,
    /// Service is failing - requests are rejected immediately
    Open,
    /// Testing if service has recovered - limited requests allowed
    HalfOpen,
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in HalfOpen state before closing
    pub success_threshold: u32,
    /// Time since the last failure after which an open circuit may be tried again
    #[serde(with = "crate::common::duration_ms", rename = "recovery_timeout_ms")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Point-in-time view of a breaker for health dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Effective state given the stored state and the time of the last failure
pub fn resolve_state(
    state: CircuitState,
    last_failure: Option<Instant>,
    now: Instant,
    recovery_timeout: Duration,
) -> CircuitState {
    match (state, last_failure) {
        (CircuitState::Open, Some(at)) if now.saturating_duration_since(at) > recovery_timeout => {
            CircuitState::HalfOpen
        }
        // Open without a recorded failure only happens after manual tampering
        (CircuitState::Open, None) => CircuitState::HalfOpen,
        (state, _) => state,
    }
}

#[derive(Debug, Default)]
struct Counters {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker for managing service failures
///
/// One instance belongs to one upstream transport and is shared by every
/// call going through it; clone the `Arc`, not the breaker.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use exchange_connect::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// #[tokio::main]
/// async fn main() {
///     let config = CircuitBreakerConfig::default()
///         .with_failure_threshold(3)
///         .with_recovery_timeout(Duration::from_secs(30));
///     let cb = CircuitBreaker::new(config);
///
///     for _ in 0..3 {
///         cb.record_failure().await;
///     }
///     assert_eq!(cb.state().await, CircuitState::Open);
/// }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    counters: Mutex<Counters>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            counters: Mutex::new(Counters::default()),
            clock,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the lazy Open -> HalfOpen transition
    pub async fn state(&self) -> CircuitState {
        let mut counters = self.counters.lock().await;
        self.refresh(&mut counters)
    }

    fn refresh(&self, counters: &mut Counters) -> CircuitState {
        let resolved = resolve_state(
            counters.state,
            counters.last_failure_time,
            self.clock.now(),
            self.config.recovery_timeout,
        );
        if resolved != counters.state {
            tracing::info!("Circuit breaker transitioning to HalfOpen state");
            counters.state = resolved;
            counters.success_count = 0;
        }
        resolved
    }

    /// Run `operation` through the breaker
    ///
    /// Fails with [`ExchangeError::CircuitOpen`] without polling the
    /// operation while the circuit is open.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut counters = self.counters.lock().await;
            if self.refresh(&mut counters) == CircuitState::Open {
                return Err(ExchangeError::CircuitOpen);
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Record a successful operation
    ///
    /// In Closed state: resets failure count
    /// In HalfOpen state: increments success count, may close circuit
    pub async fn record_success(&self) {
        let mut counters = self.counters.lock().await;
        counters.failure_count = 0;
        if counters.state == CircuitState::HalfOpen {
            counters.success_count += 1;
            if counters.success_count >= self.config.success_threshold {
                tracing::info!("Circuit breaker closed after successful recovery");
                counters.state = CircuitState::Closed;
                counters.success_count = 0;
            }
        }
    }

    /// Record a failed operation
    ///
    /// In Closed state: increments failure count, may open circuit
    /// In HalfOpen state: immediately reopens circuit
    pub async fn record_failure(&self) {
        let mut counters = self.counters.lock().await;
        counters.last_failure_time = Some(self.clock.now());
        counters.failure_count = counters.failure_count.saturating_add(1);

        match counters.state {
            CircuitState::Closed => {
                if counters.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        "Circuit breaker opened after {} failures",
                        counters.failure_count
                    );
                    counters.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker re-opened due to failure in HalfOpen state");
                counters.state = CircuitState::Open;
                counters.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker closed with zero counters
    pub async fn reset(&self) {
        let mut counters = self.counters.lock().await;
        *counters = Counters::default();
        tracing::info!("Circuit breaker reset");
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let mut counters = self.counters.lock().await;
        let state = self.refresh(&mut counters);
        CircuitSnapshot {
            state,
            failure_count: counters.failure_count,
            success_count: counters.success_count,
        }
    }

    pub async fn failure_count(&self) -> u32 {
        self.counters.lock().await.failure_count
    }
}
