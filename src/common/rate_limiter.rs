//! Rate Limiter implementation using token bucket algorithm
//!
//! Tokens refill continuously in proportion to elapsed time. Refill is
//! computed lazily whenever the bucket is read, so there is no background
//! task. [`PerEndpointRateLimiter`] keeps one independent bucket per
//! endpoint, created on first use.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use super::clock::{system_clock, Clock};

/// Pattern matching every endpoint without its own configuration
pub const DEFAULT_PATTERN: &str = "*";

/// How long `take` sleeps between checks while the bucket is short
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for one endpoint pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per second of wall-clock time
    pub refill_per_sec: f64,
    /// Tokens charged per request when the caller does not specify a cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 10.0,
            cost: None,
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    fn request_cost(&self) -> f64 {
        self.cost.unwrap_or(1.0)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket
///
/// # Example
///
/// ```
/// use exchange_connect::common::{RateLimitConfig, TokenBucket};
///
/// #[tokio::main]
/// async fn main() {
///     let bucket = TokenBucket::new(RateLimitConfig::new(5.0, 5.0));
///     bucket.take(1.0).await;
///     assert!(bucket.tokens().await <= 5.0);
/// }
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket driven by the system clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.capacity.max(0.0);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: clock.now(),
            }),
            clock,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    fn clamp_cost(&self, cost: f64) -> f64 {
        if cost > self.capacity {
            tracing::warn!(
                "Requested cost {} exceeds bucket capacity {}, clamping",
                cost,
                self.capacity
            );
            self.capacity
        } else {
            cost.max(0.0)
        }
    }

    /// Wait until `cost` tokens are available, then consume them
    pub async fn take(&self, cost: f64) {
        let cost = self.clamp_cost(cost);
        loop {
            {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= cost {
                    state.tokens -= cost;
                    return;
                }
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Consume `cost` tokens only if they are available right now
    pub async fn try_take(&self, cost: f64) -> bool {
        let cost = self.clamp_cost(cost);
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Current token count after applying pending refill
    pub async fn tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[derive(Debug)]
struct EndpointBucket {
    pattern: String,
    cost: f64,
    bucket: Arc<TokenBucket>,
}

/// Token buckets keyed by endpoint path
///
/// Configuration is looked up by exact path first, then by the longest
/// prefix pattern ending in `*`, then by the `*` default.
#[derive(Debug)]
pub struct PerEndpointRateLimiter {
    configs: Mutex<HashMap<String, RateLimitConfig>>,
    buckets: Mutex<HashMap<String, EndpointBucket>>,
    clock: Arc<dyn Clock>,
}

impl Default for PerEndpointRateLimiter {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl PerEndpointRateLimiter {
    pub fn new(configs: HashMap<String, RateLimitConfig>) -> Self {
        Self::with_clock(configs, system_clock())
    }

    pub fn with_clock(
        mut configs: HashMap<String, RateLimitConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        configs
            .entry(DEFAULT_PATTERN.to_string())
            .or_insert_with(RateLimitConfig::default);
        Self {
            configs: Mutex::new(configs),
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Consume the endpoint's configured cost, waiting if necessary
    pub async fn take(&self, endpoint: &str) {
        let (bucket, cost) = self.bucket_for(endpoint).await;
        bucket.take(cost).await;
    }

    /// Consume an explicit cost from the endpoint's bucket
    pub async fn take_cost(&self, endpoint: &str, cost: f64) {
        let (bucket, _) = self.bucket_for(endpoint).await;
        bucket.take(cost).await;
    }

    pub async fn try_take(&self, endpoint: &str) -> bool {
        let (bucket, cost) = self.bucket_for(endpoint).await;
        bucket.try_take(cost).await
    }

    pub async fn tokens(&self, endpoint: &str) -> f64 {
        let (bucket, _) = self.bucket_for(endpoint).await;
        bucket.tokens().await
    }

    /// Token counts for every endpoint seen so far
    pub async fn snapshot(&self) -> BTreeMap<String, f64> {
        let handles: Vec<(String, Arc<TokenBucket>)> = {
            let buckets = self.buckets.lock().await;
            buckets
                .iter()
                .map(|(endpoint, entry)| (endpoint.clone(), Arc::clone(&entry.bucket)))
                .collect()
        };

        let mut out = BTreeMap::new();
        for (endpoint, bucket) in handles {
            out.insert(endpoint, bucket.tokens().await);
        }
        out
    }

    /// Replace the configuration for `pattern`
    ///
    /// Buckets governed by the old configuration, or that the new pattern
    /// now captures, are dropped and recreated full on next use.
    pub async fn reconfigure(&self, pattern: impl Into<String>, config: RateLimitConfig) {
        let pattern = pattern.into();
        let mut configs = self.configs.lock().await;
        configs.insert(pattern.clone(), config);

        let mut buckets = self.buckets.lock().await;
        buckets.retain(|endpoint, entry| {
            entry.pattern != pattern && resolve_pattern(&configs, endpoint) == entry.pattern
        });
        tracing::info!("Rate limit for '{}' reconfigured", pattern);
    }

    async fn bucket_for(&self, endpoint: &str) -> (Arc<TokenBucket>, f64) {
        let endpoint = endpoint_key(endpoint);

        {
            let buckets = self.buckets.lock().await;
            if let Some(entry) = buckets.get(endpoint) {
                return (Arc::clone(&entry.bucket), entry.cost);
            }
        }

        let configs = self.configs.lock().await;
        let pattern = resolve_pattern(&configs, endpoint);
        let config = configs.get(&pattern).cloned().unwrap_or_default();
        drop(configs);

        let mut buckets = self.buckets.lock().await;
        let entry = buckets
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointBucket {
                pattern,
                cost: config.request_cost(),
                bucket: Arc::new(TokenBucket::with_clock(config, Arc::clone(&self.clock))),
            });
        (Arc::clone(&entry.bucket), entry.cost)
    }
}

/// Path without the query string
pub fn endpoint_key(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

fn resolve_pattern(configs: &HashMap<String, RateLimitConfig>, endpoint: &str) -> String {
    if configs.contains_key(endpoint) {
        return endpoint.to_string();
    }

    configs
        .keys()
        .filter(|pattern| pattern.as_str() != DEFAULT_PATTERN)
        .filter_map(|pattern| {
            pattern
                .strip_suffix('*')
                .filter(|prefix| endpoint.starts_with(prefix))
                .map(|prefix| (prefix.len(), pattern))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, pattern)| pattern.clone())
        .unwrap_or_else(|| DEFAULT_PATTERN.to_string())
}
