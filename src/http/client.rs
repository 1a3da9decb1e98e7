//! Signed HTTP client
//!
//! One authenticated call per `request`, with:
//! - Rate limiting per endpoint (one token per attempt)
//! - Automatic retry with exponential backoff
//! - Circuit breaker pattern for fault tolerance
//! - Fresh signature on every attempt
//!
//! Composition order: breaker( backoff( take token -> sign -> send ) ).
//! An exhausted retry loop therefore counts as a single breaker failure.
//!
//! # Example
//!
//! ```no_run
//! use exchange_connect::http::{ClientConfig, Credentials, SignatureScheme, SignedHttpClient};
//! use exchange_connect::http::signing::Params;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = SignedHttpClient::new(
//!         "https://api.binance.com",
//!         Credentials::new("api_key", "api_secret"),
//!         SignatureScheme::QueryHex,
//!         &ClientConfig::default(),
//!     )?;
//!     let account = client.get("/api/v3/account", Params::new()).await?;
//!     println!("{}", account);
//!     Ok(())
//! }
//! ```

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::signing::{canonical_query, Credentials, Params, SignatureScheme};
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::common::rate_limiter::endpoint_key;
use crate::common::{
    BackoffConfig, BackoffExecutor, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot,
    PerEndpointRateLimiter, RateLimitConfig,
};
use crate::error::{ExchangeError, Result};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Request timeout enforced by the transport
    #[serde(rename = "timeout_ms", with = "crate::common::duration_ms")]
    pub timeout: Duration,
    pub backoff: BackoffConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Token bucket per endpoint pattern; `*` is the fallback
    pub rate_limits: HashMap<String, RateLimitConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limits: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Set total attempts per call (first try included)
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.backoff = self.backoff.with_attempts(attempts);
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.backoff = self.backoff.with_base_delay(base);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, pattern: impl Into<String>, config: RateLimitConfig) -> Self {
        self.rate_limits.insert(pattern.into(), config);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// Authenticated REST client for one venue base URL
///
/// Clones share the transport, the circuit breaker and the token buckets.
#[derive(Debug, Clone)]
pub struct SignedHttpClient {
    base_url: String,
    credentials: Credentials,
    scheme: SignatureScheme,
    transport: Arc<dyn Transport>,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<PerEndpointRateLimiter>,
    backoff: BackoffExecutor,
    /// Sent with every request after the signing headers
    extra_headers: Vec<(String, String)>,
}

impl SignedHttpClient {
    /// Create a client over a fresh reqwest transport
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        scheme: SignatureScheme,
        config: &ClientConfig,
    ) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(
            base_url,
            credentials,
            scheme,
            Arc::new(transport),
            config,
        ))
    }

    /// Create a client over an existing transport
    ///
    /// The client owns a new circuit breaker for this transport.
    pub fn with_transport(
        base_url: impl Into<String>,
        credentials: Credentials,
        scheme: SignatureScheme,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            scheme,
            transport,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            rate_limiter: Arc::new(PerEndpointRateLimiter::new(config.rate_limits.clone())),
            backoff: BackoffExecutor::new(config.backoff.clone()),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str, params: Params) -> Result<Value> {
        self.request(Method::GET, path, params, None, true).await
    }

    pub async fn post(&self, path: &str, params: Params, body: Option<Value>) -> Result<Value> {
        self.request(Method::POST, path, params, body, true).await
    }

    pub async fn delete(&self, path: &str, params: Params) -> Result<Value> {
        self.request(Method::DELETE, path, params, None, true).await
    }

    /// Unsigned GET sharing this client's limiter and breaker
    pub async fn public_get(&self, path: &str, params: Params) -> Result<Value> {
        self.request(Method::GET, path, params, None, false).await
    }

    /// Execute one call with rate limiting, retries and the circuit breaker
    ///
    /// `path` is the endpoint path; query parameters belong in `params`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Params,
        body: Option<Value>,
        signed: bool,
    ) -> Result<Value> {
        let endpoint = endpoint_key(path);
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let (method, params, body) = (&method, &params, body.as_str());

        let response = self
            .circuit_breaker
            .execute(move || {
                self.backoff
                    .run(move || self.attempt(method, endpoint, params, body, signed))
            })
            .await?;

        parse_body(&response.body)
    }

    async fn attempt(
        &self,
        method: &Method,
        endpoint: &str,
        params: &Params,
        body: &str,
        signed: bool,
    ) -> Result<HttpResponse> {
        self.rate_limiter.take(endpoint).await;

        let request = self.build_request(method, endpoint, params, body, signed);
        tracing::debug!("{} {}", request.method, endpoint);

        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_failure(response))
        }
    }

    fn build_request(
        &self,
        method: &Method,
        path: &str,
        params: &Params,
        body: &str,
        signed: bool,
    ) -> HttpRequest {
        let (query, mut headers) = if signed {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let parts = self
                .scheme
                .sign(&self.credentials, method, path, params, body, timestamp);
            (parts.query, parts.headers)
        } else {
            (canonical_query(params), Vec::new())
        };
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        headers.extend(self.extra_headers.iter().cloned());

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        HttpRequest {
            method: method.clone(),
            url,
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    // ==================== DIAGNOSTICS ====================

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub async fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.circuit_breaker.snapshot().await
    }

    pub async fn rate_limit_snapshot(&self) -> BTreeMap<String, f64> {
        self.rate_limiter.snapshot().await
    }

    pub async fn reconfigure_rate_limit(&self, pattern: &str, config: RateLimitConfig) {
        self.rate_limiter.reconfigure(pattern, config).await;
    }

    /// Operator action: close the circuit and clear its counters
    pub async fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset().await;
    }
}

fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|e| ExchangeError::Protocol(format!("Failed to parse response: {}", e)))
}

fn classify_failure(response: HttpResponse) -> ExchangeError {
    let payload = serde_json::from_str(&response.body).unwrap_or(Value::String(response.body));
    match response.status {
        401 | 403 => ExchangeError::Authentication {
            status: response.status,
            payload,
        },
        status => ExchangeError::Http { status, payload },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CircuitState;
    use crate::http::signing::verify_signature;
    use crate::http::transport::MockTransport;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn client_with(mock: &MockTransport, config: ClientConfig) -> SignedHttpClient {
        SignedHttpClient::with_transport(
            "https://api.example.com/",
            Credentials::new("key", "secret"),
            SignatureScheme::QueryHex,
            Arc::new(mock.clone()),
            &config,
        )
    }

    fn fast_config(attempts: u32) -> ClientConfig {
        ClientConfig::default()
            .with_attempts(attempts)
            .with_base_delay(Duration::from_millis(10))
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_signed_get_builds_canonical_url() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"ok": true}));
        let client = client_with(&mock, fast_config(1));

        let value = client
            .get("/api/v3/openOrders", params(&[("symbol", "ETHUSDT"), ("limit", "5")]))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));

        let request = &mock.requests()[0];
        let (path, query) = request.url.split_once('?').unwrap();
        assert_eq!(path, "https://api.example.com/api/v3/openOrders");
        assert!(query.starts_with("limit=5&symbol=ETHUSDT&timestamp="));

        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();
        assert!(verify_signature(unsigned, "secret", signature));
        assert!(request
            .headers
            .contains(&("X-MBX-APIKEY".to_string(), "key".to_string())));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_extra_headers_are_sent() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({}));
        let client = client_with(&mock, fast_config(1)).with_header("paptrading", "1");

        client.get("/x", Params::new()).await.unwrap();
        assert!(mock.requests()[0]
            .headers
            .contains(&("paptrading".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_public_get_is_unsigned() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"price": "1"}));
        let client = client_with(&mock, fast_config(1));

        client
            .public_get("/api/v3/ticker/price", params(&[("symbol", "BTCUSDT")]))
            .await
            .unwrap();

        let request = &mock.requests()[0];
        assert!(request.url.ends_with("/api/v3/ticker/price?symbol=BTCUSDT"));
        assert!(!request.url.contains("signature"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let mock = MockTransport::new();
        mock.push_response(502, "bad gateway")
            .push_error(ExchangeError::Transport("timeout".into()))
            .push_json(200, json!([]));
        let client = client_with(&mock, fast_config(3));

        let value = client.get("/api/v3/account", Params::new()).await.unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(mock.request_count(), 3);
        assert_eq!(client.circuit_snapshot().await.failure_count, 0);

        // Every attempt carries its own signature
        for request in mock.requests() {
            assert!(request.url.contains("&signature="));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_once_against_breaker() {
        let mock = MockTransport::new();
        for _ in 0..6 {
            mock.push_response(500, r#"{"msg":"internal"}"#);
        }
        let config = fast_config(3)
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(2));
        let client = client_with(&mock, config);

        let err = client.get("/api/v3/account", Params::new()).await.unwrap_err();
        match err {
            ExchangeError::Http { status, payload } => {
                assert_eq!(status, 500);
                assert_eq!(payload, json!({"msg": "internal"}));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let snap = client.circuit_snapshot().await;
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.state, CircuitState::Closed);

        client.get("/api/v3/account", Params::new()).await.unwrap_err();
        assert_eq!(client.circuit_snapshot().await.state, CircuitState::Open);
        assert_eq!(mock.request_count(), 6);

        let err = client.get("/api/v3/account", Params::new()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::CircuitOpen));
        assert_eq!(mock.request_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_errors_use_uniform_retry() {
        let mock = MockTransport::new();
        for _ in 0..2 {
            mock.push_response(
                401,
                r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#,
            );
        }
        let client = client_with(&mock, fast_config(2));

        let err = client.get("/api/v3/account", Params::new()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Authentication { status: 401, .. }));
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_success_is_protocol_error() {
        let mock = MockTransport::new();
        mock.push_response(200, "<html>maintenance</html>");
        let client = client_with(&mock, fast_config(3));

        let err = client.get("/api/v3/account", Params::new()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(_)));
        assert_eq!(mock.request_count(), 1);
        assert_eq!(client.circuit_snapshot().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_non_json_error_payload_falls_back_to_text() {
        let mock = MockTransport::new();
        mock.push_response(418, "teapot");
        let client = client_with(&mock, fast_config(1));

        let err = client.get("/x", Params::new()).await.unwrap_err();
        match err {
            ExchangeError::Http { status, payload } => {
                assert_eq!(status, 418);
                assert_eq!(payload, Value::String("teapot".into()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_takes_a_token() {
        let mock = MockTransport::new();
        mock.push_response(503, "").push_response(503, "").push_json(200, json!({}));
        let config = fast_config(3).with_rate_limit("*", RateLimitConfig::new(10.0, 0.001));
        let client = client_with(&mock, config);

        client.get("/api/v3/account", Params::new()).await.unwrap();

        let snapshot = client.rate_limit_snapshot().await;
        assert_relative_eq!(snapshot["/api/v3/account"], 7.0, epsilon = 0.01);
    }

    #[tokio::test]
    async fn test_reset_circuit_breaker() {
        let mock = MockTransport::new();
        mock.push_response(500, "").push_json(200, json!({}));
        let config = fast_config(1)
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        let client = client_with(&mock, config);

        client.get("/x", Params::new()).await.unwrap_err();
        assert_eq!(client.circuit_snapshot().await.state, CircuitState::Open);

        client.reset_circuit_breaker().await;
        client.get("/x", Params::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_breaker() {
        let mock = MockTransport::new();
        mock.push_response(500, "");
        let config = fast_config(1)
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        let client = client_with(&mock, config);
        let clone = client.clone();

        client.get("/x", Params::new()).await.unwrap_err();
        assert_eq!(clone.circuit_snapshot().await.state, CircuitState::Open);
    }

    #[test]
    fn test_client_config_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "timeout_ms": 5000,
                "backoff": {"attempts": 5, "base_delay_ms": 250},
                "rate_limits": {"/api/v3/order": {"capacity": 5, "refill_per_sec": 1, "cost": 1}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.backoff.attempts, 5);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert_relative_eq!(config.rate_limits["/api/v3/order"].capacity, 5.0);
    }
}
