//! Request signing for venue APIs
//!
//! Both supported schemes use HMAC-SHA256 over a canonical query string:
//! parameter keys sorted lexicographically, values percent-encoded. They
//! differ in what else goes into the digest and where the result travels.

use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters in canonical (sorted) order
pub type Params = BTreeMap<String, String>;

/// Raw HMAC-SHA256 digest
pub fn hmac_sha256(secret: &str, message: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Hex-encoded HMAC-SHA256 signature
pub fn sign_hex(message: &str, secret: &str) -> String {
    hex::encode(hmac_sha256(secret, message))
}

/// Base64-encoded HMAC-SHA256 signature
pub fn sign_base64(message: &str, secret: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(hmac_sha256(secret, message))
}

/// Verify a hex signature against the expected value
pub fn verify_signature(message: &str, secret: &str, signature: &str) -> bool {
    let computed = sign_hex(message, secret);
    constant_time_eq(computed.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// `k1=v1&k2=v2` with keys sorted and values percent-encoded
pub fn canonical_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    passphrase: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}

/// How a venue expects requests to be authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// `timestamp` and hex `signature` appended to the query string,
    /// digest over `query + body`, key in `X-MBX-APIKEY`
    QueryHex,
    /// Base64 digest over `timestamp + METHOD + path[?query] + body`,
    /// sent in `ACCESS-*` headers
    HeaderBase64,
}

/// Query string and headers ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct SignedParts {
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl SignatureScheme {
    pub fn sign(
        &self,
        credentials: &Credentials,
        method: &Method,
        path: &str,
        params: &Params,
        body: &str,
        timestamp_ms: i64,
    ) -> SignedParts {
        let canonical = canonical_query(params);

        match self {
            Self::QueryHex => {
                let mut query = canonical;
                if !query.is_empty() {
                    query.push('&');
                }
                query.push_str(&format!("timestamp={}", timestamp_ms));

                let payload = format!("{}{}", query, body);
                let signature = sign_hex(&payload, credentials.api_secret());
                query.push_str(&format!("&signature={}", signature));

                SignedParts {
                    query,
                    headers: vec![("X-MBX-APIKEY".to_string(), credentials.api_key().to_string())],
                }
            }
            Self::HeaderBase64 => {
                let timestamp = timestamp_ms.to_string();
                let request_path = if canonical.is_empty() {
                    path.to_string()
                } else {
                    format!("{}?{}", path, canonical)
                };
                let prehash = format!("{}{}{}{}", timestamp, method.as_str(), request_path, body);
                let signature = sign_base64(&prehash, credentials.api_secret());

                let mut headers = vec![
                    ("ACCESS-KEY".to_string(), credentials.api_key().to_string()),
                    ("ACCESS-SIGN".to_string(), signature),
                    ("ACCESS-TIMESTAMP".to_string(), timestamp),
                    ("locale".to_string(), "en-US".to_string()),
                ];
                if let Some(passphrase) = credentials.passphrase() {
                    headers.push(("ACCESS-PASSPHRASE".to_string(), passphrase.to_string()));
                }

                SignedParts {
                    query: canonical,
                    headers,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hmac_known_vector() {
        let sig = sign_hex("The quick brown fox jumps over the lazy dog", "key");
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_binance_documented_signature() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = concat!(
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1",
            "&recvWindow=5000&timestamp=1499827319559"
        );
        assert_eq!(
            sign_hex(query, secret),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_canonical_query_sorts_and_encodes() {
        let p = params(&[("symbol", "BTCUSDT"), ("newClientOrderId", "a b/c"), ("limit", "5")]);
        assert_eq!(
            canonical_query(&p),
            "limit=5&newClientOrderId=a%20b%2Fc&symbol=BTCUSDT"
        );
    }

    #[test]
    fn test_query_hex_appends_timestamp_then_signature() {
        let creds = Credentials::new("key", "secret");
        let p = params(&[("symbol", "BTCUSDT"), ("side", "BUY")]);
        let signed = SignatureScheme::QueryHex.sign(
            &creds,
            &Method::GET,
            "/api/v3/order",
            &p,
            "",
            1700000000000,
        );

        let expected_prefix = "side=BUY&symbol=BTCUSDT&timestamp=1700000000000";
        assert!(signed.query.starts_with(expected_prefix));

        let (unsigned, signature) = signed.query.rsplit_once("&signature=").unwrap();
        assert_eq!(unsigned, expected_prefix);
        assert!(verify_signature(unsigned, "secret", signature));
        assert_eq!(signed.headers[0], ("X-MBX-APIKEY".to_string(), "key".to_string()));
    }

    #[test]
    fn test_query_hex_signs_body_too() {
        let creds = Credentials::new("key", "secret");
        let p = Params::new();
        let a = SignatureScheme::QueryHex.sign(&creds, &Method::POST, "/x", &p, "", 1);
        let b = SignatureScheme::QueryHex.sign(&creds, &Method::POST, "/x", &p, "{}", 1);
        assert_eq!(a.query, format!("timestamp=1&signature={}", sign_hex("timestamp=1", "secret")));
        assert_ne!(a.query, b.query);
    }

    #[test]
    fn test_header_base64_prehash() {
        let creds = Credentials::new("key", "secret").with_passphrase("pass");
        let p = params(&[("symbol", "BTCUSDT")]);
        let signed = SignatureScheme::HeaderBase64.sign(
            &creds,
            &Method::GET,
            "/api/v2/spot/trade/unfilled-orders",
            &p,
            "",
            1700000000000,
        );

        let expected = sign_base64(
            "1700000000000GET/api/v2/spot/trade/unfilled-orders?symbol=BTCUSDT",
            "secret",
        );
        assert_eq!(signed.query, "symbol=BTCUSDT");
        assert!(signed
            .headers
            .contains(&("ACCESS-SIGN".to_string(), expected)));
        assert!(signed
            .headers
            .contains(&("ACCESS-PASSPHRASE".to_string(), "pass".to_string())));
    }

    #[test]
    fn test_verify_signature_rejects_tampering() {
        let sig = sign_hex("timestamp=1", "secret");
        assert!(verify_signature("timestamp=1", "secret", &sig));
        assert!(!verify_signature("timestamp=2", "secret", &sig));
        assert!(!verify_signature("timestamp=1", "other", &sig));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("key", "super-secret").with_passphrase("pp");
        let text = format!("{:?}", creds);
        assert!(!text.contains("super-secret"));
        assert!(text.contains("<redacted>"));
    }
}
