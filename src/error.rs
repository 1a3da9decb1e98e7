//! Error taxonomy for the connectivity layer
//!
//! Every failure a caller can see is an [`ExchangeError`]. Waiting for
//! rate-limit tokens is not an error and never surfaces here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network failure or timeout reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Circuit breaker is open; no request was sent
    #[error("Circuit breaker is open, rejecting request")]
    CircuitOpen,

    /// Venue rejected the key or signature (HTTP 401/403)
    #[error("Authentication rejected ({status}): {payload}")]
    Authentication {
        status: u16,
        payload: serde_json::Value,
    },

    /// Any other non-2xx response
    #[error("API error ({status}): {payload}")]
    Http {
        status: u16,
        payload: serde_json::Value,
    },

    /// Pre-trade policy violation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A 2xx response whose body could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error code inside a successful response envelope
    #[error("Venue error {code}: {message}")]
    Venue { code: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExchangeError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Venue error code, from the response envelope or the error payload
    pub fn venue_code(&self) -> Option<String> {
        match self {
            Self::Venue { code, .. } => Some(code.clone()),
            Self::Authentication { payload, .. } | Self::Http { payload, .. } => {
                match payload.get("code")? {
                    serde_json::Value::String(code) => Some(code.clone()),
                    serde_json::Value::Number(code) => Some(code.to_string()),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Whether the error came from the caller's side of the boundary
    /// (caps, config) rather than from the venue or the network
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_extraction() {
        let err = ExchangeError::Http {
            status: 503,
            payload: serde_json::json!("unavailable"),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(ExchangeError::CircuitOpen.status(), None);
    }

    #[test]
    fn test_display_includes_payload() {
        let err = ExchangeError::Authentication {
            status: 401,
            payload: serde_json::json!({"code": -2014, "msg": "API-key format invalid."}),
        };
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("API-key format invalid."));
    }

    #[test]
    fn test_venue_code_from_payload_or_envelope() {
        let http = ExchangeError::Http {
            status: 400,
            payload: serde_json::json!({"code": -2011, "msg": "Unknown order sent."}),
        };
        assert_eq!(http.venue_code().as_deref(), Some("-2011"));

        let envelope = ExchangeError::Venue {
            code: "43001".into(),
            message: "order does not exist".into(),
        };
        assert_eq!(envelope.venue_code().as_deref(), Some("43001"));

        let text = ExchangeError::Http {
            status: 502,
            payload: serde_json::json!("Bad Gateway"),
        };
        assert_eq!(text.venue_code(), None);
    }

    #[test]
    fn test_local_errors() {
        assert!(ExchangeError::Validation("x".into()).is_local());
        assert!(!ExchangeError::Transport("x".into()).is_local());
    }
}
