//! Authenticated REST plumbing
//!
//! - [`signing`]: canonical query strings and HMAC-SHA256 schemes
//! - [`transport`]: the send/receive capability and its reqwest implementation
//! - [`client`]: rate-limited, retried, circuit-broken signed calls

pub mod client;
pub mod signing;
pub mod transport;

pub use client::{ClientConfig, SignedHttpClient};
pub use signing::{Credentials, SignatureScheme};
pub use transport::{HttpRequest, HttpResponse, MockTransport, ReqwestTransport, Transport};
