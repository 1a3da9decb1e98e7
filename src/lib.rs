//! Exchange Connectivity
//!
//! A resilient connectivity layer for talking to crypto exchange REST APIs
//! under real-world conditions: rate limits, transient failures and
//! cascading outages.
//!
//! Every authenticated call goes through the same pipeline:
//!
//! ```text
//! CircuitBreaker::execute( with_backoff( RateLimiter::take -> sign -> send ) )
//! ```
//!
//! Venue adapters ([`exchange::BinanceAdapter`], [`exchange::BitgetAdapter`])
//! implement [`exchange::ExchangePort`] on top of that pipeline and return
//! venue-agnostic [`types::Balance`], [`types::Position`] and
//! [`types::Order`] values. Order placement passes the hard caps in
//! [`risk::enforce_caps`] before anything is sent, then the soft sizing
//! clamp from [`risk::calculate_futures_position_size`].

pub mod common;
pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod risk;
pub mod types;

pub use config::Config;
pub use error::{ExchangeError, Result};
pub use exchange::{Exchange, ExchangePort};
pub use types::*;
