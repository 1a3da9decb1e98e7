//! Venue adapters behind one contract
//!
//! Each adapter turns [`ExchangePort`] calls into venue REST requests
//! through a [`SignedHttpClient`] and normalizes what comes back. The
//! [`Exchange`] enum picks the adapter from configuration.

pub mod binance;
pub mod bitget;
pub mod normalize;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::common::CircuitSnapshot;
use crate::config::{Config, Venue};
use crate::error::{ExchangeError, Result};
use crate::http::SignedHttpClient;
use crate::risk::{clamp_quantity, enforce_caps, CapsCheck, CapsConfig, RiskConfig};
use crate::types::{Balance, BalanceKind, Order, OrderRequest, OrderStatus, OrderType, Position};
use self::normalize::{format_decimal, truncate_decimal, MIN_DECIMAL_STEP};

pub use binance::BinanceAdapter;
pub use bitget::BitgetAdapter;

/// Asset that notional caps and risk sizing are measured in
pub const QUOTE_ASSET: &str = "USDT";

/// Uniform exchange contract consumed by trading and monitoring code
#[async_trait]
pub trait ExchangePort: Send + Sync {
    fn venue(&self) -> Venue;

    /// Non-zero balances; unsupported kinds return an empty list
    async fn get_balances(&self, kind: BalanceKind) -> Result<Vec<Balance>>;

    /// Open positions; empty when the venue has no positions endpoint
    async fn get_positions(&self) -> Result<Vec<Position>>;

    /// Open orders, optionally filtered by status
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    /// Validate, size and submit an order
    ///
    /// Caps violations fail with [`ExchangeError::Validation`] before any
    /// order request is sent.
    async fn place_order(&self, request: OrderRequest) -> Result<Order>;

    /// Cancel by venue order id or by client order id
    async fn cancel_order(&self, symbol: &str, id_or_client_oid: &str) -> Result<()>;

    /// Last traded price, used as the reference for market orders
    async fn ticker_price(&self, symbol: &str) -> Result<f64>;

    async fn diagnostics(&self) -> Vec<ClientDiagnostics>;

    /// Operator action: close every circuit owned by this adapter
    async fn reset_circuit_breakers(&self);
}

/// Health of one underlying client
#[derive(Debug, Clone, Serialize)]
pub struct ClientDiagnostics {
    pub name: &'static str,
    pub base_url: String,
    pub circuit: CircuitSnapshot,
    pub tokens: BTreeMap<String, f64>,
}

impl ClientDiagnostics {
    pub async fn collect(name: &'static str, client: &SignedHttpClient) -> Self {
        Self {
            name,
            base_url: client.base_url().to_string(),
            circuit: client.circuit_snapshot().await,
            tokens: client.rate_limit_snapshot().await,
        }
    }
}

/// Pre-trade policy shared by the adapters
#[derive(Debug, Clone, Default)]
pub struct OrderGuard {
    pub caps: CapsConfig,
    pub risk: Option<RiskConfig>,
}

impl OrderGuard {
    pub fn new(caps: CapsConfig, risk: Option<RiskConfig>) -> Self {
        Self { caps, risk }
    }

    fn needs_price(&self) -> bool {
        self.caps.max_order_usdt > 0.0 || self.caps.max_position_usdt > 0.0 || self.risk.is_some()
    }

    /// Run caps and the risk clamp, returning the request to submit
    ///
    /// The whitelist and request shape are checked before any network
    /// call. Reading the ticker, the quote balance and positions happens
    /// only when a cap or the risk clamp needs them.
    pub async fn prepare<P>(&self, port: &P, mut request: OrderRequest) -> Result<OrderRequest>
    where
        P: ExchangePort + ?Sized,
    {
        validate_shape(&request)?;
        request.symbol = request.symbol.trim().to_ascii_uppercase();
        enforce_caps(&CapsCheck::new(&request.symbol, 0.0), &self.caps)?;
        request.ensure_client_oid();

        if !self.needs_price() {
            return Ok(request);
        }

        let price = match request.price {
            Some(price) => price,
            None => port.ticker_price(&request.symbol).await?,
        };

        // Order notional is known locally; reject it before reading positions
        let notional = request.qty * price;
        enforce_caps(&CapsCheck::new(&request.symbol, notional), &self.caps)?;

        if self.caps.max_position_usdt > 0.0 {
            let held: f64 = port
                .get_positions()
                .await?
                .iter()
                .filter(|p| p.symbol == request.symbol)
                .map(|p| p.notional())
                .sum();
            let check = CapsCheck::new(&request.symbol, notional)
                .with_position_notional(held + notional);
            enforce_caps(&check, &self.caps)?;
        }

        if let Some(risk) = &self.risk {
            let balance = port
                .get_balances(BalanceKind::Spot)
                .await?
                .iter()
                .find(|b| b.asset == QUOTE_ASSET)
                .map(|b| b.free)
                .unwrap_or(0.0);
            let leverage = request.leverage.unwrap_or(1.0);
            let qty = truncate_decimal(clamp_quantity(request.qty, balance, price, risk, leverage));
            if qty <= 0.0 {
                return Err(ExchangeError::Validation(format!(
                    "Order size for {} clamped to zero ({} balance {:.2})",
                    request.symbol, QUOTE_ASSET, balance
                )));
            }
            request.qty = qty;
        }

        Ok(request)
    }
}

fn validate_shape(request: &OrderRequest) -> Result<()> {
    if request.symbol.trim().is_empty() {
        return Err(ExchangeError::Validation("Order symbol is empty".into()));
    }
    if !(request.qty.is_finite() && truncate_decimal(request.qty) > 0.0) {
        return Err(ExchangeError::Validation(format!(
            "Order quantity must be at least {}, got {}",
            format_decimal(MIN_DECIMAL_STEP),
            request.qty
        )));
    }
    match (request.order_type, request.price) {
        (OrderType::Limit, None) => Err(ExchangeError::Validation(
            "Limit order requires a price".into(),
        )),
        (_, Some(price)) if !(price.is_finite() && price > 0.0) => Err(ExchangeError::Validation(
            format!("Order price must be positive, got {}", price),
        )),
        _ => Ok(()),
    }
}

/// How a cancel reference is addressed at the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRef<'a> {
    /// Venue-assigned order id
    Venue(&'a str),
    /// Caller-assigned client order id
    Client(&'a str),
}

impl<'a> OrderRef<'a> {
    /// Numeric references are tried as venue ids first, anything else is a
    /// client order id
    pub fn parse(reference: &'a str) -> Self {
        if !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit()) {
            Self::Venue(reference)
        } else {
            Self::Client(reference)
        }
    }

    /// Second reading of a numeric reference, for timestamp-style client ids
    pub fn client_fallback(self) -> Option<Self> {
        match self {
            Self::Venue(reference) => Some(Self::Client(reference)),
            Self::Client(_) => None,
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            Self::Venue(reference) | Self::Client(reference) => reference,
        }
    }
}

/// Keep orders matching `status`, or all of them
pub(crate) fn filter_status(orders: Vec<Order>, status: Option<&OrderStatus>) -> Vec<Order> {
    match status {
        Some(wanted) => orders.into_iter().filter(|o| &o.status == wanted).collect(),
        None => orders,
    }
}

/// Adapter selected from configuration
#[derive(Debug, Clone)]
pub enum Exchange {
    Binance(BinanceAdapter),
    Bitget(BitgetAdapter),
}

impl Exchange {
    /// Build the configured venue's adapter over reqwest transports
    pub fn from_config(config: &Config) -> Result<Self> {
        let guard = OrderGuard::new(config.caps.clone(), config.risk.clone());
        match config.exchange.venue {
            Venue::Binance => Ok(Self::Binance(BinanceAdapter::from_config(
                &config.exchange,
                &config.client,
                guard,
            )?)),
            Venue::Bitget => Ok(Self::Bitget(BitgetAdapter::from_config(
                &config.exchange,
                &config.client,
                guard,
            )?)),
        }
    }

    fn port(&self) -> &dyn ExchangePort {
        match self {
            Self::Binance(adapter) => adapter,
            Self::Bitget(adapter) => adapter,
        }
    }
}

#[async_trait]
impl ExchangePort for Exchange {
    fn venue(&self) -> Venue {
        self.port().venue()
    }

    async fn get_balances(&self, kind: BalanceKind) -> Result<Vec<Balance>> {
        self.port().get_balances(kind).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.port().get_positions().await
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        self.port().list_orders(status).await
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        self.port().place_order(request).await
    }

    async fn cancel_order(&self, symbol: &str, id_or_client_oid: &str) -> Result<()> {
        self.port().cancel_order(symbol, id_or_client_oid).await
    }

    async fn ticker_price(&self, symbol: &str) -> Result<f64> {
        self.port().ticker_price(symbol).await
    }

    async fn diagnostics(&self) -> Vec<ClientDiagnostics> {
        self.port().diagnostics().await
    }

    async fn reset_circuit_breakers(&self) {
        self.port().reset_circuit_breakers().await
    }
}
