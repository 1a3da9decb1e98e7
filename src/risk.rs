//! Pre-trade risk controls
//!
//! Two tiers guard order placement:
//!
//! - [`enforce_caps`] is a hard check. A violation rejects the order with
//!   [`ExchangeError::Validation`] before anything reaches the network.
//! - [`calculate_futures_position_size`] is a soft guard. Order placement
//!   silently clamps quantity down to its recommendation.
//!
//! All notional values are quoted in USDT. A cap of zero means the
//! dimension is unconstrained.
//!
//! Position sizing formula:
//! ```text
//! effective_leverage = max(1, min(leverage, max_leverage))
//! by_risk            = balance * max_risk_per_trade * effective_leverage / price
//! by_position        = balance * max_position_size / price
//! qty                = min(by_risk, by_position)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ExchangeError, Result};

/// Hard notional caps and symbol whitelist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsConfig {
    /// Maximum notional per order; 0 disables the check
    pub max_order_usdt: f64,
    /// Maximum notional held in one symbol; 0 disables the check
    pub max_position_usdt: f64,
    /// Tradable symbols; empty allows everything
    pub symbol_whitelist: BTreeSet<String>,
}

impl CapsConfig {
    pub fn with_max_order_usdt(mut self, max: f64) -> Self {
        self.max_order_usdt = max;
        self
    }

    pub fn with_max_position_usdt(mut self, max: f64) -> Self {
        self.max_position_usdt = max;
        self
    }

    pub fn with_whitelist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbol_whitelist = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_whitelisted(&self, symbol: &str) -> bool {
        self.symbol_whitelist.is_empty() || self.symbol_whitelist.contains(symbol)
    }

    /// True when no cap or whitelist is set
    pub fn is_unconstrained(&self) -> bool {
        self.max_order_usdt <= 0.0
            && self.max_position_usdt <= 0.0
            && self.symbol_whitelist.is_empty()
    }
}

/// One order's exposure as seen by [`enforce_caps`]
#[derive(Debug, Clone, PartialEq)]
pub struct CapsCheck {
    pub symbol: String,
    pub order_notional_usdt: f64,
    /// Resulting position notional; `None` when not known
    pub position_notional_usdt: Option<f64>,
}

impl CapsCheck {
    pub fn new(symbol: impl Into<String>, order_notional_usdt: f64) -> Self {
        Self {
            symbol: symbol.into(),
            order_notional_usdt,
            position_notional_usdt: None,
        }
    }

    pub fn with_position_notional(mut self, notional: f64) -> Self {
        self.position_notional_usdt = Some(notional);
        self
    }
}

/// Reject an order that breaks the whitelist or a notional cap
pub fn enforce_caps(check: &CapsCheck, caps: &CapsConfig) -> Result<()> {
    if !caps.is_whitelisted(&check.symbol) {
        return Err(ExchangeError::Validation(format!(
            "Symbol {} not whitelisted",
            check.symbol
        )));
    }

    if caps.max_order_usdt > 0.0 && check.order_notional_usdt > caps.max_order_usdt {
        return Err(ExchangeError::Validation(format!(
            "Order notional {:.2} USDT exceeds max {:.2} USDT",
            check.order_notional_usdt, caps.max_order_usdt
        )));
    }

    if let Some(position) = check.position_notional_usdt {
        if caps.max_position_usdt > 0.0 && position > caps.max_position_usdt {
            return Err(ExchangeError::Validation(format!(
                "Position notional {:.2} USDT exceeds max {:.2} USDT",
                position, caps.max_position_usdt
            )));
        }
    }

    Ok(())
}

/// Soft sizing limits for leveraged orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_leverage: f64,
    /// Fraction of balance put at risk per trade (0.02 = 2%)
    pub max_risk_per_trade: f64,
    /// Fraction of balance a single position may occupy
    pub max_position_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: 3.0,
            max_risk_per_trade: 0.02,
            max_position_size: 0.10,
        }
    }
}

impl RiskConfig {
    pub fn with_max_leverage(mut self, leverage: f64) -> Self {
        self.max_leverage = leverage;
        self
    }

    pub fn with_max_risk_per_trade(mut self, risk: f64) -> Self {
        self.max_risk_per_trade = risk;
        self
    }

    pub fn with_max_position_size(mut self, size: f64) -> Self {
        self.max_position_size = size;
        self
    }

    pub fn effective_leverage(&self, requested: f64) -> f64 {
        requested.min(self.max_leverage).max(1.0)
    }
}

/// Recommended quantity for a leveraged position
///
/// Returns 0 for non-positive balance or price.
pub fn calculate_futures_position_size(
    balance: f64,
    price: f64,
    risk: &RiskConfig,
    leverage: f64,
) -> f64 {
    if balance <= 0.0 || price <= 0.0 || !balance.is_finite() || !price.is_finite() {
        return 0.0;
    }

    let leverage = risk.effective_leverage(leverage);
    let by_risk = balance * risk.max_risk_per_trade * leverage / price;
    let by_position = balance * risk.max_position_size / price;

    by_risk.min(by_position).max(0.0)
}

/// Quantity after the soft clamp; never larger than `requested`
pub fn clamp_quantity(
    requested: f64,
    balance: f64,
    price: f64,
    risk: &RiskConfig,
    leverage: f64,
) -> f64 {
    let recommended = calculate_futures_position_size(balance, price, risk, leverage);
    if requested > recommended {
        tracing::info!(
            "Clamping order quantity {} -> {} (balance {}, price {})",
            requested,
            recommended,
            balance,
            price
        );
        recommended
    } else {
        requested
    }
}
