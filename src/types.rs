//! Venue-agnostic data shapes exposed to callers
//!
//! Everything here is produced fresh per request and never cached.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which wallet a balance query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    #[default]
    Spot,
    Futures,
}

impl FromStr for BalanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "futures" | "perp" | "perps" => Ok(Self::Futures),
            other => Err(format!("unknown balance kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<f64>,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.locked.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute quantity; direction is carried by `side`
    pub qty: f64,
    pub avg_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<f64>,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.qty * self.avg_price
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIMIT" => Ok(Self::Limit),
            "MARKET" => Ok(Self::Market),
            other => Err(format!("unknown order type '{}'", other)),
        }
    }
}

/// Order lifecycle as reported by the venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Unknown(String),
}

impl OrderStatus {
    /// Map a venue status string, ignoring case and separators
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "new" | "live" | "init" | "open" => Self::New,
            "partiallyfilled" | "partialfill" => Self::PartiallyFilled,
            "filled" | "fullfill" => Self::Filled,
            "canceled" | "cancelled" => Self::Canceled,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Order as acknowledged by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned identifier
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub status: OrderStatus,
    /// Caller-supplied idempotency anchor
    pub client_oid: String,
}

/// Caller's order intent before submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub client_oid: String,
    /// Requested leverage; sizing never exceeds the configured maximum
    #[serde(default)]
    pub leverage: Option<f64>,
}

impl OrderRequest {
    pub fn limit(side: Side, symbol: impl Into<String>, qty: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            client_oid: String::new(),
            leverage: None,
        }
    }

    pub fn market(side: Side, symbol: impl Into<String>, qty: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            client_oid: String::new(),
            leverage: None,
        }
    }

    pub fn with_client_oid(mut self, client_oid: impl Into<String>) -> Self {
        self.client_oid = client_oid.into();
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }

    /// Fill in a client order id when the caller left it empty
    pub fn ensure_client_oid(&mut self) -> &str {
        if self.client_oid.trim().is_empty() {
            self.client_oid = uuid::Uuid::new_v4().simple().to_string();
        }
        &self.client_oid
    }
}
