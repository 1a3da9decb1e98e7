//! Venue payload normalization
//!
//! Venues disagree on envelope shape, field names and number encoding.
//! These functions accept any of the known spellings and produce the
//! shared [`Balance`], [`Position`] and [`Order`] shapes:
//!
//! | concept  | accepted keys                                       |
//! |----------|-----------------------------------------------------|
//! | asset    | `asset`, `coin`, `currency`                         |
//! | free     | `free`, `available`, `availableBalance`, `balance`  |
//! | locked   | `locked`, `frozen`                                  |
//! | quantity | `positionAmt`, `total`, `size`, `origQty`, `qty`    |
//!
//! Numbers may arrive as JSON numbers or numeric strings. Records that
//! lack a required field are skipped with a debug log rather than failing
//! the whole response.

use serde_json::Value;

use crate::types::{
    Balance, Order, OrderRequest, OrderStatus, OrderType, Position, PositionSide, Side,
};

const ASSET_KEYS: &[&str] = &["asset", "coin", "currency"];
const FREE_KEYS: &[&str] = &["free", "available", "availableBalance", "balance"];
const LOCKED_KEYS: &[&str] = &["locked", "frozen"];
const LIST_KEYS: &[&str] = &["data", "balances", "list", "rows"];

const POSITION_QTY_KEYS: &[&str] = &["positionAmt", "total", "size", "qty"];
const POSITION_PRICE_KEYS: &[&str] = &["entryPrice", "openPriceAvg", "avgPrice", "avg_price"];
const POSITION_SIDE_KEYS: &[&str] = &["holdSide", "positionSide", "side"];

const ORDER_ID_KEYS: &[&str] = &["orderId", "order_id", "id"];
const CLIENT_OID_KEYS: &[&str] = &["clientOrderId", "clientOid", "client_oid", "newClientOrderId"];
const ORDER_TYPE_KEYS: &[&str] = &["type", "orderType", "order_type"];
const ORDER_QTY_KEYS: &[&str] = &["origQty", "size", "qty", "quantity"];
const ORDER_STATUS_KEYS: &[&str] = &["status", "state"];

/// Number from a JSON number or a numeric string
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// String from a JSON string or number
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn f64_field(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(as_f64)
}

pub fn string_field(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(as_string)
}

/// The record list inside a payload
///
/// Accepts a bare array or an object wrapping one under a known key.
/// Anything else is an empty list.
pub fn records(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => LIST_KEYS
            .iter()
            .filter_map(|k| payload.get(*k))
            .find_map(|v| match v {
                Value::Array(items) => Some(items.as_slice()),
                Value::Object(_) => Some(records(v)),
                _ => None,
            })
            .unwrap_or(&[]),
        _ => &[],
    }
}

/// Decimal places sent to venues for quantities and prices
pub const DECIMAL_PLACES: i32 = 8;

/// Smallest non-zero value that survives [`format_decimal`]
pub const MIN_DECIMAL_STEP: f64 = 1e-8;

/// Round toward zero to [`DECIMAL_PLACES`]
///
/// The tolerance absorbs binary representation error so that 0.0004 stays
/// 0.0004 instead of dropping to 0.00039999.
pub fn truncate_decimal(value: f64) -> f64 {
    let scale = 10f64.powi(DECIMAL_PLACES);
    ((value * scale) + 1e-6).floor() / scale
}

/// Decimal string for a venue parameter: at most 8 places, no trailing zeros
pub fn format_decimal(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Uppercased side, accepting long/short aliases
pub fn normalize_side(raw: &str) -> Option<Side> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "BUY" | "LONG" | "OPEN_LONG" => Some(Side::Buy),
        "SELL" | "SHORT" | "OPEN_SHORT" => Some(Side::Sell),
        _ => None,
    }
}

fn normalize_position_side(raw: &str) -> Option<PositionSide> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LONG" | "BUY" => Some(PositionSide::Long),
        "SHORT" | "SELL" => Some(PositionSide::Short),
        _ => None,
    }
}

/// Non-zero balances from any supported payload shape
pub fn normalize_balances(payload: &Value) -> Vec<Balance> {
    records(payload)
        .iter()
        .filter_map(|record| {
            let asset = string_field(record, ASSET_KEYS)?;
            let free = f64_field(record, FREE_KEYS).unwrap_or(0.0);
            let locked = f64_field(record, LOCKED_KEYS);

            if free == 0.0 && locked.unwrap_or(0.0) == 0.0 {
                return None;
            }

            Some(Balance {
                asset: asset.to_ascii_uppercase(),
                free,
                locked,
            })
        })
        .collect()
}

/// Open positions; zero quantities are dropped
///
/// When the record has no explicit side, the sign of the quantity decides.
pub fn normalize_positions(payload: &Value) -> Vec<Position> {
    records(payload)
        .iter()
        .filter_map(|record| {
            let symbol = string_field(record, &["symbol"])?;
            let raw_qty = f64_field(record, POSITION_QTY_KEYS)?;
            if raw_qty == 0.0 {
                return None;
            }

            let explicit = string_field(record, POSITION_SIDE_KEYS)
                .and_then(|s| normalize_position_side(&s));
            let side = explicit.unwrap_or(if raw_qty < 0.0 {
                PositionSide::Short
            } else {
                PositionSide::Long
            });

            Some(Position {
                symbol,
                side,
                qty: raw_qty.abs(),
                avg_price: f64_field(record, POSITION_PRICE_KEYS).unwrap_or(0.0),
                leverage: f64_field(record, &["leverage"]),
            })
        })
        .collect()
}

/// One order record, or `None` when id, symbol or side is missing
pub fn normalize_order(record: &Value) -> Option<Order> {
    let id = string_field(record, ORDER_ID_KEYS);
    let symbol = string_field(record, &["symbol"]);
    let side = string_field(record, &["side"]).and_then(|s| normalize_side(&s));

    let (Some(id), Some(symbol), Some(side)) = (id, symbol, side) else {
        tracing::debug!("Skipping incomplete order record: {}", record);
        return None;
    };

    // Market orders report a zero price on some venues
    let price = f64_field(record, &["price"]).filter(|p| *p > 0.0);
    let order_type = string_field(record, ORDER_TYPE_KEYS)
        .and_then(|t| t.parse::<OrderType>().ok())
        .unwrap_or(if price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        });

    Some(Order {
        id,
        symbol,
        side,
        order_type,
        qty: f64_field(record, ORDER_QTY_KEYS).unwrap_or(0.0),
        price,
        status: string_field(record, ORDER_STATUS_KEYS)
            .map(|s| OrderStatus::parse(&s))
            .unwrap_or(OrderStatus::New),
        client_oid: string_field(record, CLIENT_OID_KEYS).unwrap_or_default(),
    })
}

pub fn normalize_orders(payload: &Value) -> Vec<Order> {
    records(payload).iter().filter_map(normalize_order).collect()
}

/// Order built from a placement acknowledgement
///
/// Venues echo anywhere from the full order to just its id. Fields the
/// venue left out are taken from the request.
pub fn acknowledged_order(request: &OrderRequest, payload: &Value) -> Option<Order> {
    let payload = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    };
    let id = string_field(payload, ORDER_ID_KEYS)?;

    Some(Order {
        id,
        symbol: string_field(payload, &["symbol"]).unwrap_or_else(|| request.symbol.clone()),
        side: request.side,
        order_type: request.order_type,
        qty: f64_field(payload, ORDER_QTY_KEYS).unwrap_or(request.qty),
        price: f64_field(payload, &["price"])
            .filter(|p| *p > 0.0)
            .or(request.price),
        status: string_field(payload, ORDER_STATUS_KEYS)
            .map(|s| OrderStatus::parse(&s))
            .unwrap_or(OrderStatus::New),
        client_oid: string_field(payload, CLIENT_OID_KEYS)
            .unwrap_or_else(|| request.client_oid.clone()),
    })
}
