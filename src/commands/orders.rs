//! Order listing, placement and cancellation

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use super::Output;
use exchange_connect::exchange::{Exchange, ExchangePort};
use exchange_connect::types::{Order, OrderRequest, OrderStatus, OrderType, Side};

fn order_line(order: &Order) -> String {
    format!(
        "{:<14} {:<12} {:<5} {:<7} {:>14} {:>14} {:<17} {}",
        order.id,
        order.symbol,
        order.side.as_str(),
        order.order_type.as_str(),
        order.qty,
        order.price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        order.status.to_string(),
        order.client_oid
    )
}

pub async fn list(exchange: &Exchange, status: Option<OrderStatus>, output: &Output) -> Result<()> {
    let orders = exchange.list_orders(status).await?;
    info!("Fetched {} open orders", orders.len());

    output.emit(&orders, || {
        let mut lines = vec![format!(
            "{:<14} {:<12} {:<5} {:<7} {:>14} {:>14} {:<17} {}",
            "ID", "SYMBOL", "SIDE", "TYPE", "QTY", "PRICE", "STATUS", "CLIENT ID"
        )];
        lines.extend(orders.iter().map(order_line));
        lines
    })
}

pub fn build_request(
    symbol: String,
    side: Side,
    order_type: OrderType,
    qty: f64,
    price: Option<f64>,
    client_oid: Option<String>,
    leverage: Option<f64>,
) -> OrderRequest {
    let mut request = match (order_type, price) {
        (OrderType::Limit, Some(price)) => OrderRequest::limit(side, symbol, qty, price),
        _ => OrderRequest::market(side, symbol, qty),
    };
    // Keep the caller's type; a limit without price is rejected downstream
    request.order_type = order_type;
    if let Some(client_oid) = client_oid {
        request = request.with_client_oid(client_oid);
    }
    if let Some(leverage) = leverage {
        request = request.with_leverage(leverage);
    }
    request
}

pub async fn place(exchange: &Exchange, request: OrderRequest, output: &Output) -> Result<()> {
    let requested_qty = request.qty;
    let order = exchange.place_order(request).await?;
    if order.qty < requested_qty {
        warn!(
            "Order quantity reduced by risk sizing: {} -> {}",
            requested_qty, order.qty
        );
    }
    info!("Order {} accepted with status {}", order.id, order.status);

    output.emit(&order, || vec![order_line(&order)])
}

pub async fn cancel(exchange: &Exchange, symbol: &str, id: &str, output: &Output) -> Result<()> {
    exchange.cancel_order(symbol, id).await?;
    output.emit(&json!({"symbol": symbol, "canceled": id}), || {
        vec![format!("Canceled {} on {}", id, symbol)]
    })
}
