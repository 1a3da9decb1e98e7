//! Bitget adapter (spot v2 API)
//!
//! Every response is wrapped as `{ "code", "msg", "data" }`; a code other
//! than `00000` is a venue error even when the HTTP status is 200. Futures
//! balances and positions are not wired up for this venue and return empty.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::normalize::{self, format_decimal};
use super::{filter_status, ClientDiagnostics, ExchangePort, OrderGuard, OrderRef};
use crate::config::{Environment, ExchangeConfig, Venue};
use crate::error::{ExchangeError, Result};
use crate::http::signing::Params;
use crate::http::{
    ClientConfig, Credentials, ReqwestTransport, SignatureScheme, SignedHttpClient, Transport,
};
use crate::types::{Balance, BalanceKind, Order, OrderRequest, OrderStatus, OrderType, Position};

const ASSETS: &str = "/api/v2/spot/account/assets";
const UNFILLED_ORDERS: &str = "/api/v2/spot/trade/unfilled-orders";
const PLACE_ORDER: &str = "/api/v2/spot/trade/place-order";
const CANCEL_ORDER: &str = "/api/v2/spot/trade/cancel-order";
const TICKERS: &str = "/api/v2/spot/market/tickers";

/// Success code inside the response envelope
pub const SUCCESS_CODE: &str = "00000";

/// Order does not exist
const UNKNOWN_ORDER_CODE: &str = "43001";

#[derive(Debug, Clone)]
pub struct BitgetAdapter {
    client: SignedHttpClient,
    guard: OrderGuard,
}

impl BitgetAdapter {
    pub fn new(client: SignedHttpClient, guard: OrderGuard) -> Self {
        Self { client, guard }
    }

    pub fn from_config(
        exchange: &ExchangeConfig,
        client: &ClientConfig,
        guard: OrderGuard,
    ) -> Result<Self> {
        let credentials = exchange.credentials()?;
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(client.timeout)?);
        let mut signed = SignedHttpClient::with_transport(
            exchange.spot_url(),
            credentials,
            SignatureScheme::HeaderBase64,
            transport,
            client,
        );
        // Demo trading shares the live host and is selected per request
        if exchange.environment == Environment::Paper {
            signed = signed.with_header("paptrading", "1");
        }
        Ok(Self::new(signed, guard))
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        client: &ClientConfig,
        guard: OrderGuard,
    ) -> Self {
        let signed = SignedHttpClient::with_transport(
            base_url,
            credentials,
            SignatureScheme::HeaderBase64,
            transport,
            client,
        );
        Self::new(signed, guard)
    }

    pub fn client(&self) -> &SignedHttpClient {
        &self.client
    }

    async fn send_cancel(&self, symbol: &str, reference: OrderRef<'_>) -> Result<()> {
        let mut body = json!({ "symbol": symbol });
        match reference {
            OrderRef::Venue(id) => body["orderId"] = Value::String(id.to_string()),
            OrderRef::Client(id) => body["clientOid"] = Value::String(id.to_string()),
        }
        let payload = self.client.post(CANCEL_ORDER, Params::new(), Some(body)).await?;
        unwrap_envelope(payload).map(|_| ())
    }

    fn order_body(request: &OrderRequest) -> Value {
        let mut body = json!({
            "symbol": request.symbol,
            "side": request.side.as_str().to_ascii_lowercase(),
            "orderType": request.order_type.as_str().to_ascii_lowercase(),
            "force": "gtc",
            "size": format_decimal(request.qty),
            "clientOid": request.client_oid,
        });
        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                body["price"] = Value::String(format_decimal(price));
            }
        }
        body
    }
}

/// The `data` member of a successful envelope
pub fn unwrap_envelope(payload: Value) -> Result<Value> {
    let code = payload
        .get("code")
        .and_then(normalize::as_string)
        .unwrap_or_default();

    if code != SUCCESS_CODE {
        let message = payload
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ExchangeError::Venue { code, message });
    }

    Ok(payload.get("data").cloned().unwrap_or(Value::Null))
}

#[async_trait]
impl ExchangePort for BitgetAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    async fn get_balances(&self, kind: BalanceKind) -> Result<Vec<Balance>> {
        if kind == BalanceKind::Futures {
            tracing::warn!("Bitget futures balances are not supported, returning empty list");
            return Ok(Vec::new());
        }
        let data = unwrap_envelope(self.client.get(ASSETS, Params::new()).await?)?;
        Ok(normalize::normalize_balances(&data))
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        tracing::warn!("Bitget positions are not supported, returning empty list");
        Ok(Vec::new())
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let data = unwrap_envelope(self.client.get(UNFILLED_ORDERS, Params::new()).await?)?;
        Ok(filter_status(normalize::normalize_orders(&data), status.as_ref()))
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let request = self.guard.prepare(self, request).await?;
        let body = Self::order_body(&request);

        tracing::info!(
            "Placing {} {} {} {} (client id {})",
            request.side.as_str(),
            request.order_type.as_str(),
            format_decimal(request.qty),
            request.symbol,
            request.client_oid
        );

        let payload = self.client.post(PLACE_ORDER, Params::new(), Some(body)).await?;
        let data = unwrap_envelope(payload)?;
        normalize::acknowledged_order(&request, &data).ok_or_else(|| {
            ExchangeError::Protocol(format!("Order acknowledgement without orderId: {}", data))
        })
    }

    async fn cancel_order(&self, symbol: &str, id_or_client_oid: &str) -> Result<()> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let reference = OrderRef::parse(id_or_client_oid);

        match self.send_cancel(&symbol, reference).await {
            Err(err) if err.venue_code().as_deref() == Some(UNKNOWN_ORDER_CODE) => {
                let Some(client) = reference.client_fallback() else {
                    return Err(err);
                };
                tracing::debug!(
                    "No order with id {}, retrying as client order id",
                    id_or_client_oid
                );
                self.send_cancel(&symbol, client).await?;
            }
            other => other?,
        }
        tracing::info!("Canceled order {} on {}", id_or_client_oid, symbol);
        Ok(())
    }

    async fn ticker_price(&self, symbol: &str) -> Result<f64> {
        let mut params = Params::new();
        params.insert("symbol".into(), symbol.to_ascii_uppercase());
        let data = unwrap_envelope(self.client.public_get(TICKERS, params).await?)?;

        normalize::records(&data)
            .first()
            .and_then(|t| normalize::f64_field(t, &["lastPr", "close", "price"]))
            .filter(|p| *p > 0.0)
            .ok_or_else(|| {
                ExchangeError::Protocol(format!("No ticker price for {}: {}", symbol, data))
            })
    }

    async fn diagnostics(&self) -> Vec<ClientDiagnostics> {
        vec![ClientDiagnostics::collect("spot", &self.client).await]
    }

    async fn reset_circuit_breakers(&self) {
        self.client.reset_circuit_breaker().await;
    }
}
