//! Binance adapter
//!
//! Spot calls go to `/api/v3/*`, USD-M futures calls to `/fapi/v2/*`.
//! The two live on different hosts, so each gets its own client and
//! therefore its own circuit breaker: a futures outage does not block
//! spot trading.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::normalize::{self, format_decimal};
use super::{filter_status, ClientDiagnostics, ExchangePort, OrderGuard, OrderRef};
use crate::config::{ExchangeConfig, Venue};
use crate::error::{ExchangeError, Result};
use crate::http::signing::Params;
use crate::http::{
    ClientConfig, Credentials, ReqwestTransport, SignatureScheme, SignedHttpClient, Transport,
};
use crate::types::{Balance, BalanceKind, Order, OrderRequest, OrderStatus, OrderType, Position};

const ACCOUNT: &str = "/api/v3/account";
const OPEN_ORDERS: &str = "/api/v3/openOrders";
const ORDER: &str = "/api/v3/order";
const TICKER_PRICE: &str = "/api/v3/ticker/price";
const FUTURES_BALANCE: &str = "/fapi/v2/balance";
const FUTURES_POSITIONS: &str = "/fapi/v2/positionRisk";

/// "Unknown order sent."
const UNKNOWN_ORDER_CODE: &str = "-2011";

#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    spot: SignedHttpClient,
    futures: SignedHttpClient,
    guard: OrderGuard,
}

impl BinanceAdapter {
    pub fn new(spot: SignedHttpClient, futures: SignedHttpClient, guard: OrderGuard) -> Self {
        Self { spot, futures, guard }
    }

    /// Build spot and futures clients, each over its own reqwest transport
    pub fn from_config(
        exchange: &ExchangeConfig,
        client: &ClientConfig,
        guard: OrderGuard,
    ) -> Result<Self> {
        let credentials = exchange.credentials()?;
        let spot_transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(client.timeout)?);
        let futures_transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::new(client.timeout)?);
        Ok(Self::with_transports(
            exchange.spot_url(),
            exchange.futures_url(),
            credentials,
            spot_transport,
            futures_transport,
            client,
            guard,
        ))
    }

    pub fn with_transports(
        spot_url: impl Into<String>,
        futures_url: impl Into<String>,
        credentials: Credentials,
        spot_transport: Arc<dyn Transport>,
        futures_transport: Arc<dyn Transport>,
        client: &ClientConfig,
        guard: OrderGuard,
    ) -> Self {
        let spot = SignedHttpClient::with_transport(
            spot_url,
            credentials.clone(),
            SignatureScheme::QueryHex,
            spot_transport,
            client,
        );
        let futures = SignedHttpClient::with_transport(
            futures_url,
            credentials,
            SignatureScheme::QueryHex,
            futures_transport,
            client,
        );
        Self::new(spot, futures, guard)
    }

    pub fn spot_client(&self) -> &SignedHttpClient {
        &self.spot
    }

    pub fn futures_client(&self) -> &SignedHttpClient {
        &self.futures
    }

    async fn send_cancel(&self, symbol: &str, reference: OrderRef<'_>) -> Result<()> {
        let mut params = Params::new();
        params.insert("symbol".into(), symbol.to_string());
        match reference {
            OrderRef::Venue(id) => params.insert("orderId".into(), id.to_string()),
            OrderRef::Client(id) => params.insert("origClientOrderId".into(), id.to_string()),
        };
        self.spot.delete(ORDER, params).await.map(|_| ())
    }

    fn order_params(request: &OrderRequest) -> Params {
        let mut params = Params::new();
        params.insert("symbol".into(), request.symbol.clone());
        params.insert("side".into(), request.side.as_str().into());
        params.insert("type".into(), request.order_type.as_str().into());
        params.insert("quantity".into(), format_decimal(request.qty));
        params.insert("newClientOrderId".into(), request.client_oid.clone());
        params.insert("newOrderRespType".into(), "RESULT".into());

        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                params.insert("price".into(), format_decimal(price));
            }
            params.insert("timeInForce".into(), "GTC".into());
        }
        params
    }
}

#[async_trait]
impl ExchangePort for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn get_balances(&self, kind: BalanceKind) -> Result<Vec<Balance>> {
        let payload = match kind {
            BalanceKind::Spot => self.spot.get(ACCOUNT, Params::new()).await?,
            BalanceKind::Futures => self.futures.get(FUTURES_BALANCE, Params::new()).await?,
        };
        Ok(normalize::normalize_balances(&payload))
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let payload = self.futures.get(FUTURES_POSITIONS, Params::new()).await?;
        Ok(normalize::normalize_positions(&payload))
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let payload = self.spot.get(OPEN_ORDERS, Params::new()).await?;
        Ok(filter_status(normalize::normalize_orders(&payload), status.as_ref()))
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let request = self.guard.prepare(self, request).await?;
        let params = Self::order_params(&request);

        tracing::info!(
            "Placing {} {} {} {} (client id {})",
            request.side.as_str(),
            request.order_type.as_str(),
            format_decimal(request.qty),
            request.symbol,
            request.client_oid
        );

        let payload = self.spot.post(ORDER, params, None).await?;
        normalize::acknowledged_order(&request, &payload).ok_or_else(|| {
            ExchangeError::Protocol(format!("Order acknowledgement without orderId: {}", payload))
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
        let payload = self.spot.public_get(TICKER_PRICE, params).await?;
        ticker_from(&payload, symbol)
    }

    async fn diagnostics(&self) -> Vec<ClientDiagnostics> {
        vec![
            ClientDiagnostics::collect("spot", &self.spot).await,
            ClientDiagnostics::collect("futures", &self.futures).await,
        ]
    }

    async fn reset_circuit_breakers(&self) {
        self.spot.reset_circuit_breaker().await;
        self.futures.reset_circuit_breaker().await;
    }
}

fn ticker_from(payload: &Value, symbol: &str) -> Result<f64> {
    normalize::f64_field(payload, &["price"])
        .filter(|p| *p > 0.0)
        .ok_or_else(|| {
            ExchangeError::Protocol(format!("No ticker price for {}: {}", symbol, payload))
        })
}
