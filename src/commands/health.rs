//! Circuit breaker and rate limiter diagnostics

use anyhow::Result;
use tracing::info;

use super::Output;
use exchange_connect::exchange::{Exchange, ExchangePort};

pub async fn run(exchange: &Exchange, reset: bool, output: &Output) -> Result<()> {
    if reset {
        exchange.reset_circuit_breakers().await;
        info!("Circuit breakers reset by operator");
    }

    let diagnostics = exchange.diagnostics().await;
    output.emit(&diagnostics, || {
        let mut lines = Vec::new();
        for client in &diagnostics {
            lines.push(format!(
                "[{}] {} circuit={:?} failures={} successes={}",
                client.name,
                client.base_url,
                client.circuit.state,
                client.circuit.failure_count,
                client.circuit.success_count
            ));
            if client.tokens.is_empty() {
                lines.push("    no endpoints used yet".to_string());
            }
            for (endpoint, tokens) in &client.tokens {
                lines.push(format!("    {:<40} {:>8.2} tokens", endpoint, tokens));
            }
        }
        lines
    })
}
