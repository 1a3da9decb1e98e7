//! Balance and position queries

use anyhow::Result;
use tracing::info;

use super::Output;
use exchange_connect::exchange::{Exchange, ExchangePort};
use exchange_connect::types::BalanceKind;

pub async fn balances(exchange: &Exchange, kind: BalanceKind, output: &Output) -> Result<()> {
    let balances = exchange.get_balances(kind).await?;
    info!("Fetched {} non-zero {:?} balances", balances.len(), kind);

    output.emit(&balances, || {
        let mut lines = vec![format!("{:<10} {:>18} {:>18}", "ASSET", "FREE", "LOCKED")];
        lines.extend(balances.iter().map(|b| {
            format!(
                "{:<10} {:>18.8} {:>18}",
                b.asset,
                b.free,
                b.locked.map(|l| format!("{:.8}", l)).unwrap_or_else(|| "-".into())
            )
        }));
        lines
    })
}

pub async fn positions(exchange: &Exchange, output: &Output) -> Result<()> {
    let positions = exchange.get_positions().await?;
    info!("Fetched {} open positions", positions.len());

    output.emit(&positions, || {
        let mut lines = vec![format!(
            "{:<12} {:<6} {:>14} {:>14} {:>8}",
            "SYMBOL", "SIDE", "QTY", "AVG PRICE", "LEV"
        )];
        lines.extend(positions.iter().map(|p| {
            format!(
                "{:<12} {:<6} {:>14.6} {:>14.4} {:>8}",
                p.symbol,
                format!("{:?}", p.side),
                p.qty,
                p.avg_price,
                p.leverage.map(|l| format!("{}x", l)).unwrap_or_else(|| "-".into())
            )
        }));
        lines
    })
}
