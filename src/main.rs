//! Exchange connectivity - operator CLI
//!
//! This binary provides six subcommands:
//! - balances: Spot or futures balances
//! - positions: Open futures positions
//! - orders: Open orders, optionally filtered by status
//! - place: Submit an order through caps and risk checks
//! - cancel: Cancel by order id or client order id
//! - health: Circuit breaker and rate limiter diagnostics

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exchange_connect::config::Venue;
use exchange_connect::types::{BalanceKind, OrderStatus, OrderType, Side};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "exchange-connect")]
#[command(
    about = "Resilient exchange connectivity: balances, positions and orders across venues",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file; without it defaults and environment credentials are used
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Venue to use when no configuration file is given
    #[arg(long, global = true, default_value = "binance")]
    venue: Venue,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON logs and JSON results
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show non-zero balances
    Balances {
        /// Wallet to query (spot or futures)
        #[arg(short, long, default_value = "spot")]
        kind: BalanceKind,
    },

    /// Show open positions
    Positions,

    /// List open orders
    Orders {
        /// Only orders in this status (e.g. NEW, PARTIALLY_FILLED)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Place an order
    Place {
        /// Trading pair, e.g. BTCUSDT
        #[arg(short, long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: Side,

        /// LIMIT or MARKET
        #[arg(long = "type", default_value = "LIMIT")]
        order_type: OrderType,

        /// Quantity in base asset
        #[arg(short, long)]
        qty: f64,

        /// Limit price (required for LIMIT)
        #[arg(short, long)]
        price: Option<f64>,

        /// Idempotency key; generated when omitted
        #[arg(long)]
        client_oid: Option<String>,

        /// Requested leverage for risk sizing
        #[arg(long)]
        leverage: Option<f64>,
    },

    /// Cancel an order
    Cancel {
        /// Trading pair the order belongs to
        #[arg(short, long)]
        symbol: String,

        /// Venue order id or client order id
        #[arg(long)]
        id: String,
    },

    /// Show circuit state and rate-limit tokens
    Health {
        /// Close every circuit breaker before reporting
        #[arg(long)]
        reset: bool,
    },
}

fn setup_logging(verbose: bool, json: bool, command_name: &str) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    // Console goes to stderr so stdout carries only results
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
    });
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    // File layer - same format but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Balances { .. } => "balances",
        Commands::Positions => "positions",
        Commands::Orders { .. } => "orders",
        Commands::Place { .. } => "place",
        Commands::Cancel { .. } => "cancel",
        Commands::Health { .. } => "health",
    };

    setup_logging(cli.verbose, cli.json, command_name)?;

    let exchange = commands::connect(cli.config.as_deref(), cli.venue)?;
    let output = commands::Output::new(cli.json);

    match cli.command {
        Commands::Balances { kind } => commands::account::balances(&exchange, kind, &output).await,
        Commands::Positions => commands::account::positions(&exchange, &output).await,
        Commands::Orders { status } => {
            let status = status.as_deref().map(OrderStatus::parse);
            commands::orders::list(&exchange, status, &output).await
        }
        Commands::Place {
            symbol,
            side,
            order_type,
            qty,
            price,
            client_oid,
            leverage,
        } => {
            let request = commands::orders::build_request(
                symbol, side, order_type, qty, price, client_oid, leverage,
            );
            commands::orders::place(&exchange, request, &output).await
        }
        Commands::Cancel { symbol, id } => {
            commands::orders::cancel(&exchange, &symbol, &id, &output).await
        }
        Commands::Health { reset } => commands::health::run(&exchange, reset, &output).await,
    }
}
