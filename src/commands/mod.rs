//! Subcommand implementations

pub mod account;
pub mod health;
pub mod orders;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use exchange_connect::config::{Config, Venue};
use exchange_connect::exchange::Exchange;

/// Load configuration and build the venue adapter
pub fn connect(config_path: Option<&Path>, venue: Venue) -> Result<Exchange> {
    let config = match config_path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => {
            info!("No configuration file, using {} defaults", venue);
            Config::from_env(venue)?
        }
    };

    info!(
        "Connecting to {} ({:?})",
        config.exchange.venue, config.exchange.environment
    );
    Exchange::from_config(&config).context("Failed to build exchange adapter")
}

/// Result printer honoring `--json`
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or the human-readable `lines` otherwise
    pub fn emit<T: Serialize>(&self, value: &T, lines: impl FnOnce() -> Vec<String>) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            for line in lines() {
                println!("{}", line);
            }
        }
        Ok(())
    }
}
