//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. A `.env` file in the working
//! directory is read first, so credentials can live outside the JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::http::{ClientConfig, Credentials};
use crate::risk::{CapsConfig, RiskConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub client: ClientConfig,
    pub caps: CapsConfig,
    /// Soft sizing clamp on order placement; absent disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskConfig>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        dotenv::dotenv().ok();
        config.exchange.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults for `venue`, credentials from the environment only
    pub fn from_env(venue: Venue) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Config {
            exchange: ExchangeConfig::new(venue),
            ..Config::default()
        };
        config.exchange.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn with_exchange(mut self, exchange: ExchangeConfig) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_caps(mut self, caps: CapsConfig) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Reject settings that would make the client misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        for (pattern, limit) in &self.client.rate_limits {
            anyhow::ensure!(
                limit.capacity > 0.0 && limit.refill_per_sec > 0.0,
                "Rate limit for '{}' needs positive capacity and refill rate",
                pattern
            );
        }
        anyhow::ensure!(
            self.client.circuit_breaker.failure_threshold > 0,
            "circuit_breaker.failure_threshold must be at least 1"
        );
        anyhow::ensure!(
            self.caps.max_order_usdt >= 0.0 && self.caps.max_position_usdt >= 0.0,
            "Caps must not be negative"
        );
        if let Some(risk) = &self.risk {
            anyhow::ensure!(risk.max_leverage >= 1.0, "risk.max_leverage must be at least 1");
            anyhow::ensure!(
                (0.0..=1.0).contains(&risk.max_risk_per_trade)
                    && (0.0..=1.0).contains(&risk.max_position_size),
                "risk fractions must be within [0, 1]"
            );
        }
        Ok(())
    }
}

/// Supported venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    #[default]
    Binance,
    Bitget,
}

impl Venue {
    /// Prefix of the credential environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Bitget => "BITGET",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Bitget => write!(f, "bitget"),
        }
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bitget" => Ok(Self::Bitget),
            other => Err(format!("unknown venue '{}'", other)),
        }
    }
}

/// Paper trading hits the venue's testnet or demo environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Paper,
    Live,
}

/// Exchange configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub venue: Venue,
    pub environment: Environment,
    /// Overrides the venue's spot REST base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Overrides the venue's futures REST base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub futures_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_passphrase: Option<String>,
}

impl ExchangeConfig {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_futures_base_url(mut self, url: impl Into<String>) -> Self {
        self.futures_base_url = Some(url.into());
        self
    }

    pub fn with_credentials(
        mut self,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.api_key = Some(api_key.into());
        self.api_secret = Some(api_secret.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.api_passphrase = Some(passphrase.into());
        self
    }

    /// Load API credentials from environment, taking precedence over the file
    fn apply_env(&mut self) {
        let prefix = self.venue.env_prefix();
        if let Ok(api_key) = std::env::var(format!("{}_API_KEY", prefix)) {
            self.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var(format!("{}_API_SECRET", prefix)) {
            self.api_secret = Some(api_secret);
        }
        if let Ok(passphrase) = std::env::var(format!("{}_API_PASSPHRASE", prefix)) {
            self.api_passphrase = Some(passphrase);
        }
    }

    /// Signing credentials, or an error naming what is missing
    pub fn credentials(&self) -> crate::error::Result<Credentials> {
        let prefix = self.venue.env_prefix();
        let missing = |what: &str| {
            crate::error::ExchangeError::Config(format!(
                "Missing {} for {} (set {}_{})",
                what,
                self.venue,
                prefix,
                what.to_ascii_uppercase().replace(' ', "_")
            ))
        };

        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing("api key"))?;
        let api_secret = self
            .api_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("api secret"))?;
        let credentials = Credentials::new(api_key, api_secret);

        match (&self.venue, &self.api_passphrase) {
            (Venue::Bitget, Some(passphrase)) if !passphrase.is_empty() => {
                Ok(credentials.with_passphrase(passphrase.clone()))
            }
            (Venue::Bitget, _) => Err(missing("api passphrase")),
            (_, Some(passphrase)) => Ok(credentials.with_passphrase(passphrase.clone())),
            (_, None) => Ok(credentials),
        }
    }

    /// Spot base URL for the configured environment
    pub fn spot_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            match (self.venue, self.environment) {
                (Venue::Binance, Environment::Live) => "https://api.binance.com",
                (Venue::Binance, Environment::Paper) => "https://testnet.binance.vision",
                (Venue::Bitget, _) => "https://api.bitget.com",
            }
            .to_string()
        })
    }

    /// Futures base URL for the configured environment
    pub fn futures_url(&self) -> String {
        self.futures_base_url.clone().unwrap_or_else(|| {
            match (self.venue, self.environment) {
                (Venue::Binance, Environment::Live) => "https://fapi.binance.com".to_string(),
                (Venue::Binance, Environment::Paper) => {
                    "https://testnet.binancefuture.com".to_string()
                }
                (Venue::Bitget, _) => self.spot_url(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "exchange": {"venue": "bitget", "environment": "live", "api_passphrase": "pp"},
                "client": {"timeout_ms": 10000, "backoff": {"attempts": 4}},
                "caps": {"max_order_usdt": 500, "symbol_whitelist": ["BTCUSDT"]},
                "risk": {"max_leverage": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(config.exchange.venue, Venue::Bitget);
        assert_eq!(config.exchange.environment, Environment::Live);
        assert_eq!(config.client.timeout, Duration::from_secs(10));
        assert_eq!(config.client.backoff.attempts, 4);
        assert_eq!(config.caps.max_order_usdt, 500.0);
        let risk = config.risk.unwrap();
        assert_eq!(risk.max_leverage, 5.0);
        assert_eq!(risk.max_risk_per_trade, RiskConfig::default().max_risk_per_trade);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.exchange.venue, Venue::Binance);
        assert_eq!(config.exchange.environment, Environment::Paper);
        assert!(config.risk.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_urls_follow_environment() {
        let paper = ExchangeConfig::new(Venue::Binance);
        assert_eq!(paper.spot_url(), "https://testnet.binance.vision");
        assert_eq!(paper.futures_url(), "https://testnet.binancefuture.com");

        let live = ExchangeConfig::new(Venue::Binance).with_environment(Environment::Live);
        assert_eq!(live.spot_url(), "https://api.binance.com");

        let custom = live.with_base_url("http://127.0.0.1:9000");
        assert_eq!(custom.spot_url(), "http://127.0.0.1:9000");
        assert_eq!(custom.futures_url(), "https://fapi.binance.com");
    }

    #[test]
    fn test_missing_credentials_are_config_errors() {
        let err = ExchangeConfig::new(Venue::Binance).credentials().unwrap_err();
        assert!(err.to_string().contains("BINANCE_API_KEY"));

        let bitget = ExchangeConfig::new(Venue::Bitget).with_credentials("k", "s");
        let err = bitget.credentials().unwrap_err();
        assert!(err.to_string().contains("BITGET_API_PASSPHRASE"));

        let creds = bitget.with_passphrase("p").credentials().unwrap();
        assert_eq!(creds.passphrase(), Some("p"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default().with_risk(RiskConfig::default().with_max_leverage(0.5));
        assert!(config.validate().is_err());

        config.risk = None;
        config.caps = CapsConfig::default().with_max_order_usdt(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join(format!("exchange-connect-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let raw = r#"{"exchange": {"venue": "binance", "api_key": "k", "api_secret": "s"}}"#;
        fs::write(&path, raw).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.exchange.venue, Venue::Binance);
        assert!(config.exchange.api_key.is_some());

        assert!(Config::from_file(dir.join("missing.json")).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
