//! Configuration management.
//!
//! Loads settings from an optional `config` file plus `PP__`-prefixed
//! environment variables. Every component receives its slice of this struct
//! explicitly — there are no process-wide globals.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lifecycle::LifecycleConfig;
use crate::strategy::SignalConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bybit API credentials
    #[serde(default)]
    pub bybit: BybitConfig,
    /// Symbols, risk, and entry parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Indicator lookback windows
    #[serde(default)]
    pub signal: SignalConfig,
    /// Lifecycle timing knobs
    #[serde(default)]
    pub lifecycle: LifecycleTimingConfig,
    /// State persistence
    #[serde(default)]
    pub state: StateConfig,
    /// Operator notifications (disabled when unset)
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret for request signing
    #[serde(default)]
    pub api_secret: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols to track and trade
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Candle interval in minutes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    /// Whether signals place real orders or only notify
    #[serde(default)]
    pub enable_trading: bool,
    /// Position leverage
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Risk per trade for trend-regime signals, percent of balance
    #[serde(default = "default_trend_risk")]
    pub trend_risk_percent: Decimal,
    /// Risk per trade for range-regime signals, percent of balance
    #[serde(default = "default_range_risk")]
    pub range_risk_percent: Decimal,
    /// Fraction of balance allowed as position margin
    #[serde(default = "default_margin_limit")]
    pub margin_limit: Decimal,
    /// Percentage of the position closed at the first target
    #[serde(default = "default_staged_exit_percent")]
    pub staged_exit_percent: Decimal,
    /// Minimum seconds between emitted signals per symbol
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Settlement coin for balances
    #[serde(default = "default_settlement_coin")]
    pub settlement_coin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTimingConfig {
    /// Seconds between reconciliation sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Position polls before an entry is declared unconfirmed
    #[serde(default = "default_entry_confirm_attempts")]
    pub entry_confirm_attempts: u32,
    /// Milliseconds between entry-confirmation polls
    #[serde(default = "default_entry_confirm_delay_ms")]
    pub entry_confirm_delay_ms: u64,
    /// Seconds to let a protective update settle before verifying
    #[serde(default = "default_migration_settle_secs")]
    pub migration_settle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// SQLite database holding the per-symbol lifecycle records
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }
}

// Default value functions

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_interval_minutes() -> u32 {
    1
}

fn default_leverage() -> u32 {
    5
}

fn default_trend_risk() -> Decimal {
    Decimal::ONE // 1%
}

fn default_range_risk() -> Decimal {
    Decimal::new(5, 1) // 0.5%
}

fn default_margin_limit() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

fn default_staged_exit_percent() -> Decimal {
    Decimal::new(50, 0)
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_settlement_coin() -> String {
    "USDT".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    15
}

fn default_entry_confirm_attempts() -> u32 {
    5
}

fn default_entry_confirm_delay_ms() -> u64 {
    1000
}

fn default_migration_settle_secs() -> u64 {
    3
}

fn default_db_path() -> String {
    "data/positions.db".to_string()
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval_minutes: default_interval_minutes(),
            enable_trading: false,
            leverage: default_leverage(),
            trend_risk_percent: default_trend_risk(),
            range_risk_percent: default_range_risk(),
            margin_limit: default_margin_limit(),
            staged_exit_percent: default_staged_exit_percent(),
            cooldown_secs: default_cooldown_secs(),
            settlement_coin: default_settlement_coin(),
        }
    }
}

impl Default for LifecycleTimingConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            entry_confirm_attempts: default_entry_confirm_attempts(),
            entry_confirm_delay_ms: default_entry_confirm_delay_ms(),
            migration_settle_secs: default_migration_settle_secs(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PP"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.trading.symbols.is_empty(),
            "at least one symbol must be configured"
        );
        anyhow::ensure!(
            self.trading.interval_minutes >= 1,
            "interval_minutes must be >= 1"
        );
        anyhow::ensure!(self.trading.leverage >= 1, "leverage must be >= 1");
        anyhow::ensure!(
            self.trading.margin_limit > Decimal::ZERO && self.trading.margin_limit <= Decimal::ONE,
            "margin_limit must be between 0 and 1"
        );
        anyhow::ensure!(
            self.trading.staged_exit_percent > Decimal::ZERO
                && self.trading.staged_exit_percent <= Decimal::new(100, 0),
            "staged_exit_percent must be between 0 and 100"
        );
        anyhow::ensure!(
            self.trading.trend_risk_percent > Decimal::ZERO
                && self.trading.range_risk_percent > Decimal::ZERO,
            "risk percentages must be positive"
        );
        Ok(())
    }

    /// The lifecycle controller's slice of the configuration.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            settlement_coin: self.trading.settlement_coin.clone(),
            leverage: self.trading.leverage,
            margin_limit: self.trading.margin_limit,
            staged_exit_percent: self.trading.staged_exit_percent,
            entry_confirm_attempts: self.lifecycle.entry_confirm_attempts,
            entry_confirm_delay: Duration::from_millis(self.lifecycle.entry_confirm_delay_ms),
            migration_settle_delay: Duration::from_secs(self.lifecycle.migration_settle_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_margin_limit_rejected() {
        let mut config = Config::default();
        config.trading.margin_limit = Decimal::new(15, 1); // 1.5
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telegram_configured_requires_both_fields() {
        let mut tg = TelegramConfig::default();
        assert!(!tg.is_configured());
        tg.token = "token".to_string();
        assert!(!tg.is_configured());
        tg.chat_id = "42".to_string();
        assert!(tg.is_configured());
    }
}
