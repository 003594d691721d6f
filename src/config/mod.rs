//! Configuration management for the spot rebalancer.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Target allocation and currency roles
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Decision thresholds
    #[serde(default)]
    pub trading: TradingConfig,
    /// Order placement parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Trend signal settings
    #[serde(default)]
    pub signal: SignalConfig,
    /// Cycle scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Signed request validity window in milliseconds
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Per-call timeout; expiry is treated as a transport failure
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// One entry of the ordered target allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWeight {
    pub asset: String,
    pub fraction: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Currency every core order is denominated in
    #[serde(default = "default_trade_pair")]
    pub trade_pair: String,
    /// Currency budgets and gaps are expressed in
    #[serde(default = "default_valuation_currency")]
    pub valuation_currency: String,
    /// Intermediate unit for cross-pair valuation
    #[serde(default = "default_anchor_asset")]
    pub anchor_asset: String,
    /// Assets treated as 1:1 with the valuation currency
    #[serde(default = "default_stable_assets")]
    pub stable_assets: Vec<String>,
    /// Target fraction of budget per core asset, in trading order
    #[serde(default = "default_allocation")]
    pub allocation: Vec<TargetWeight>,
    /// Secondary assets eligible for leftover budget
    #[serde(default = "default_substitutes")]
    pub substitutes: Vec<String>,
    /// Asset used to pay trading fees
    #[serde(default = "default_fee_asset")]
    pub fee_asset: String,
    /// Minimum absolute fee-asset holding (0 disables the floor)
    #[serde(default)]
    pub fee_asset_min_holding: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Smallest gap (valuation currency) worth trading
    #[serde(default = "default_min_trade_value")]
    pub min_trade_value: Decimal,
    /// Maximum fraction of the budget a single substitute may take
    #[serde(default = "default_max_substitute_fraction")]
    pub max_substitute_fraction: Decimal,
    /// Holdings worth this much or less are ignored
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: Decimal,
    /// Sell over-target core holdings back down to target
    #[serde(default = "default_take_profit")]
    pub take_profit: bool,
    /// Consider substitutes that are already held for further buys
    #[serde(default)]
    pub rebuy_held_substitutes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Taker fee in percent, deducted from buy quantities
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: Decimal,
    /// Quantity reduction applied to the single retry (0.10 = 10%)
    #[serde(default = "default_retry_reduction")]
    pub retry_reduction: Decimal,
    /// Log orders instead of submitting them
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Order book levels fetched for limit pricing
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: u16,
    /// Recent trades averaged for limit pricing
    #[serde(default = "default_trade_sample_size")]
    pub trade_sample_size: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Answer of the static provider for assets not listed below
    #[serde(default = "default_bullish")]
    pub default_bullish: bool,
    /// Assets the static provider reports as bearish
    #[serde(default)]
    pub bearish: Vec<String>,
    /// Candle interval used for substitute volume ranking
    #[serde(default = "default_volume_interval")]
    pub volume_interval: String,
    /// Number of candles averaged for substitute volume ranking
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes between rebalancing cycles
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

// Default value functions
fn default_recv_window() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_trade_pair() -> String {
    "USDT".to_string()
}

fn default_valuation_currency() -> String {
    "USDT".to_string()
}

fn default_anchor_asset() -> String {
    "BTC".to_string()
}

fn default_stable_assets() -> Vec<String> {
    ["USDT", "USDC", "FDUSD", "TUSD", "BUSD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_allocation() -> Vec<TargetWeight> {
    [
        ("BTC", Decimal::new(25, 2)),
        ("LTC", Decimal::new(15, 2)),
        ("BNB", Decimal::new(10, 2)),
        ("ETH", Decimal::new(10, 2)),
        ("ADA", Decimal::new(5, 2)),
        ("EOS", Decimal::new(5, 2)),
        ("ONT", Decimal::new(5, 2)),
        ("TRX", Decimal::new(5, 2)),
        ("NANO", Decimal::new(5, 2)),
        ("XLM", Decimal::new(5, 2)),
        ("OMG", Decimal::new(5, 2)),
        ("VET", Decimal::new(5, 2)),
    ]
    .iter()
    .map(|(asset, fraction)| TargetWeight {
        asset: asset.to_string(),
        fraction: *fraction,
    })
    .collect()
}

fn default_substitutes() -> Vec<String> {
    ["ENJ", "BAT", "BTT", "QTUM", "ICX", "NEO", "IOTA", "BCHABC", "THETA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fee_asset() -> String {
    "BNB".to_string()
}

fn default_min_trade_value() -> Decimal {
    Decimal::new(50, 0) // $50
}

fn default_max_substitute_fraction() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_dust_threshold() -> Decimal {
    Decimal::new(10, 0) // $10
}

fn default_take_profit() -> bool {
    true
}

fn default_taker_fee_pct() -> Decimal {
    Decimal::new(55, 3) // 0.055%
}

fn default_retry_reduction() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_dry_run() -> bool {
    true
}

fn default_order_book_depth() -> u16 {
    5
}

fn default_trade_sample_size() -> u16 {
    10
}

fn default_bullish() -> bool {
    true
}

fn default_volume_interval() -> String {
    "2h".to_string()
}

fn default_volume_lookback() -> u16 {
    20
}

fn default_interval_minutes() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("RBL")
                    .list_separator(",")
                    .with_list_parse_key("portfolio.substitutes")
                    .with_list_parse_key("portfolio.stable_assets")
                    .with_list_parse_key("signal.bearish")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let portfolio = &self.portfolio;

        anyhow::ensure!(
            !portfolio.trade_pair.is_empty()
                && !portfolio.valuation_currency.is_empty()
                && !portfolio.anchor_asset.is_empty(),
            "trade_pair, valuation_currency and anchor_asset must be set"
        );

        anyhow::ensure!(
            !portfolio.allocation.is_empty(),
            "allocation must contain at least one asset"
        );

        let mut seen = HashSet::new();
        for target in &portfolio.allocation {
            anyhow::ensure!(
                target.fraction >= Decimal::ZERO && target.fraction <= Decimal::ONE,
                "allocation fraction for {} must be between 0 and 1",
                target.asset
            );
            anyhow::ensure!(
                seen.insert(target.asset.as_str()),
                "asset {} appears twice in allocation",
                target.asset
            );
        }

        for substitute in &portfolio.substitutes {
            anyhow::ensure!(
                !seen.contains(substitute.as_str()),
                "substitute {} is also part of the core allocation",
                substitute
            );
        }

        anyhow::ensure!(
            portfolio.fee_asset_min_holding >= Decimal::ZERO,
            "fee_asset_min_holding must not be negative"
        );

        anyhow::ensure!(
            self.trading.max_substitute_fraction > Decimal::ZERO
                && self.trading.max_substitute_fraction <= Decimal::ONE,
            "max_substitute_fraction must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trading.min_trade_value >= Decimal::ZERO
                && self.trading.dust_threshold >= Decimal::ZERO,
            "min_trade_value and dust_threshold must not be negative"
        );

        anyhow::ensure!(
            self.execution.retry_reduction > Decimal::ZERO
                && self.execution.retry_reduction < Decimal::ONE,
            "retry_reduction must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.taker_fee_pct >= Decimal::ZERO
                && self.execution.taker_fee_pct < Decimal::ONE_HUNDRED,
            "taker_fee_pct must be between 0 and 100"
        );

        anyhow::ensure!(
            self.schedule.interval_minutes >= 1,
            "interval_minutes must be at least 1"
        );

        Ok(())
    }

    /// Credentials are required before the first cycle.
    pub fn require_credentials(&self) -> Result<()> {
        anyhow::ensure!(
            !self.binance.api_key.is_empty() && !self.binance.secret_key.is_empty(),
            "Binance credentials missing (set RBL__BINANCE__API_KEY and RBL__BINANCE__SECRET_KEY)"
        );
        Ok(())
    }
}

impl PortfolioConfig {
    /// Target fraction for a core asset.
    pub fn target_fraction(&self, asset: &str) -> Option<Decimal> {
        self.allocation
            .iter()
            .find(|t| t.asset == asset)
            .map(|t| t.fraction)
    }

    pub fn is_core(&self, asset: &str) -> bool {
        self.allocation.iter().any(|t| t.asset == asset)
    }

    pub fn is_stable(&self, asset: &str) -> bool {
        self.stable_assets.iter().any(|s| s == asset)
    }

    /// Whether the fee asset carries a minimum absolute holding.
    pub fn fee_floor_enabled(&self) -> bool {
        self.fee_asset_min_holding > Decimal::ZERO
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            recv_window_ms: default_recv_window(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            trade_pair: default_trade_pair(),
            valuation_currency: default_valuation_currency(),
            anchor_asset: default_anchor_asset(),
            stable_assets: default_stable_assets(),
            allocation: default_allocation(),
            substitutes: default_substitutes(),
            fee_asset: default_fee_asset(),
            fee_asset_min_holding: Decimal::ZERO,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_trade_value: default_min_trade_value(),
            max_substitute_fraction: default_max_substitute_fraction(),
            dust_threshold: default_dust_threshold(),
            take_profit: default_take_profit(),
            rebuy_held_substitutes: false,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            taker_fee_pct: default_taker_fee_pct(),
            retry_reduction: default_retry_reduction(),
            dry_run: default_dry_run(),
            order_book_depth: default_order_book_depth(),
            trade_sample_size: default_trade_sample_size(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            default_bullish: default_bullish(),
            bearish: Vec::new(),
            volume_interval: default_volume_interval(),
            volume_lookback: default_volume_lookback(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}
